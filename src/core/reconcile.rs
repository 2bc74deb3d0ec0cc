use crate::core::engine::EngineResult;
use crate::io::metadata::{self, SceneMetadata, METADATA_FILE_NAME};
use crate::io::raster::{self, RasterInfo};
use crate::io::safe::SceneDescriptor;
use crate::types::{BoundingBox, SarError, SarResult};
use std::path::{Path, PathBuf};

/// Value the engine writes into masked-out pixels
pub const MASKED_NODATA: f64 = 0.0;

/// Final raster plus the GeoJSON record describing it
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub raster_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Extent written to the metadata, WGS84 [west, south, east, north]
    pub bbox: BoundingBox,
}

/// Moves the engine raster into the output directory and writes metadata
/// whose bbox and geometry are derived from that raster
pub struct OutputReconciler {
    output_dir: PathBuf,
    nodata: Option<f64>,
}

impl OutputReconciler {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            nodata: None,
        }
    }

    /// Declare `nodata` on the raster before its extent is measured
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn reconcile(&self, result: &EngineResult, scene: &SceneDescriptor) -> SarResult<OutputArtifact> {
        let produced = result.raster_output_path.as_deref().ok_or_else(|| {
            SarError::CorruptRasterOutput("engine result carries no raster path".to_string())
        })?;

        let raster_name = format!("{}.tif", scene.scene_id);
        let raster_path = self.output_dir.join(&raster_name);
        let metadata_path = self.output_dir.join(METADATA_FILE_NAME);
        // an earlier run's pair must not outlive a failure of this one
        for previous in [&metadata_path, &raster_path] {
            remove_previous(previous)?;
        }

        if let Some(nodata) = self.nodata {
            raster::mark_nodata(produced, nodata)?;
        }

        let info = RasterInfo::inspect(produced)?;
        let bbox = info.valid_extent()?;
        log::info!("Raster extent (WGS84): {:?}", bbox.to_geojson_array());
        if let Some(previous) = scene.footprint {
            log::debug!("Input scene extent was: {:?}", previous.to_geojson_array());
        }

        let scene_metadata = SceneMetadata::load(&scene.metadata_path)?;

        std::fs::create_dir_all(&self.output_dir)?;

        move_file(produced, &raster_path)?;
        log::info!("Raster written to {}", raster_path.display());

        let feature = scene_metadata.reconciled_feature(&scene.scene_id, &bbox, &raster_name);
        if let Err(e) = metadata::write_atomic(&metadata_path, &metadata::feature_collection(vec![feature])) {
            log::error!("Metadata write failed, removing {}", raster_path.display());
            if let Err(cleanup) = std::fs::remove_file(&raster_path) {
                log::error!("Could not remove {}: {}", raster_path.display(), cleanup);
            }
            return Err(e);
        }
        log::info!("Metadata written to {}", metadata_path.display());

        Ok(OutputArtifact {
            raster_path,
            metadata_path,
            bbox,
        })
    }
}

/// Delete an output file left by a previous run. Anything that is not a
/// regular file is left for the final write to report.
fn remove_previous(path: &Path) -> std::io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => {
            log::info!("Removing previous output {}", path.display());
            std::fs::remove_file(path)
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!("rename {} failed ({}), copying", from.display(), e);
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
