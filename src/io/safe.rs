use crate::io::metadata::{SceneMetadata, METADATA_FILE_NAME};
use crate::types::{BoundingBox, Polarization, SarError, SarResult};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Manifest file at the root of every SAFE product
pub const MANIFEST_FILE_NAME: &str = "manifest.safe";

/// One input Sentinel-1 product as found on disk
#[derive(Debug, Clone)]
pub struct SceneDescriptor {
    /// `<name>.SAFE` product directory
    pub root_path: PathBuf,
    /// `manifest.safe` inside the product, read by the engine
    pub manifest_path: PathBuf,
    /// Data-path identifier of the scene, used to name outputs
    pub scene_id: String,
    /// Polarisations with a measurement band in the product
    pub available_polarizations: BTreeSet<Polarization>,
    /// GeoJSON sidecar describing the scene
    pub metadata_path: PathBuf,
    /// Scene footprint taken from the sidecar, if it carries one
    pub footprint: Option<BoundingBox>,
}

impl SceneDescriptor {
    /// Product name without the `.SAFE` extension
    pub fn product_name(&self) -> String {
        self.root_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.scene_id.clone())
    }
}

/// Discovers the SAFE product and its sidecar inside an input directory.
///
/// Two layouts are recognised:
/// `input/<name>.SAFE` and the platform layout `input/<data-path>/<name>.SAFE`.
pub struct SceneLocator;

impl SceneLocator {
    pub fn locate<P: AsRef<Path>>(input_dir: P) -> SarResult<SceneDescriptor> {
        let input_dir = input_dir.as_ref();
        log::info!("Locating scene in {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(SarError::SceneNotFound(format!(
                "Input directory {} does not exist",
                input_dir.display()
            )));
        }

        let root_path = Self::find_safe_product(input_dir)?;
        let manifest_path = root_path.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            return Err(SarError::SceneNotFound(format!(
                "{} has no {}",
                root_path.display(),
                MANIFEST_FILE_NAME
            )));
        }

        let scene_id = Self::scene_id(input_dir, &root_path);

        let metadata_path = input_dir.join(METADATA_FILE_NAME);
        if !metadata_path.is_file() {
            return Err(SarError::MetadataMissing(format!(
                "No {} found alongside {}",
                METADATA_FILE_NAME,
                root_path.display()
            )));
        }
        let metadata = SceneMetadata::load(&metadata_path)?;
        let footprint = metadata.footprint(&scene_id);

        let available_polarizations = Self::extract_polarizations(&root_path)?;
        log::info!(
            "Found scene {} with polarisations {:?}",
            scene_id,
            available_polarizations
        );

        Ok(SceneDescriptor {
            root_path,
            manifest_path,
            scene_id,
            available_polarizations,
            metadata_path,
            footprint,
        })
    }

    /// First `*.SAFE` directory, in name order, at depth one or two
    fn find_safe_product(input_dir: &Path) -> SarResult<PathBuf> {
        let mut candidates = Vec::new();

        for entry in sorted_entries(input_dir)? {
            if !entry.is_dir() {
                continue;
            }
            if is_safe_dir(&entry) {
                candidates.push(entry);
                continue;
            }
            for nested in sorted_entries(&entry)? {
                if nested.is_dir() && is_safe_dir(&nested) {
                    candidates.push(nested);
                }
            }
        }

        if candidates.len() > 1 {
            log::warn!(
                "{} SAFE products found, processing {}",
                candidates.len(),
                candidates[0].display()
            );
        }

        candidates.into_iter().next().ok_or_else(|| {
            SarError::SceneNotFound(format!("No .SAFE product found in {}", input_dir.display()))
        })
    }

    fn scene_id(input_dir: &Path, root_path: &Path) -> String {
        let parent = root_path.parent().unwrap_or(input_dir);
        let named_dir = if parent == input_dir {
            root_path.file_stem()
        } else {
            parent.file_name()
        };
        named_dir
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string())
    }

    /// Polarisations from measurement band file names such as
    /// `s1b-iw-grd-vv-20190220t050359-...-001.tiff`
    pub fn extract_polarizations(safe_path: &Path) -> SarResult<BTreeSet<Polarization>> {
        let measurement_dir = safe_path.join("measurement");
        if !measurement_dir.is_dir() {
            return Err(SarError::SceneNotFound(format!(
                "{} has no measurement directory",
                safe_path.display()
            )));
        }

        let pattern = Regex::new(r"(?i)^s1[a-d]-[a-z0-9]+-[a-z]+-(vv|vh|hv|hh)-.*\.tiff?$")
            .map_err(|e| SarError::SceneNotFound(format!("Invalid band pattern: {}", e)))?;

        let mut polarizations = BTreeSet::new();
        for path in sorted_entries(&measurement_dir)? {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            match pattern.captures(name).and_then(|c| c.get(1)) {
                Some(pol) => {
                    polarizations.insert(pol.as_str().parse::<Polarization>()?);
                }
                None => log::debug!("Ignoring non-band file in measurement/: {}", name),
            }
        }

        Ok(polarizations)
    }
}

fn is_safe_dir(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("safe"))
}

fn sorted_entries(dir: &Path) -> SarResult<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_extract_polarizations_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let measurement = dir.path().join("measurement");
        fs::create_dir(&measurement).unwrap();
        fs::write(measurement.join("s1a-iw-grd-vh-20190220t050359-20190220t050424-015025-01c12f-002.tiff"), "").unwrap();
        fs::write(measurement.join("s1a-iw-grd-vv-20190220t050359-20190220t050424-015025-01c12f-001.tiff"), "").unwrap();
        fs::write(measurement.join("readme.txt"), "").unwrap();

        let pols = SceneLocator::extract_polarizations(dir.path()).unwrap();
        assert_eq!(
            pols.into_iter().collect::<Vec<_>>(),
            vec![Polarization::VV, Polarization::VH]
        );
    }

    #[test]
    fn test_missing_input_dir() {
        let err = SceneLocator::locate("/nonexistent/sarprep/input").unwrap_err();
        assert_eq!(err.kind(), crate::types::ErrorKind::SceneNotFound);
    }
}
