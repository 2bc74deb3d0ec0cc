//! Processing graph model and builder
//!
//! A graph is a strict linear chain of engine operators. The order is fixed:
//!
//! ```text
//! Read -> Calibrate -> LinearToDb [-> SpeckleFilter] [-> LandSeaMask] [-> TerrainCorrection] -> Write
//! ```
//!
//! [`ProcessingGraph`] stores one slot per position so that a graph without a
//! reader or writer, or with operators out of order, cannot be constructed.

use crate::core::params::JobParameters;
use crate::io::safe::SceneDescriptor;
use crate::types::{BoundingBox, CalibrationBand, MaskType, Polarization, SarError, SarResult};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Speckle filter operator used when filtering is requested
pub const SPECKLE_FILTER: &str = "Lee";
/// Speckle filter window edge in pixels
pub const SPECKLE_WINDOW_SIZE: u32 = 5;

/// DEM used for terrain correction inside SRTM coverage
pub const DEFAULT_DEM: &str = "SRTM 3Sec";
/// DEM used when the scene reaches outside SRTM coverage
pub const HIGH_LATITUDE_DEM: &str = "ASTER 1sec GDEM";
/// Latitude band (exclusive) covered by SRTM
pub const SRTM_LATITUDE_RANGE: (f64, f64) = (-56.0, 60.0);

pub const TERRAIN_PIXEL_SPACING_M: f64 = 10.0;
pub const TERRAIN_MAP_PROJECTION: &str = "WGS84(DD)";
pub const RESAMPLING_METHOD: &str = "BILINEAR_INTERPOLATION";

/// Raster container written by the final operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterFormat {
    GeoTiff,
    #[default]
    BigTiff,
}

impl RasterFormat {
    /// Writer format name understood by the engine
    pub fn format_name(&self) -> &'static str {
        match self {
            RasterFormat::GeoTiff => "GeoTIFF",
            RasterFormat::BigTiff => "GeoTIFF-BigTIFF",
        }
    }

    pub fn extension(&self) -> &'static str {
        "tif"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Calibrate,
    LinearToDb,
    SpeckleFilter,
    LandSeaMask,
    TerrainCorrection,
    Write,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadParams {
    pub manifest: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrateParams {
    pub polarizations: BTreeSet<Polarization>,
    pub band: CalibrationBand,
}

impl CalibrateParams {
    /// Names of the calibrated bands, e.g. `Sigma0_VV`
    pub fn output_bands(&self) -> Vec<String> {
        self.polarizations
            .iter()
            .map(|p| format!("{}_{}", self.band.band_prefix(), p))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearToDbParams {
    pub source_bands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeckleFilterParams {
    pub filter: String,
    pub window_size: u32,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            filter: SPECKLE_FILTER.to_string(),
            window_size: SPECKLE_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LandSeaMaskParams {
    pub mask: MaskType,
}

impl LandSeaMaskParams {
    /// The mask operator removes land when true, sea when false
    pub fn land_mask(&self) -> bool {
        self.mask == MaskType::Land
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerrainCorrectionParams {
    pub dem_name: String,
    pub pixel_spacing_m: f64,
    pub map_projection: String,
}

impl TerrainCorrectionParams {
    /// Pick the DEM from the scene footprint; SRTM does not reach the poles
    pub fn for_footprint(footprint: Option<&BoundingBox>) -> Self {
        let (south_limit, north_limit) = SRTM_LATITUDE_RANGE;
        let dem_name = match footprint {
            Some(bbox) if bbox.max_lat >= north_limit || bbox.min_lat <= south_limit => {
                log::info!(
                    "Scene latitude [{:.3}, {:.3}] outside SRTM coverage, using {}",
                    bbox.min_lat,
                    bbox.max_lat,
                    HIGH_LATITUDE_DEM
                );
                HIGH_LATITUDE_DEM
            }
            _ => DEFAULT_DEM,
        };

        Self {
            dem_name: dem_name.to_string(),
            pixel_spacing_m: TERRAIN_PIXEL_SPACING_M,
            map_projection: TERRAIN_MAP_PROJECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteParams {
    pub file_stem: String,
    pub format: RasterFormat,
}

impl WriteParams {
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_stem, self.format.extension())
    }
}

/// One engine operator with its typed parameters
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Read(ReadParams),
    Calibrate(CalibrateParams),
    LinearToDb(LinearToDbParams),
    SpeckleFilter(SpeckleFilterParams),
    LandSeaMask(LandSeaMaskParams),
    TerrainCorrection(TerrainCorrectionParams),
    Write(WriteParams),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Read(_) => OperationKind::Read,
            Operation::Calibrate(_) => OperationKind::Calibrate,
            Operation::LinearToDb(_) => OperationKind::LinearToDb,
            Operation::SpeckleFilter(_) => OperationKind::SpeckleFilter,
            Operation::LandSeaMask(_) => OperationKind::LandSeaMask,
            Operation::TerrainCorrection(_) => OperationKind::TerrainCorrection,
            Operation::Write(_) => OperationKind::Write,
        }
    }

    /// Node id, which is also the engine operator name
    pub fn node_id(&self) -> &'static str {
        match self {
            Operation::Read(_) => "Read",
            Operation::Calibrate(_) => "Calibration",
            Operation::LinearToDb(_) => "LinearToFromdB",
            Operation::SpeckleFilter(_) => "Speckle-Filter",
            Operation::LandSeaMask(_) => "Land-Sea-Mask",
            Operation::TerrainCorrection(_) => "Terrain-Correction",
            Operation::Write(_) => "Write",
        }
    }

    /// Operator parameters as (element, value) pairs in engine vocabulary.
    /// The Write target is a bare file name; the engine driver resolves it.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        match self {
            Operation::Read(p) => vec![
                ("file", p.manifest.display().to_string()),
                ("formatName", "SENTINEL-1".to_string()),
            ],
            Operation::Calibrate(p) => {
                let pols = p
                    .polarizations
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                vec![
                    ("auxFile", "Product Auxiliary File".to_string()),
                    ("outputImageInComplex", "false".to_string()),
                    ("outputImageScaleInDb", "false".to_string()),
                    ("createGammaBand", "false".to_string()),
                    ("createBetaBand", "false".to_string()),
                    ("selectedPolarisations", pols),
                    ("outputSigmaBand", (p.band == CalibrationBand::Sigma0).to_string()),
                    ("outputGammaBand", (p.band == CalibrationBand::Gamma0).to_string()),
                    ("outputBetaBand", (p.band == CalibrationBand::Beta0).to_string()),
                ]
            }
            Operation::LinearToDb(p) => vec![("sourceBands", p.source_bands.join(","))],
            Operation::SpeckleFilter(p) => vec![
                ("filter", p.filter.clone()),
                ("filterSizeX", p.window_size.to_string()),
                ("filterSizeY", p.window_size.to_string()),
            ],
            Operation::LandSeaMask(p) => vec![
                ("landMask", p.land_mask().to_string()),
                ("useSRTM", "true".to_string()),
                ("invertGeometry", "false".to_string()),
                ("shorelineExtension", "0".to_string()),
            ],
            Operation::TerrainCorrection(p) => vec![
                ("demName", p.dem_name.clone()),
                ("demResamplingMethod", RESAMPLING_METHOD.to_string()),
                ("imgResamplingMethod", RESAMPLING_METHOD.to_string()),
                ("pixelSpacingInMeter", format!("{:.1}", p.pixel_spacing_m)),
                ("mapProjection", p.map_projection.clone()),
                ("nodataValueAtSea", "false".to_string()),
                ("saveSelectedSourceBand", "true".to_string()),
            ],
            Operation::Write(p) => vec![
                ("file", p.file_name()),
                ("formatName", p.format.format_name().to_string()),
            ],
        }
    }
}

/// Ordered, linear chain of operators for one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingGraph {
    read: ReadParams,
    calibrate: CalibrateParams,
    linear_to_db: LinearToDbParams,
    speckle_filter: Option<SpeckleFilterParams>,
    land_sea_mask: Option<LandSeaMaskParams>,
    terrain_correction: Option<TerrainCorrectionParams>,
    write: WriteParams,
}

impl ProcessingGraph {
    /// Operators in execution order
    pub fn operations(&self) -> Vec<Operation> {
        let mut ops = vec![
            Operation::Read(self.read.clone()),
            Operation::Calibrate(self.calibrate.clone()),
            Operation::LinearToDb(self.linear_to_db.clone()),
        ];
        if let Some(p) = &self.speckle_filter {
            ops.push(Operation::SpeckleFilter(p.clone()));
        }
        if let Some(p) = &self.land_sea_mask {
            ops.push(Operation::LandSeaMask(p.clone()));
        }
        if let Some(p) = &self.terrain_correction {
            ops.push(Operation::TerrainCorrection(p.clone()));
        }
        ops.push(Operation::Write(self.write.clone()));
        ops
    }

    pub fn kinds(&self) -> Vec<OperationKind> {
        self.operations().iter().map(Operation::kind).collect()
    }

    /// Number of operators in the chain; never fewer than four.
    pub fn operator_count(&self) -> usize {
        3 + usize::from(self.speckle_filter.is_some())
            + usize::from(self.land_sea_mask.is_some())
            + usize::from(self.terrain_correction.is_some())
            + 1
    }

    pub fn polarizations(&self) -> &BTreeSet<Polarization> {
        &self.calibrate.polarizations
    }

    pub fn is_masked(&self) -> bool {
        self.land_sea_mask.is_some()
    }

    pub fn write_params(&self) -> &WriteParams {
        &self.write
    }

    /// Where the engine is told to write its raster when run inside `work_dir`
    pub fn output_path(&self, work_dir: &Path) -> PathBuf {
        work_dir.join(self.write.file_name())
    }
}

/// Assembles a [`ProcessingGraph`] from validated parameters and a located scene
pub struct GraphBuilder {
    format: RasterFormat,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self {
            format: RasterFormat::default(),
        }
    }

    pub fn with_format(format: RasterFormat) -> Self {
        Self { format }
    }

    pub fn build(&self, params: &JobParameters, scene: &SceneDescriptor) -> SarResult<ProcessingGraph> {
        let requested = params.polarizations();
        let available = &scene.available_polarizations;

        let effective: BTreeSet<Polarization> = requested.intersection(available).copied().collect();
        let missing: BTreeSet<Polarization> = requested.difference(available).copied().collect();

        if effective.is_empty() {
            return Err(SarError::PolarisationUnavailable {
                requested: requested.clone(),
                missing,
            });
        }
        if !missing.is_empty() {
            log::warn!(
                "Polarisations {:?} not in scene {}, processing {:?} only",
                missing,
                scene.scene_id,
                effective
            );
        }

        let calibrate = CalibrateParams {
            polarizations: effective,
            band: params.calibration_band(),
        };
        let linear_to_db = LinearToDbParams {
            source_bands: calibrate.output_bands(),
        };

        let speckle_filter = params.speckle_filter().then(SpeckleFilterParams::default);
        let land_sea_mask = params.mask().map(|mask| LandSeaMaskParams { mask });
        let terrain_correction = params
            .terrain_correction()
            .then(|| TerrainCorrectionParams::for_footprint(scene.footprint.as_ref()));

        if speckle_filter.is_none() {
            log::info!("No speckle filtering.");
        }
        if land_sea_mask.is_none() {
            log::info!("No masking.");
        }
        if terrain_correction.is_none() {
            log::info!("No terrain correction.");
        }

        let pol_suffix = calibrate
            .polarizations
            .iter()
            .map(|p| p.to_string().to_lowercase())
            .collect::<Vec<_>>()
            .join("_");

        let graph = ProcessingGraph {
            read: ReadParams {
                manifest: scene.manifest_path.clone(),
            },
            calibrate,
            linear_to_db,
            speckle_filter,
            land_sea_mask,
            terrain_correction,
            write: WriteParams {
                file_stem: format!("{}_{}", scene.product_name(), pol_suffix),
                format: self.format,
            },
        };

        log::debug!("Built processing graph: {:?}", graph.kinds());
        Ok(graph)
    }
}
