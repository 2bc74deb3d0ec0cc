use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid polarization: {}",
                s
            ))),
        }
    }
}

/// Which surface the land-sea mask removes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaskType {
    Land,
    Sea,
}

impl std::fmt::Display for MaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MaskType::Land => write!(f, "land"),
            MaskType::Sea => write!(f, "sea"),
        }
    }
}

impl FromStr for MaskType {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "land" => Ok(MaskType::Land),
            "sea" => Ok(MaskType::Sea),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid mask type: {} (expected land or sea)",
                s
            ))),
        }
    }
}

/// Radiometric calibration output band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CalibrationBand {
    #[default]
    Sigma0,
    Gamma0,
    Beta0,
}

impl CalibrationBand {
    /// Band name prefix as produced by the engine, e.g. `Sigma0` in `Sigma0_VV`
    pub fn band_prefix(&self) -> &'static str {
        match self {
            CalibrationBand::Sigma0 => "Sigma0",
            CalibrationBand::Gamma0 => "Gamma0",
            CalibrationBand::Beta0 => "Beta0",
        }
    }
}

impl FromStr for CalibrationBand {
    type Err = SarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sigma" => Ok(CalibrationBand::Sigma0),
            "gamma" => Ok(CalibrationBand::Gamma0),
            "beta" => Ok(CalibrationBand::Beta0),
            _ => Err(SarError::InvalidParameter(format!(
                "Invalid calibration band: {} (expected sigma, gamma or beta)",
                s
            ))),
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Smallest box containing all given (lon, lat) points
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = BoundingBox {
            min_lon: first.0,
            max_lon: first.0,
            min_lat: first.1,
            max_lat: first.1,
        };
        for &(lon, lat) in rest {
            bbox.min_lon = bbox.min_lon.min(lon);
            bbox.max_lon = bbox.max_lon.max(lon);
            bbox.min_lat = bbox.min_lat.min(lat);
            bbox.max_lat = bbox.max_lat.max(lat);
        }
        Some(bbox)
    }

    /// GeoJSON `bbox` member order: [west, south, east, north]
    pub fn to_geojson_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    pub fn from_geojson_array(values: &[f64]) -> Option<Self> {
        match values {
            [west, south, east, north] => Some(BoundingBox {
                min_lon: *west,
                max_lon: *east,
                min_lat: *south,
                max_lat: *north,
            }),
            _ => None,
        }
    }

    /// Closed, counter-clockwise exterior ring of the box
    pub fn polygon_ring(&self) -> Vec<[f64; 2]> {
        vec![
            [self.min_lon, self.min_lat],
            [self.max_lon, self.min_lat],
            [self.max_lon, self.max_lat],
            [self.min_lon, self.max_lat],
            [self.min_lon, self.min_lat],
        ]
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map a pixel/line position (pixel corners, not centres) to georeferenced coordinates
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// A transform of all zeros or a degenerate pixel size carries no georeferencing
    pub fn is_degenerate(&self) -> bool {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        det == 0.0 || !det.is_finite()
    }
}

/// Stable names for every failure kind the unit can report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParameter,
    SceneNotFound,
    MetadataMissing,
    PolarisationUnavailable,
    EngineUnavailable,
    EngineExecutionFailed,
    EngineContractViolation,
    EngineTimeout,
    CorruptRasterOutput,
    MetadataWriteFailed,
    Io,
    Gdal,
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

fn join_polarizations(pols: &BTreeSet<Polarization>) -> String {
    pols.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
}

/// Error types for SAR processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Scene not found: {0}")]
    SceneNotFound(String),

    #[error("Scene metadata missing: {0}")]
    MetadataMissing(String),

    #[error(
        "Polarisation(s) {} not available in scene (requested: {})",
        join_polarizations(.missing),
        join_polarizations(.requested)
    )]
    PolarisationUnavailable {
        requested: BTreeSet<Polarization>,
        missing: BTreeSet<Polarization>,
    },

    #[error("Processing engine unavailable ({}): {source}", .path.display())]
    EngineUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Processing engine failed with exit code {exit_code}:\n{stderr_tail}")]
    EngineExecutionFailed { exit_code: i32, stderr_tail: String },

    #[error(
        "Processing engine exited successfully but produced no raster at {}:\n{stderr_tail}",
        .expected.display()
    )]
    EngineContractViolation {
        expected: PathBuf,
        stderr_tail: String,
    },

    #[error("Processing engine killed after {timeout:?}:\n{stderr_tail}")]
    EngineTimeout {
        timeout: Duration,
        stderr_tail: String,
    },

    #[error("Corrupt raster output: {0}")]
    CorruptRasterOutput(String),

    #[error("Failed to write output metadata: {0}")]
    MetadataWriteFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML writing error: {0}")]
    XmlWriting(String),
}

impl SarError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SarError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            SarError::SceneNotFound(_) => ErrorKind::SceneNotFound,
            SarError::MetadataMissing(_) => ErrorKind::MetadataMissing,
            SarError::PolarisationUnavailable { .. } => ErrorKind::PolarisationUnavailable,
            SarError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            SarError::EngineExecutionFailed { .. } => ErrorKind::EngineExecutionFailed,
            SarError::EngineContractViolation { .. } => ErrorKind::EngineContractViolation,
            SarError::EngineTimeout { .. } => ErrorKind::EngineTimeout,
            SarError::CorruptRasterOutput(_) => ErrorKind::CorruptRasterOutput,
            SarError::MetadataWriteFailed(_) => ErrorKind::MetadataWriteFailed,
            SarError::Io(_) => ErrorKind::Io,
            SarError::Gdal(_) => ErrorKind::Gdal,
            SarError::Json(_) | SarError::XmlWriting(_) => ErrorKind::Serialization,
        }
    }

    /// Process exit status for this failure; configuration, engine, output and
    /// infrastructure failures use separate ranges
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::InvalidParameter => 2,
            ErrorKind::SceneNotFound => 3,
            ErrorKind::MetadataMissing => 4,
            ErrorKind::PolarisationUnavailable => 5,
            ErrorKind::EngineUnavailable => 10,
            ErrorKind::EngineExecutionFailed => 11,
            ErrorKind::EngineContractViolation => 12,
            ErrorKind::EngineTimeout => 13,
            ErrorKind::CorruptRasterOutput => 20,
            ErrorKind::MetadataWriteFailed => 21,
            ErrorKind::Io => 30,
            ErrorKind::Gdal => 31,
            ErrorKind::Serialization => 32,
        }
    }

    /// Only a timeout may succeed on a plain rerun of the whole job
    pub fn is_retryable(&self) -> bool {
        matches!(self, SarError::EngineTimeout { .. })
    }
}

/// Result type for SAR operations
pub type SarResult<T> = Result<T, SarError>;
