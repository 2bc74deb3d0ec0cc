//! sarprep: Sentinel-1 GRD preprocessing with ESA SNAP
//!
//! Turns a Level-1 GRD SAFE product into an analysis-ready GeoTIFF. The crate
//! validates the job parameters, builds a SNAP processing graph
//! (calibration, dB conversion, optional speckle filtering, land-sea masking and
//! terrain correction), runs `gpt` on it and rewrites the scene's GeoJSON
//! metadata to match the raster that was actually produced.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use crate::types::{
    BoundingBox, CalibrationBand, ErrorKind, GeoTransform, MaskType, Polarization, SarError,
    SarResult,
};

pub use crate::io::{SceneDescriptor, SceneLocator};
pub use crate::core::{
    EngineConfig, EngineResult, GptEngine, GraphBuilder, JobOrchestrator, JobOutcome,
    JobParameters, JobPaths, OutputArtifact, ProcessingEngine, ProcessingGraph, Stage,
};
