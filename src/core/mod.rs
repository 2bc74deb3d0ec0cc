//! Core pipeline stages

pub mod params;
pub mod graph;
pub mod engine;
pub mod reconcile;
pub mod orchestrator;

// Re-export main types
pub use params::{parse_document, validate, JobParameters};
pub use graph::{GraphBuilder, Operation, OperationKind, ProcessingGraph, RasterFormat};
pub use engine::{EngineConfig, EngineResult, GptEngine, ProcessingEngine, StderrTail};
pub use reconcile::{OutputArtifact, OutputReconciler};
pub use orchestrator::{JobOrchestrator, JobOutcome, JobPaths, Stage};
