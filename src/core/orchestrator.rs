use crate::core::engine::ProcessingEngine;
use crate::core::graph::GraphBuilder;
use crate::core::params;
use crate::core::reconcile::{OutputArtifact, OutputReconciler, MASKED_NODATA};
use crate::io::safe::SceneLocator;
use crate::types::{SarError, SarResult};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Directories used by one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
}

impl JobPaths {
    /// `input/`, `output/` and `work/` below a common root
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            input_dir: root.join("input"),
            output_dir: root.join("output"),
            work_dir: root.join("work"),
        }
    }

    fn ensure_output_dirs(&self) -> SarResult<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }
}

/// Pipeline stage that produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Locate,
    Build,
    Execute,
    Reconcile,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Validate => "parameter validation",
            Stage::Locate => "scene location",
            Stage::Build => "graph building",
            Stage::Execute => "engine execution",
            Stage::Reconcile => "output reconciliation",
        };
        write!(f, "{}", name)
    }
}

/// Terminal state of a job; there is no partial success
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(OutputArtifact),
    Failed { stage: Stage, error: SarError },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            JobOutcome::Succeeded(_) => 0,
            JobOutcome::Failed { error, .. } => error.exit_code(),
        }
    }
}

fn at(stage: Stage) -> impl Fn(SarError) -> (Stage, SarError) {
    move |error| (stage, error)
}

/// Runs validation, scene location, graph building, engine execution and
/// reconciliation for a single scene, strictly in that order
pub struct JobOrchestrator<E: ProcessingEngine> {
    paths: JobPaths,
    engine: E,
    graph_builder: GraphBuilder,
}

impl<E: ProcessingEngine> JobOrchestrator<E> {
    pub fn new(paths: JobPaths, engine: E) -> Self {
        Self {
            paths,
            engine,
            graph_builder: GraphBuilder::new(),
        }
    }

    pub fn with_graph_builder(mut self, graph_builder: GraphBuilder) -> Self {
        self.graph_builder = graph_builder;
        self
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn run(&self, raw_params: &Value) -> JobOutcome {
        match self.try_run(raw_params) {
            Ok(artifact) => {
                log::info!(
                    "Job succeeded: {} + {}",
                    artifact.raster_path.display(),
                    artifact.metadata_path.display()
                );
                JobOutcome::Succeeded(artifact)
            }
            Err((stage, error)) => {
                log::error!("Job failed during {} [{}]: {}", stage, error.kind(), error);
                JobOutcome::Failed { stage, error }
            }
        }
    }

    fn try_run(&self, raw_params: &Value) -> Result<OutputArtifact, (Stage, SarError)> {
        log::info!("📋 Step 1: Validating job parameters");
        let params = params::validate(raw_params).map_err(at(Stage::Validate))?;

        log::info!("📦 Step 2: Locating input scene");
        let scene = SceneLocator::locate(&self.paths.input_dir).map_err(at(Stage::Locate))?;

        log::info!("🔧 Step 3: Building processing graph");
        let graph = self
            .graph_builder
            .build(&params, &scene)
            .map_err(at(Stage::Build))?;

        log::info!("🛰️  Step 4: Running processing engine ({} operators)", graph.operator_count());
        self.paths.ensure_output_dirs().map_err(at(Stage::Execute))?;
        let engine_result = self.engine.run(&graph, &self.paths.work_dir);

        let artifact = engine_result.map_err(at(Stage::Execute)).and_then(|result| {
            log::info!("🗺️  Step 5: Reconciling raster and metadata");
            let nodata = graph.is_masked().then_some(MASKED_NODATA);
            OutputReconciler::new(&self.paths.output_dir)
                .with_nodata(nodata)
                .reconcile(&result, &scene)
                .map_err(at(Stage::Reconcile))
        });

        let leftover = graph.output_path(&self.paths.work_dir);
        if leftover.exists() {
            log::debug!("Removing leftover engine output {}", leftover.display());
            if let Err(e) = std::fs::remove_file(&leftover) {
                log::warn!("Could not remove {}: {}", leftover.display(), e);
            }
        }

        artifact
    }
}
