use anyhow::{Context, Result};
use clap::Parser;
use sarprep::core::engine::{DEFAULT_MEMORY_LIMIT, DEFAULT_STDERR_TAIL_LINES};
use sarprep::core::parse_document;
use sarprep::{EngineConfig, GptEngine, JobOrchestrator, JobOutcome, JobPaths};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sarprep", about = "Sentinel-1 GRD preprocessing with SNAP")]
#[command(version)]
struct Cli {
    /// Job parameters as JSON
    #[arg(long, env = "UP42_TASK_PARAMETERS", default_value = "{}")]
    params: String,

    /// Read job parameters from a JSON file (takes precedence over --params)
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Directory holding the SAFE product and data.json
    #[arg(long, env = "SARPREP_INPUT_DIR", default_value = "/tmp/input")]
    input_dir: PathBuf,

    /// Directory receiving the GeoTIFF and data.json
    #[arg(long, env = "SARPREP_OUTPUT_DIR", default_value = "/tmp/output")]
    output_dir: PathBuf,

    /// Scratch directory for graph files and engine output
    #[arg(long, env = "SARPREP_WORK_DIR", default_value = "/tmp/work")]
    work_dir: PathBuf,

    /// SNAP gpt executable
    #[arg(long, env = "GPT_PATH", default_value = "gpt")]
    gpt: PathBuf,

    /// JVM heap ceiling for the engine
    #[arg(long, env = "SNAP_MEMORY_LIMIT", default_value = DEFAULT_MEMORY_LIMIT)]
    memory_limit: String,

    /// SNAP tile cache size (gpt -c)
    #[arg(long, env = "SNAP_TILE_CACHE")]
    tile_cache: Option<String>,

    /// SNAP worker threads (gpt -q)
    #[arg(long, env = "SNAP_PARALLELISM")]
    parallelism: Option<usize>,

    /// Kill the engine after this many seconds
    #[arg(long, env = "SNAP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let raw = match &cli.params_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters from {}", path.display()))?,
        None => cli.params.clone(),
    };
    log::debug!("Fetching parameters for this block: {}", raw);

    let raw_params = match parse_document(&raw) {
        Ok(value) => value,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(e.exit_code());
        }
    };

    let engine = GptEngine::new(EngineConfig {
        gpt_path: cli.gpt,
        memory_limit: cli.memory_limit,
        tile_cache: cli.tile_cache,
        parallelism: cli.parallelism,
        timeout: cli.timeout_secs.map(Duration::from_secs),
        stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
    });
    let paths = JobPaths {
        input_dir: cli.input_dir,
        output_dir: cli.output_dir,
        work_dir: cli.work_dir,
    };

    let outcome = JobOrchestrator::new(paths, engine).run(&raw_params);
    match &outcome {
        JobOutcome::Succeeded(artifact) => {
            println!("{}", artifact.raster_path.display());
        }
        JobOutcome::Failed { stage, error } => {
            eprintln!("sarprep failed during {} [{}]: {}", stage, error.kind(), error);
        }
    }
    std::process::exit(outcome.exit_code());
}
