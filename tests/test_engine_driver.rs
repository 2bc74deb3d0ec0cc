#![cfg(unix)]

use sarprep::core::{params, ProcessingEngine};
use sarprep::types::ErrorKind;
use sarprep::{
    EngineConfig, GptEngine, GraphBuilder, Polarization, ProcessingGraph, SarError,
    SceneDescriptor,
};
use serde_json::json;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn graph() -> ProcessingGraph {
    let root = PathBuf::from("/tmp/input/scene/S1A_IW_GRDH_1SDV_20200103T170815.SAFE");
    let scene = SceneDescriptor {
        manifest_path: root.join("manifest.safe"),
        root_path: root,
        scene_id: "scene".to_string(),
        available_polarizations: [Polarization::VV, Polarization::VH].into_iter().collect(),
        metadata_path: PathBuf::from("/tmp/input/data.json"),
        footprint: None,
    };
    let params = params::validate(&json!({"polarisations": ["VV"], "speckle_filter": true})).unwrap();
    GraphBuilder::new().build(&params, &scene).unwrap()
}

/// Write an executable shell script standing in for `gpt`
fn fake_gpt(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("gpt");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn engine(gpt_path: PathBuf) -> GptEngine {
    GptEngine::new(EngineConfig {
        gpt_path,
        ..EngineConfig::default()
    })
}

fn graph_files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("graph_"))
                .unwrap_or(false)
        })
        .collect()
}

#[test]
fn test_successful_run_returns_raster_and_removes_graph_file() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let graph = graph();
    let expected = graph.output_path(&work);
    let captured = dir.path().join("captured.xml");

    let gpt = fake_gpt(
        dir.path(),
        &format!(
            "cp \"$1\" '{}'\necho \"$_JAVA_OPTIONS\" > '{}'\necho 'Processing...'\ntouch '{}'\nexit 0",
            captured.display(),
            dir.path().join("java_opts").display(),
            expected.display()
        ),
    );

    let result = engine(gpt).run(&graph, &work).expect("engine run should succeed");
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.raster_output_path.as_deref(), Some(expected.as_path()));
    assert!(graph_files_in(&work).is_empty(), "graph file left behind");

    let xml = std::fs::read_to_string(&captured).unwrap();
    for node in ["Read", "Calibration", "LinearToFromdB", "Speckle-Filter", "Terrain-Correction", "Write"] {
        assert!(xml.contains(&format!("<node id=\"{}\">", node)), "missing node {}", node);
    }
    assert!(!xml.contains("Land-Sea-Mask"));

    let java_opts = std::fs::read_to_string(dir.path().join("java_opts")).unwrap();
    assert_eq!(java_opts.trim(), "-Xmx8G");
}

#[test]
fn test_zero_exit_without_raster_is_contract_violation() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let gpt = fake_gpt(dir.path(), "echo 'done, honest' >&2\nexit 0");

    let err = engine(gpt).run(&graph(), &work).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineContractViolation);
    match err {
        SarError::EngineContractViolation { stderr_tail, .. } => {
            assert!(stderr_tail.contains("done, honest"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(graph_files_in(&work).is_empty());
}

#[test]
fn test_nonzero_exit_is_execution_failure_with_tail() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let gpt = fake_gpt(
        dir.path(),
        "echo 'SEVERE: org.esa.snap.core.gpf.OperatorException: no DEM' >&2\nexit 3",
    );

    let err = engine(gpt).run(&graph(), &work).unwrap_err();
    assert_eq!(err.exit_code(), 11);
    match err {
        SarError::EngineExecutionFailed { exit_code, stderr_tail } => {
            assert_eq!(exit_code, 3);
            assert!(stderr_tail.contains("OperatorException"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(graph_files_in(&work).is_empty());
}

#[test]
fn test_stderr_tail_is_bounded() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let gpt = fake_gpt(
        dir.path(),
        "i=0\nwhile [ $i -lt 500 ]; do echo \"warning $i\" >&2; i=$((i+1)); done\nexit 1",
    );

    let engine = GptEngine::new(EngineConfig {
        gpt_path: gpt,
        stderr_tail_lines: 10,
        ..EngineConfig::default()
    });
    match engine.run(&graph(), &work).unwrap_err() {
        SarError::EngineExecutionFailed { stderr_tail, .. } => {
            assert!(stderr_tail.lines().count() <= 11);
            assert!(stderr_tail.ends_with("warning 499"));
            assert!(!stderr_tail.contains("warning 10\n"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_missing_executable_is_engine_unavailable() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");

    let err = engine(dir.path().join("no-such-gpt")).run(&graph(), &work).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    assert_eq!(err.exit_code(), 10);
    assert!(graph_files_in(&work).is_empty());
}

#[test]
fn test_timeout_kills_engine() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let gpt = fake_gpt(dir.path(), "echo 'starting' >&2\nexec sleep 30");

    let engine = GptEngine::new(EngineConfig {
        gpt_path: gpt,
        timeout: Some(Duration::from_millis(300)),
        ..EngineConfig::default()
    });

    let started = std::time::Instant::now();
    let err = engine.run(&graph(), &work).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(err.kind(), ErrorKind::EngineTimeout);
    assert!(err.is_retryable());
    assert!(graph_files_in(&work).is_empty());
}

#[test]
fn test_timeout_kills_processes_started_by_engine() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    // the launcher stays alive and `sleep` runs as its child, holding stderr open
    let gpt = fake_gpt(dir.path(), "echo 'starting' >&2\nsleep 30\necho 'unreachable' >&2");

    let engine = GptEngine::new(EngineConfig {
        gpt_path: gpt,
        timeout: Some(Duration::from_millis(300)),
        ..EngineConfig::default()
    });

    let started = std::time::Instant::now();
    let err = engine.run(&graph(), &work).unwrap_err();
    let elapsed = started.elapsed();

    // well under the readers' drain grace: the pipes closed because the whole group died
    assert!(elapsed < Duration::from_secs(3), "run blocked for {:?}", elapsed);
    match err {
        SarError::EngineTimeout { timeout, stderr_tail } => {
            assert_eq!(timeout, Duration::from_millis(300));
            assert!(stderr_tail.contains("starting"));
            assert!(!stderr_tail.contains("unreachable"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(graph_files_in(&work).is_empty());
}

#[test]
fn test_stale_output_is_not_mistaken_for_success() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let graph = graph();
    std::fs::create_dir_all(&work).unwrap();
    std::fs::write(graph.output_path(&work), b"old run").unwrap();

    let gpt = fake_gpt(dir.path(), "exit 0");
    let err = engine(gpt).run(&graph, &work).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineContractViolation);
}

#[test]
fn test_tuning_flags_are_passed() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let work = dir.path().join("work");
    let graph = graph();
    let args_file = dir.path().join("args");
    let gpt = fake_gpt(
        dir.path(),
        &format!(
            "shift\necho \"$@\" > '{}'\ntouch '{}'",
            args_file.display(),
            graph.output_path(&work).display()
        ),
    );

    let engine = GptEngine::new(EngineConfig {
        gpt_path: gpt,
        memory_limit: "2G".to_string(),
        tile_cache: Some("1024M".to_string()),
        parallelism: Some(4),
        ..EngineConfig::default()
    });
    engine.run(&graph, &work).unwrap();

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(args.trim(), "-e -c 1024M -q 4");
}
