//! Driver for the external SNAP Graph Processing Tool (`gpt`)
//!
//! The driver writes the graph file, runs the engine with a memory ceiling,
//! keeps only the tail of its stderr, and checks the output contract itself:
//! a zero exit status is only trusted when the raster actually exists.
//!
//! `gpt` is a launcher that starts the JVM as its own child. On Unix the
//! engine therefore runs in a fresh process group, and a timeout kills the
//! whole group rather than just the launcher.

use crate::core::graph::ProcessingGraph;
use crate::io::graph_xml;
use crate::types::{SarError, SarResult};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_GPT_PATH: &str = "gpt";
/// JVM heap ceiling handed to the engine
pub const DEFAULT_MEMORY_LIMIT: &str = "8G";
pub const DEFAULT_STDERR_TAIL_LINES: usize = 200;

/// How often a running engine is polled for exit and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the output readers may take to reach end-of-stream once the engine is gone
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Engine invocation settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Path or name of the `gpt` executable
    pub gpt_path: PathBuf,
    /// Maximum JVM heap, in JVM size syntax (`8G`, `512M`)
    pub memory_limit: String,
    /// Engine tile cache size (`gpt -c`), engine default when unset
    pub tile_cache: Option<String>,
    /// Engine thread count (`gpt -q`), engine default when unset
    pub parallelism: Option<usize>,
    /// Wall-clock limit after which the engine is killed
    pub timeout: Option<Duration>,
    /// Number of trailing stderr lines kept for diagnostics
    pub stderr_tail_lines: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpt_path: PathBuf::from(DEFAULT_GPT_PATH),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            tile_cache: None,
            parallelism: None,
            timeout: None,
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }
}

/// Outcome of a successful engine run
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResult {
    pub exit_code: i32,
    pub raster_output_path: Option<PathBuf>,
    pub stderr_tail: String,
}

/// Anything that can execute a processing graph inside a working directory
pub trait ProcessingEngine {
    fn run(&self, graph: &ProcessingGraph, work_dir: &Path) -> SarResult<EngineResult>;
}

/// Ring buffer holding the last `capacity` lines of a stream
#[derive(Debug, Clone)]
pub struct StderrTail {
    lines: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

impl StderrTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_string(self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(&format!("[... {} earlier lines omitted ...]\n", self.dropped));
        }
        out.push_str(&Vec::from(self.lines).join("\n"));
        out
    }
}

/// Map an engine exit to a result.
///
/// `exit_code` is `None` when the process was ended by a signal.
pub fn classify(exit_code: Option<i32>, expected_raster: &Path, stderr_tail: String) -> SarResult<EngineResult> {
    match exit_code {
        Some(0) if expected_raster.is_file() => Ok(EngineResult {
            exit_code: 0,
            raster_output_path: Some(expected_raster.to_path_buf()),
            stderr_tail,
        }),
        Some(0) => Err(SarError::EngineContractViolation {
            expected: expected_raster.to_path_buf(),
            stderr_tail,
        }),
        Some(code) => Err(SarError::EngineExecutionFailed {
            exit_code: code,
            stderr_tail,
        }),
        None => Err(SarError::EngineExecutionFailed {
            exit_code: -1,
            stderr_tail,
        }),
    }
}

enum WaitOutcome {
    Exited(ExitStatus),
    TimedOut(Duration),
}

/// Runs graphs through SNAP's `gpt` as a child process
pub struct GptEngine {
    config: EngineConfig,
}

impl GptEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn command(&self, graph_path: &Path, work_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.config.gpt_path);
        cmd.arg(graph_path).arg("-e");
        if let Some(cache) = &self.config.tile_cache {
            cmd.arg("-c").arg(cache);
        }
        if let Some(threads) = self.config.parallelism {
            cmd.arg("-q").arg(threads.to_string());
        }
        // Read after the launcher's own VM options, so it caps the heap
        cmd.env("_JAVA_OPTIONS", format!("-Xmx{}", self.config.memory_limit))
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);
        cmd
    }

    fn wait(&self, child: &mut Child) -> std::io::Result<WaitOutcome> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(WaitOutcome::Exited(status)),
                Ok(None) => {}
                Err(e) => {
                    log::error!("Lost track of SNAP process {}: {}", child.id(), e);
                    kill_engine(child);
                    return Err(e);
                }
            }
            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    log::error!("SNAP exceeded {:?}, killing process group {}", timeout, child.id());
                    kill_engine(child);
                    return Ok(WaitOutcome::TimedOut(timeout));
                }
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the engine together with every process it started, then reap it
fn kill_engine(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = child.id() as libc::pid_t;
        // SAFETY: kill(2) takes no pointers; a negative pid addresses the
        // process group the child leads, which exists until the child is reaped
        let result = unsafe { libc::kill(-group, libc::SIGKILL) };
        if result != 0 {
            log::debug!(
                "killpg({}) failed: {}",
                group,
                std::io::Error::last_os_error()
            );
        }
    }
    // kill fails only if the child already exited; wait reaps it either way
    let _ = child.kill();
    if let Err(e) = child.wait() {
        log::warn!("Could not reap SNAP process {}: {}", child.id(), e);
    }
}

/// Line reader on one engine output stream, running on its own thread
struct StreamReader {
    finished: mpsc::Receiver<()>,
}

impl StreamReader {
    fn spawn<R, F>(stream: R, mut on_line: F) -> Self
    where
        R: Read + Send + 'static,
        F: FnMut(String) + Send + 'static,
    {
        let (done, finished) = mpsc::channel::<()>();
        std::thread::spawn(move || {
            // dropped at end-of-stream, which disconnects `finished`
            let _done = done;
            for line in BufReader::new(stream).split(b'\n').map_while(Result::ok) {
                on_line(String::from_utf8_lossy(&line).trim_end().to_string());
            }
        });
        Self { finished }
    }

    /// Wait at most `grace` for end-of-stream. A reader still blocked after
    /// that is left detached; returns whether the stream was fully drained.
    fn settle(self, grace: Duration) -> bool {
        match self.finished.recv_timeout(grace) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }
}

fn snapshot(tail: &Mutex<StderrTail>) -> String {
    match tail.lock() {
        Ok(tail) => tail.clone().into_string(),
        Err(poisoned) => poisoned.into_inner().clone().into_string(),
    }
}

impl ProcessingEngine for GptEngine {
    fn run(&self, graph: &ProcessingGraph, work_dir: &Path) -> SarResult<EngineResult> {
        std::fs::create_dir_all(work_dir)?;

        let raster_path = graph.output_path(work_dir);
        if raster_path.exists() {
            log::warn!("Removing stale engine output {}", raster_path.display());
            std::fs::remove_file(&raster_path)?;
        }

        // Deleted when dropped, whichever way this function returns
        let mut graph_file = tempfile::Builder::new()
            .prefix("graph_")
            .suffix(".xml")
            .tempfile_in(work_dir)?;
        graph_file.write_all(graph_xml::to_xml(graph, work_dir)?.as_bytes())?;
        graph_file.flush()?;

        let mut cmd = self.command(graph_file.path(), work_dir);
        log::info!("Running SNAP command: {:?}", cmd);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SarError::EngineUnavailable {
            path: self.config.gpt_path.clone(),
            source,
        })?;

        let stdout_reader = child.stdout.take().map(|stream| {
            StreamReader::spawn(stream, |line| log::debug!("[gpt] {}", line))
        });
        let tail = Arc::new(Mutex::new(StderrTail::new(self.config.stderr_tail_lines)));
        let stderr_reader = child.stderr.take().map(|stream| {
            let tail = Arc::clone(&tail);
            StreamReader::spawn(stream, move |line| {
                log::warn!("[gpt] {}", line);
                if let Ok(mut tail) = tail.lock() {
                    tail.push(line);
                }
            })
        });

        let outcome = self.wait(&mut child);

        let drained = [stdout_reader, stderr_reader]
            .into_iter()
            .flatten()
            .map(|reader| reader.settle(STREAM_DRAIN_GRACE))
            .fold(true, |all, drained| all && drained);
        if !drained {
            log::warn!("SNAP output still open after exit, detaching readers");
        }
        let stderr_tail = snapshot(&tail);

        match outcome? {
            WaitOutcome::Exited(status) => {
                log::info!("SNAP finished in {:?} with {}", started.elapsed(), status);
                let result = classify(status.code(), &raster_path, stderr_tail);
                if let Err(e) = &result {
                    log::error!("SNAP did not finish successfully: {}", e.kind());
                }
                result
            }
            WaitOutcome::TimedOut(timeout) => Err(SarError::EngineTimeout {
                timeout,
                stderr_tail,
            }),
        }
    }
}
