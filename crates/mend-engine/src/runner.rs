//! External test runner invocation.
//!
//! The runner is a child process given the script's path relative to the work
//! dir. Stdout and stderr are merged line by line into one log. On unix the
//! runner leads its own process group, so a timeout or cancellation kills
//! the browsers and servers it started along with it.

use crate::config::schema::RunnerConfig;
use async_trait::async_trait;
use mend_common::protocol::ExecutionMode;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to keep draining pipes after the process is gone.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

static SKIPPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+ skipped\b").unwrap());
static PASSED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^\s*\d+ passed\b").unwrap());

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to start runner '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Runner I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Runner command is empty")]
    EmptyCommand,
    #[error("Run cancelled")]
    Cancelled,
}

/// Everything one trial run needs.
#[derive(Debug, Clone)]
pub struct RunInvocation {
    pub work_dir: PathBuf,
    /// Script location relative to `work_dir`.
    pub script_path: PathBuf,
    pub mode: ExecutionMode,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl RunOutcome {
    /// A run that never produced runner output, e.g. because it could not start.
    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            log: log.into(),
            timed_out: false,
            duration: Duration::ZERO,
        }
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(
        &self,
        invocation: &RunInvocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunnerError>;
}

/// True when the runner reported skipped tests and nothing passed.
pub fn all_tests_skipped(log: &str) -> bool {
    SKIPPED_RE.is_match(log) && !PASSED_RE.is_match(log)
}

pub struct ProcessRunner {
    config: RunnerConfig,
}

enum ProcessOutcome {
    Completed(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

impl ProcessRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, invocation: &RunInvocation) -> Result<Command, RunnerError> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or(RunnerError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(&invocation.script_path);
        let flag = match invocation.mode {
            ExecutionMode::Visible => self.config.visible_flag.as_ref(),
            ExecutionMode::Headless => self.config.headless_flag.as_ref(),
        };
        if let Some(flag) = flag {
            cmd.arg(flag);
        }
        cmd.envs(&invocation.env)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        Ok(cmd)
    }
}

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &RunInvocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RunnerError> {
        let mut cmd = self.build_command(invocation)?;
        let program = self.config.command[0].clone();

        debug!(
            program = %program,
            script = %invocation.script_path.display(),
            work_dir = %invocation.work_dir.display(),
            mode = ?invocation.mode,
            "spawning runner"
        );
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|source| RunnerError::Spawn { program, source })?;

        let log = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, log.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, log.clone())));
        }

        let outcome = tokio::select! {
            status = child.wait() => ProcessOutcome::Completed(status?),
            () = cancel.cancelled() => {
                info!("cancellation requested; killing runner");
                terminate(&mut child).await;
                ProcessOutcome::Cancelled
            }
            () = tokio::time::sleep(invocation.timeout) => {
                warn!(timeout_secs = invocation.timeout.as_secs(), "runner timed out; killing");
                terminate(&mut child).await;
                ProcessOutcome::TimedOut
            }
        };

        // Grandchildren can hold the pipes open; keep whatever arrived in time.
        let drain = async {
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
        };
        if tokio::time::timeout(IO_CAPTURE_TIMEOUT, drain).await.is_err() {
            warn!("runner output capture timed out");
            for reader in &readers {
                reader.abort();
            }
        }
        let mut log = log.lock().map(|l| l.clone()).unwrap_or_default();
        let duration = started.elapsed();

        match outcome {
            ProcessOutcome::Cancelled => Err(RunnerError::Cancelled),
            ProcessOutcome::TimedOut => {
                log.push_str(&format!(
                    "[mend] runner killed after {}s without exiting\n",
                    invocation.timeout.as_secs()
                ));
                Ok(RunOutcome {
                    success: false,
                    exit_code: None,
                    log,
                    timed_out: true,
                    duration,
                })
            }
            ProcessOutcome::Completed(status) => {
                let exit_code = status.code();
                let success = status.success() && !all_tests_skipped(&log);
                info!(
                    exit_code = ?exit_code,
                    success,
                    duration_ms = duration.as_millis() as u64,
                    output_lines = log.lines().count(),
                    "runner finished"
                );
                Ok(RunOutcome {
                    success,
                    exit_code,
                    log,
                    timed_out: false,
                    duration,
                })
            }
        }
    }
}

/// Kill the runner and, on unix, every process in its group.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!(pid, error = %e, "failed to kill runner process group");
            }
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "runner already gone");
    }
}

async fn forward_lines<R: AsyncRead + Unpin>(reader: R, log: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Ok(mut log) = log.lock() {
            log.push_str(&line);
            log.push('\n');
        }
    }
}
