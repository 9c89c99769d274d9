//! External process execution
//!
//! Runs git, hasher and task control commands with a per-call timeout.
//! When a log target is given, stdout and stderr of the child are both
//! redirected into the log file so the captured text keeps its original
//! interleaving; the returned output is the part of the log written by
//! this call.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::defaults;

/// `E2BIG` on Linux
const E2BIG: i32 = 7;

/// Process execution errors
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Program could not be started
    #[error("Failed to start '{program}': {error}")]
    Spawn { program: String, error: String },

    /// Argument list exceeds the system limit
    #[error("Argument list too long for '{program}'")]
    ArgumentListTooLong { program: String },

    /// Program did not finish in time and was killed
    #[error("'{program}' did not finish within {secs} seconds")]
    Timeout { program: String, secs: u64 },

    /// Log file could not be opened or read
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// How a log file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Start the log over
    Truncate,
    /// Add to the existing log
    Append,
}

/// Log file receiving combined child output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTarget {
    pub path: PathBuf,
    pub mode: LogMode,
}

/// A fully described external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub log: Option<LogTarget>,
    pub timeout: Duration,
}

impl CommandSpec {
    /// Create a command with the default timeout and the rebuild marker env
    pub fn new(program: impl Into<String>) -> Self {
        let (key, value) = defaults::REBUILD_ENV;
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: vec![(key.to_string(), value.to_string())],
            log: None,
            timeout: Duration::from_secs(defaults::COMMAND_TIMEOUT_SECS),
        }
    }

    /// Add one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run in the given directory
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Capture combined output into a log file
    #[must_use]
    pub fn log_to(mut self, path: impl Into<PathBuf>, mode: LogMode) -> Self {
        self.log = Some(LogTarget {
            path: path.into(),
            mode,
        });
        self
    }

    /// Override the timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Human readable command line
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    /// Whether the command exited with 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Last non-blank output line
    pub fn last_line(&self) -> Option<&str> {
        self.output.lines().rev().find(|line| !line.trim().is_empty())
    }
}

/// Executes external commands
///
/// All calls are awaited one at a time; implementations do not need to be
/// shareable across threads.
#[allow(async_fn_in_trait)]
pub trait ProcessRunner {
    /// Run a command to completion
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError>;
}

/// Runner backed by real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new system runner
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    fn spawn_error(spec: &CommandSpec, error: &std::io::Error) -> ProcessError {
        if error.raw_os_error() == Some(E2BIG) {
            ProcessError::ArgumentListTooLong {
                program: spec.program.clone(),
            }
        } else {
            ProcessError::Spawn {
                program: spec.program.clone(),
                error: error.to_string(),
            }
        }
    }

    fn timeout_error(spec: &CommandSpec) -> ProcessError {
        ProcessError::Timeout {
            program: spec.program.clone(),
            secs: spec.timeout.as_secs(),
        }
    }

    async fn run_logged(
        spec: &CommandSpec,
        target: &LogTarget,
    ) -> Result<CommandOutput, ProcessError> {
        let io_error = |e: std::io::Error| ProcessError::IoError {
            path: target.path.clone(),
            error: e.to_string(),
        };

        if let Some(parent) = target.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        match target.mode {
            LogMode::Truncate => options.write(true).truncate(true),
            LogMode::Append => options.append(true),
        };
        let stdout = options.open(&target.path).map_err(io_error)?;
        let start = stdout.metadata().map(|m| m.len()).map_err(io_error)?;
        let stderr = stdout.try_clone().map_err(io_error)?;

        let mut child = Self::command(spec)
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| Self::spawn_error(spec, &e))?;

        let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| Self::spawn_error(spec, &e))?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(Self::timeout_error(spec));
            }
        };

        let bytes = tokio::fs::read(&target.path).await.map_err(io_error)?;
        let written = usize::try_from(start)
            .ok()
            .and_then(|start| bytes.get(start..))
            .unwrap_or_default();

        Ok(CommandOutput {
            status: status.code(),
            output: String::from_utf8_lossy(written).into_owned(),
        })
    }

    async fn run_captured(spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let child = Self::command(spec)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Self::spawn_error(spec, &e))?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| Self::timeout_error(spec))?
            .map_err(|e| Self::spawn_error(spec, &e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            status: output.status.code(),
            output: text,
        })
    }
}

impl ProcessRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        tracing::debug!(command = %spec.command_line(), cwd = ?spec.cwd, "running");

        let result = match &spec.log {
            Some(target) => Self::run_logged(spec, target).await,
            None => Self::run_captured(spec).await,
        };

        match &result {
            Ok(output) => {
                tracing::debug!(status = ?output.status, "{}", output.output.trim_end());
            }
            Err(e) => tracing::debug!("{e}"),
        }

        result
    }
}
