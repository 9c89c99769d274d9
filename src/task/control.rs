//! Remote queue mutation
//!
//! Subtasks are added and deleted with `task` commands over ssh:
//!
//! ```text
//! ssh <host> -p <port> task add <task> [<octal no>] rebuild|copy <name>
//! ssh <host> -p <port> task add <task> del <name>
//! ssh <host> -p <port> task delsub <task> <octal no>
//! ```

use regex::Regex;
use std::sync::OnceLock;

use crate::core::config::RebuildConfig;
use crate::error::TaskError;
use crate::infra::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::task::format_octal;

/// How an added subtask obtains the package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Rebuild within the same branch
    Rebuild,
    /// Copy from another branch
    Copy,
}

impl BuildMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rebuild => "rebuild",
            Self::Copy => "copy",
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subtask created by an assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedSubtask {
    pub ordinal: u32,
    pub tag: String,
    /// Full command output
    pub message: String,
}

fn added_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"added #(?P<no>[0-7]+): build tag "(?P<tag>[^"]+)""#)
            .expect("added pattern is valid")
    })
}

/// Ordinal and tag of the last `added #N: build tag "..."` line
pub fn parse_added(output: &str) -> Option<(u32, String)> {
    added_pattern()
        .captures_iter(output)
        .filter_map(|caps| {
            let no = crate::task::parse_octal(caps.name("no")?.as_str())?;
            Some((no, caps.name("tag")?.as_str().to_string()))
        })
        .last()
}

/// Issues `task` commands for a target task
#[derive(Debug)]
pub struct TaskControl<'a, R: ProcessRunner> {
    config: &'a RebuildConfig,
    runner: &'a R,
}

impl<'a, R: ProcessRunner> TaskControl<'a, R> {
    pub fn new(config: &'a RebuildConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    fn task_command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("ssh")
            .args(self.config.control_ssh_args())
            .arg("task")
            .args(args)
            .timeout(self.config.command_timeout)
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, TaskError> {
        let output = self
            .runner
            .run(spec)
            .await
            .map_err(|e| TaskError::Control {
                command: spec.command_line(),
                error: e.to_string(),
            })?;

        if !output.success() {
            return Err(TaskError::Control {
                command: spec.command_line(),
                error: output
                    .last_line()
                    .unwrap_or("exited with a failure status")
                    .to_string(),
            });
        }
        Ok(output)
    }

    /// Add a package to the task, at `before` when given
    pub async fn assign(
        &self,
        task_no: u64,
        name: &str,
        before: Option<u32>,
        mode: BuildMode,
    ) -> Result<AssignedSubtask, TaskError> {
        let mut args = vec!["add".to_string(), task_no.to_string()];
        if let Some(no) = before {
            args.push(format_octal(no));
        }
        args.push(mode.as_str().to_string());
        args.push(name.to_string());

        let output = self.run(&self.task_command(args)).await?;
        let (ordinal, tag) =
            parse_added(&output.output).ok_or_else(|| TaskError::UnexpectedOutput {
                output: output.output.trim().to_string(),
            })?;

        tracing::info!(task = task_no, package = name, no = ordinal, "assigned");
        Ok(AssignedSubtask {
            ordinal,
            tag,
            message: output.output,
        })
    }

    /// Delete the subtask at an ordinal
    pub async fn delete_subtask(&self, task_no: u64, no: u32) -> Result<(), TaskError> {
        let spec = self.task_command(["delsub".to_string(), task_no.to_string(), format_octal(no)]);
        self.run(&spec).await?;
        tracing::info!(task = task_no, no, "deleted subtask");
        Ok(())
    }

    /// Ask the task to remove a package from the branch
    pub async fn mark_removed(&self, task_no: u64, name: &str) -> Result<(), TaskError> {
        let spec = self.task_command(["add", &task_no.to_string(), "del", name]);
        self.run(&spec).await?;
        tracing::info!(task = task_no, package = name, "marked for removal");
        Ok(())
    }
}
