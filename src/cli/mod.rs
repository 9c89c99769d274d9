//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod output;
pub mod rebuild;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use crate::core::config::ConfigOverrides;

/// gear-rebuild - rebuild gear packages against a target branch
///
/// Clones, builds and classifies every package of the target task, the
/// source tasks and the list file, resuming from the plant's recorded state.
#[derive(Parser, Debug)]
#[command(name = "gear-rebuild")]
#[command(author, version, long_version = output::long_version(), about, long_about = None)]
pub struct Cli {
    /// Plant folder to proceed the sources in
    #[arg(short = 'p', long, env = "GEAR_REBUILD_PLANT_DIR")]
    pub plant_dir: Option<PathBuf>,

    /// Task number to prebuild the sources into
    #[arg(short = 't', long = "target-task-no", value_name = "NUMBER")]
    pub task_no: Option<u64>,

    /// Comma separated task numbers to take the sources from
    #[arg(
        short = 's',
        long = "source-task-numbers",
        value_name = "NUMBERS",
        value_delimiter = ','
    )]
    pub source_task_noes: Vec<u64>,

    /// List file of packages to rebuild
    #[arg(short = 'l', long, value_name = "FILE")]
    pub list_file: Option<PathBuf>,

    /// Original branch name for the rebuild
    #[arg(short = 'i', long, value_name = "NAME")]
    pub in_branch: Option<String>,

    /// Target branch name for the rebuild
    #[arg(short = 'o', long, value_name = "NAME")]
    pub to_branch: Option<String>,

    /// Clean the plant before the rebuild
    #[arg(short = 'c', long, overrides_with = "no_clean_plant")]
    pub clean_plant: bool,

    #[arg(long, overrides_with = "clean_plant", hide = true)]
    pub no_clean_plant: bool,

    /// Stop at the first package that fails to build
    #[arg(short = 'b', long, overrides_with = "no_break_on_error")]
    pub break_on_error: bool,

    #[arg(long, overrides_with = "break_on_error", hide = true)]
    pub no_break_on_error: bool,

    /// Assign every finished package to the target task
    #[arg(short = 'a', long, overrides_with = "no_assign")]
    pub assign: bool,

    #[arg(long, overrides_with = "assign", hide = true)]
    pub no_assign: bool,

    /// Assign finished packages and requeue missing gems automatically
    #[arg(short = 'A', long, overrides_with = "no_auto_assign")]
    pub auto_assign: bool,

    #[arg(long, overrides_with = "auto_assign", hide = true)]
    pub no_auto_assign: bool,

    /// Drop the state of packages the task did not originally build
    #[arg(short = 'D', long = "drop-state-of-non-built", overrides_with = "keep_state_of_non_built")]
    pub drop_nonbuilt: bool,

    #[arg(long = "no-drop-state-of-non-built", overrides_with = "drop_nonbuilt", hide = true)]
    pub keep_state_of_non_built: bool,

    /// Git host
    #[arg(long, env = "GEAR_REBUILD_HOST")]
    pub host: Option<String>,

    /// Hasher working root
    #[arg(long, value_name = "DIR")]
    pub hasher_root: Option<PathBuf>,

    /// Root of the mirrored branch repositories
    #[arg(long, value_name = "DIR")]
    pub repo_base_path: Option<PathBuf>,

    /// Target architecture
    #[arg(long)]
    pub arch: Option<String>,

    /// Hasher config file
    #[arg(long, value_name = "FILE")]
    pub hasher_config: Option<PathBuf>,

    /// Timeout of git, ssh and install calls, in seconds
    #[arg(long, value_name = "SECS")]
    pub command_timeout: Option<u64>,

    /// Timeout of one build, in seconds
    #[arg(long, value_name = "SECS")]
    pub build_timeout: Option<u64>,

    /// Build attempts while the log shows a transient failure
    #[arg(long, value_name = "N")]
    pub max_build_attempts: Option<u32>,

    /// Config file (default: <config dir>/gear-rebuild/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the per-package progress
    #[arg(short, long)]
    pub quiet: bool,
}

/// `Some(true)` for the positive flag, `Some(false)` for its negation
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    /// Settings given on the command line
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            plant_dir: self.plant_dir.clone(),
            hasher_root: self.hasher_root.clone(),
            repo_base_path: self.repo_base_path.clone(),
            arch: self.arch.clone(),
            host: self.host.clone(),
            task_no: self.task_no,
            source_task_noes: self.source_task_noes.clone(),
            list_file: self.list_file.clone(),
            in_branch: self.in_branch.clone(),
            to_branch: self.to_branch.clone(),
            clean_plant: toggle(self.clean_plant, self.no_clean_plant),
            break_on_error: toggle(self.break_on_error, self.no_break_on_error),
            assign: toggle(self.assign, self.no_assign),
            auto_assign: toggle(self.auto_assign, self.no_auto_assign),
            drop_nonbuilt: toggle(self.drop_nonbuilt, self.keep_state_of_non_built),
            hasher_config: self.hasher_config.clone(),
            command_timeout_secs: self.command_timeout,
            build_timeout_secs: self.build_timeout,
            max_build_attempts: self.max_build_attempts,
        }
    }

    /// Execute the rebuild
    pub async fn run(self) -> Result<()> {
        rebuild::execute(&self).await
    }
}
