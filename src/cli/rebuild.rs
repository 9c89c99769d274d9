//! Rebuild command implementation
//!
//! Wires configuration, workspace, remote tasks and the orchestrator
//! together for one run.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

use crate::cli::output::{self, ConsoleProgress};
use crate::cli::Cli;
use crate::core::config::{Branches, FileConfig, RebuildConfig};
use crate::core::orchestrator::Orchestrator;
use crate::core::queue::{parse_list, WorkQueue};
use crate::infra::dirs::AppDirs;
use crate::infra::process::SystemRunner;
use crate::infra::workspace::Workspace;
use crate::task::client::TaskClient;
use crate::task::queue::RemoteQueue;

/// Tools the run shells out to
const REQUIRED_TOOLS: [&str; 4] = ["git", "gear-hsh", "hsh", "hsh-install"];

/// Resolve the run configuration from the config file and the flags
pub fn load_config(cli: &Cli) -> Result<RebuildConfig> {
    let dirs = AppDirs::new();
    let path = cli.config.clone().unwrap_or_else(|| dirs.config_path());
    let file = FileConfig::load_from_path(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    Ok(RebuildConfig::resolve(file, cli.overrides(), &dirs)?)
}

/// Warn about external tools missing from PATH
pub fn preflight(config: &RebuildConfig) -> Vec<&'static str> {
    let mut tools: Vec<&'static str> = REQUIRED_TOOLS.to_vec();
    if config.task_no.is_some() {
        tools.push("ssh");
    }

    let missing: Vec<&'static str> = tools
        .into_iter()
        .filter(|tool| which::which(tool).is_err())
        .collect();
    for tool in &missing {
        tracing::warn!("'{tool}' was not found in PATH");
    }
    missing
}

fn read_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read list file {}", path.display()))?;
    Ok(parse_list(&content))
}

/// Execute the rebuild
pub async fn execute(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    tracing::info!("Plant: {}", config.plant_dir.display());
    preflight(&config);

    let list = match &config.list_file {
        Some(path) => read_list(path)?,
        None => Vec::new(),
    };

    let client = TaskClient::new(&config.task_info_url);
    let gitery_host = config.gitery_host();

    let target = match config.task_no {
        Some(no) => Some(
            client
                .fetch_queue(no, &gitery_host)
                .await
                .with_context(|| format!("Failed to fetch target task {no}"))?,
        ),
        None => None,
    };

    let mut sources: Vec<RemoteQueue> = Vec::with_capacity(config.source_task_noes.len());
    for &no in &config.source_task_noes {
        let queue = client
            .fetch_queue(no, &gitery_host)
            .await
            .with_context(|| format!("Failed to fetch source task {no}"))?;
        sources.push(queue);
    }

    let source_repos: Vec<Option<String>> = sources
        .iter()
        .map(|queue| queue.repo().map(str::to_string))
        .collect();
    let branches = Branches::resolve(
        &config,
        target.as_ref().and_then(RemoteQueue::repo),
        &source_repos,
    );
    tracing::info!(
        "Rebuilding from {} for {} ({})",
        branches.source,
        branches.target,
        branches.build_mode()
    );

    let remote_entries = target
        .iter()
        .chain(sources.iter())
        .flat_map(RemoteQueue::entries);
    let queue = WorkQueue::seed(remote_entries, &list, Utc::now());
    tracing::info!("{} packages queued", queue.len());

    let workspace = Workspace::new(&config);
    let runner = SystemRunner::new();
    let mut orchestrator = Orchestrator::new(&config, &workspace, &runner, branches, target, queue);

    let mut progress = ConsoleProgress::new(cli.quiet);
    let report = orchestrator
        .run(&mut progress)
        .await
        .context("Rebuild failed")?;
    output::print_summary(&report);

    let installed = orchestrator.install().await.context("Install failed")?;
    output::print_install(&installed);
    output::print_issues(orchestrator.issues());

    Ok(())
}
