//! Package state machine
//!
//! A package's states are not advanced step by step. They are recomputed by
//! [`Package::derive_states`] from the package fields and a few facts about
//! the workspace, so a restarted run reaches the same states from the
//! persisted record alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;

use crate::config::defaults;
use crate::core::artifacts::{self, Artifacts};
use crate::core::classify::{Classifier, ErrorType, LostDep};
use crate::core::config::{Branches, RebuildConfig};
use crate::core::queue::QueueEntry;
use crate::core::status::StatusRecord;
use crate::error::RebuildError;
use crate::infra::filesystem;
use crate::infra::git::{self, GitCheckout};
use crate::infra::process::{CommandSpec, LogMode, ProcessError, ProcessRunner};
use crate::infra::workspace::Workspace;

/// One state a package can be in; a package holds a set of them
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    /// Marked for deletion from the target branch
    ToDelete,
    /// A checkout with repository metadata exists
    Cloned,
    /// The local build branch exists
    CheckedOut,
    /// Binary artifacts of the pinned tag exist
    Built,
    /// Neither queued remotely nor present in the target branch
    Removed,
}

/// Set of states
pub type StateSet = BTreeSet<PackageState>;

/// Workspace facts the states depend on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFacts {
    pub cloned: bool,
    pub checked_out: bool,
    /// The target branch lists the package
    pub listed: bool,
}

/// Progress mark of a processed package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    ToDelete,
    Built,
    Removed,
    Failed,
}

impl Mark {
    pub fn symbol(self) -> char {
        match self {
            Self::ToDelete => '\\',
            Self::Built => 'V',
            Self::Removed => '-',
            Self::Failed => 'X',
        }
    }
}

/// Everything a package needs to clone and build
pub struct BuildContext<'a, R: ProcessRunner> {
    pub config: &'a RebuildConfig,
    pub workspace: &'a Workspace,
    pub runner: &'a R,
    pub classifier: &'a Classifier,
    pub branches: &'a Branches,
}

enum CloneOutcome {
    Cloned,
    NotExist,
    Failed,
}

/// One source package and its build lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub paths: Vec<String>,
    pub tag_name: Option<String>,
    pub tag_id: Option<String>,
    pub no: Option<u32>,
    pub pkgname: Option<String>,
    pub rebuild_from: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Exit status of the last build
    pub status: Option<i32>,
    pub srpms: Vec<PathBuf>,
    pub rpms: Vec<PathBuf>,
    /// Tag pin of the persisted record
    pub recorded_tag_name: Option<String>,
    pub recorded_tag_id: Option<String>,
    /// Current build log
    pub log: Option<String>,
    pub error_type: ErrorType,
    pub lost_deps: Vec<LostDep>,
    pub states: StateSet,
    /// Problem worth reporting at the end of the run
    pub problem: Option<String>,
}

impl Package {
    /// Package with the queue entry fields and nothing else known
    pub fn from_entry(entry: QueueEntry) -> Self {
        Self {
            name: entry.name,
            paths: entry.paths,
            tag_name: entry.tag_name,
            tag_id: entry.tag_id,
            no: entry.no,
            pkgname: entry.pkgname,
            rebuild_from: entry.rebuild_from,
            fetched_at: entry.fetched_at,
            status: None,
            srpms: Vec::new(),
            rpms: Vec::new(),
            recorded_tag_name: None,
            recorded_tag_id: None,
            log: None,
            error_type: ErrorType::Unbuilt,
            lost_deps: Vec::new(),
            states: StateSet::new(),
            problem: None,
        }
    }

    /// Restore a package from its queue entry and persisted record
    ///
    /// Entry fields override the record. Artifacts are rescanned from the
    /// log when both a log and a record exist; otherwise the recorded
    /// artifacts that still exist are kept.
    pub fn materialize<R: ProcessRunner>(
        entry: QueueEntry,
        record: Option<StatusRecord>,
        ctx: &BuildContext<'_, R>,
    ) -> Result<Self, RebuildError> {
        let mut package = Self::from_entry(entry);
        package.log = ctx.workspace.read_log(&package.name)?;

        let has_record = record.is_some();
        if let Some(record) = record {
            package.status = record.status;
            package.srpms = record.srpms;
            package.rpms = record.rpms;
            package.recorded_tag_name = record.tag_name;
            package.recorded_tag_id = record.tag_id;
        }

        if has_record && package.log.is_some() {
            package.capture_artifacts(ctx)?;
        } else {
            package.srpms.retain(|path| path.exists());
            package.rpms.retain(|path| path.exists());
        }

        if package.status.is_none() && !package.srpms.is_empty() {
            package.status = Some(0);
        }

        package.refresh(ctx)?;
        Ok(package)
    }

    /// States implied by the package fields and the given facts
    pub fn derive_states(&self, facts: &StateFacts) -> StateSet {
        let mut states = StateSet::new();
        if self.fetched_at.is_none() {
            states.insert(PackageState::ToDelete);
        }
        if facts.cloned {
            states.insert(PackageState::Cloned);
        }
        if facts.checked_out {
            states.insert(PackageState::CheckedOut);
        }
        if self.is_built_artifact() {
            states.insert(PackageState::Built);
        }
        if self.no.is_none() && !facts.listed {
            states.insert(PackageState::Removed);
        }
        states
    }

    fn is_built_artifact(&self) -> bool {
        let pin_matches = |recorded: &Option<String>, current: &Option<String>| {
            recorded.is_none() || recorded == current
        };

        !self.rpms.is_empty()
            && self.status == Some(0)
            && pin_matches(&self.recorded_tag_id, &self.tag_id)
            && pin_matches(&self.recorded_tag_name, &self.tag_name)
    }

    fn facts<R: ProcessRunner>(&self, ctx: &BuildContext<'_, R>) -> Result<StateFacts, RebuildError> {
        let checkout = GitCheckout::new(ctx.workspace.checkout_dir(&self.name));
        let listed = match self.no {
            Some(_) => true,
            None => ctx
                .workspace
                .branch_listing(&ctx.branches.target)?
                .contains(&self.name),
        };

        Ok(StateFacts {
            cloned: checkout.is_cloned(),
            checked_out: checkout.has_build_branch(),
            listed,
        })
    }

    /// Recompute states and classification
    pub fn refresh<R: ProcessRunner>(&mut self, ctx: &BuildContext<'_, R>) -> Result<(), RebuildError> {
        let facts = self.facts(ctx)?;
        self.states = self.derive_states(&facts);

        let classification = ctx.classifier.classify(
            self.log.as_deref(),
            self.has(PackageState::Built),
            self.status,
        );
        self.error_type = classification.error_type;
        self.lost_deps = classification.lost_deps;
        Ok(())
    }

    pub fn has(&self, state: PackageState) -> bool {
        self.states.contains(&state)
    }

    /// Built, deleted or removed: nothing left to do for this package
    pub fn is_matched(&self) -> bool {
        self.has(PackageState::Built)
            || self.has(PackageState::ToDelete)
            || self.has(PackageState::Removed)
    }

    pub fn mark(&self) -> Mark {
        if self.has(PackageState::ToDelete) {
            Mark::ToDelete
        } else if self.has(PackageState::Built) {
            Mark::Built
        } else if self.has(PackageState::Removed) {
            Mark::Removed
        } else {
            Mark::Failed
        }
    }

    /// Fetch URLs, relative paths resolved against the git host
    pub fn fullpaths(&self, config: &RebuildConfig) -> Vec<String> {
        self.paths
            .iter()
            .map(|path| {
                if ["https://", "http://", "git://"]
                    .iter()
                    .any(|scheme| path.starts_with(scheme))
                {
                    path.clone()
                } else {
                    format!("{}{}", config.git_host(), path.trim_start_matches('/'))
                }
            })
            .collect()
    }

    /// Clone, check out and build, as far as the states require
    ///
    /// Does nothing for packages that are to be deleted, removed or already
    /// built. With `force`, the cached classification is dropped and the
    /// checkout and build steps run regardless of the reached states.
    pub async fn reconcile_and_build<R: ProcessRunner>(
        &mut self,
        force: bool,
        ctx: &BuildContext<'_, R>,
    ) -> Result<(), RebuildError> {
        if self.has(PackageState::ToDelete)
            || self.has(PackageState::Removed)
            || self.has(PackageState::Built)
        {
            return Ok(());
        }

        tracing::info!("Reconciling {} (force: {force})", self.name);
        self.problem = None;
        ctx.workspace.reset_scratch()?;
        filesystem::write_file(&ctx.workspace.log_file(&self.name), "")?;
        self.log = None;

        match self.clone_sources(ctx).await? {
            CloneOutcome::Cloned => {}
            CloneOutcome::NotExist => {
                tracing::info!("{} does not exist anymore, marking for deletion", self.name);
                self.fetched_at = None;
                self.log = ctx.workspace.read_log(&self.name)?;
                return self.refresh(ctx);
            }
            CloneOutcome::Failed => {
                self.log = ctx.workspace.read_log(&self.name)?;
                return self.refresh(ctx);
            }
        }

        if force {
            self.preclean();
        }
        self.refresh(ctx)?;

        if force || self.has(PackageState::Cloned) {
            let checked_out = self.checkout(ctx).await?;
            self.refresh(ctx)?;
            if !checked_out {
                self.problem = Some(format!("checkout of {} failed", self.name));
                return Ok(());
            }
        }

        if force || self.has(PackageState::CheckedOut) {
            self.build(ctx).await?;
        }
        Ok(())
    }

    async fn clone_sources<R: ProcessRunner>(
        &mut self,
        ctx: &BuildContext<'_, R>,
    ) -> Result<CloneOutcome, RebuildError> {
        let candidates = self.fullpaths(ctx.config);
        if candidates.is_empty() {
            tracing::warn!("{} has no source location", self.name);
            return Ok(CloneOutcome::Failed);
        }

        let scratch = ctx.workspace.scratch_dir();
        let log = ctx.workspace.log_file(&self.name);
        let dest = GitCheckout::new(ctx.workspace.checkout_dir(&self.name));

        for url in &candidates {
            let spec = git::clone_command(url, &self.name, &scratch, &log, ctx.config.command_timeout);
            let output = match ctx.runner.run(&spec).await {
                Ok(output) => output,
                Err(e @ ProcessError::Timeout { .. }) => {
                    tracing::warn!("Cloning {} from {url}: {e}", self.name);
                    self.problem = Some(e.to_string());
                    return Ok(CloneOutcome::Failed);
                }
                Err(e) => return Err(e.into()),
            };

            if output.success() && dest.is_cloned() {
                tracing::debug!("Cloned {} from {url}", self.name);
                return Ok(CloneOutcome::Cloned);
            }

            if ctx.classifier.marker(&output.output) == Some(ErrorType::NotExist) {
                tracing::debug!("No repository for {} at {url}", self.name);
                filesystem::remove_dir_all(dest.path())?;
                continue;
            }

            if output.output.contains("unable to checkout") {
                let branches = dest.remote_branches().unwrap_or_default();
                if dest.is_cloned() && branches.contains(&ctx.branches.target) {
                    return Ok(CloneOutcome::Cloned);
                }
                tracing::warn!(
                    "{}: branch '{}' is missing in {url}",
                    self.name,
                    ctx.branches.target
                );
            } else {
                tracing::warn!(
                    "Cloning {} from {url} failed: {}",
                    self.name,
                    output.last_line().unwrap_or("no output")
                );
            }
            return Ok(CloneOutcome::Failed);
        }

        Ok(CloneOutcome::NotExist)
    }

    /// Tag to build: the pinned one, else the latest tag of the branch
    async fn selected_tag<R: ProcessRunner>(
        &self,
        ctx: &BuildContext<'_, R>,
    ) -> Result<Option<String>, RebuildError> {
        if let Some(tag) = &self.tag_name {
            return Ok(Some(tag.clone()));
        }

        let checkout = GitCheckout::new(ctx.workspace.checkout_dir(&self.name));
        let branch = match &self.rebuild_from {
            Some(branch) => Some(branch.clone()),
            None => {
                let remote = checkout.remote_branches().unwrap_or_else(|e| {
                    tracing::debug!("{e}");
                    Vec::new()
                });
                [
                    ctx.branches.target.as_str(),
                    "master",
                    ctx.branches.source.as_str(),
                ]
                .into_iter()
                .find(|candidate| remote.iter().any(|b| b == candidate))
                .map(str::to_string)
            }
        };

        let Some(branch) = branch else {
            tracing::debug!("{}: no known branch, building HEAD", self.name);
            return Ok(None);
        };

        let spec = git::describe_command(&branch, checkout.path(), ctx.config.command_timeout);
        match ctx.runner.run(&spec).await {
            Ok(output) if output.success() => {
                Ok(output.last_line().map(|line| line.trim().to_string()))
            }
            Ok(output) => {
                tracing::debug!(
                    "{}: no tag on origin/{branch}: {}",
                    self.name,
                    output.last_line().unwrap_or_default()
                );
                Ok(None)
            }
            Err(e @ ProcessError::Timeout { .. }) => {
                tracing::warn!("{}: {e}", self.name);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the build branch; `false` when git refused
    async fn checkout<R: ProcessRunner>(&self, ctx: &BuildContext<'_, R>) -> Result<bool, RebuildError> {
        let tag = self.selected_tag(ctx).await?;
        tracing::debug!("Checking out {} at {}", self.name, tag.as_deref().unwrap_or("HEAD"));

        let spec = git::checkout_command(
            tag.as_deref(),
            &ctx.workspace.checkout_dir(&self.name),
            &ctx.workspace.log_file(&self.name),
            ctx.config.command_timeout,
        );
        match ctx.runner.run(&spec).await {
            Ok(output) if output.success() => Ok(true),
            Ok(output) => {
                tracing::warn!(
                    "Checkout of {} failed: {}",
                    self.name,
                    output.last_line().unwrap_or("no output")
                );
                Ok(false)
            }
            Err(e @ ProcessError::Timeout { .. }) => {
                tracing::warn!("{}: {e}", self.name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn build_command(&self, config: &RebuildConfig, workspace: &Workspace) -> CommandSpec {
        CommandSpec::new("gear-hsh")
            .args(["--commit", "--"])
            .args(config.hasher_args())
            .arg("-vvvv")
            .current_dir(workspace.checkout_dir(&self.name))
            .log_to(workspace.log_file(&self.name), LogMode::Truncate)
            .timeout(config.build_timeout)
    }

    /// Run the build tool until the log is no longer transient
    ///
    /// At most `max_build_attempts` invocations, with exponential backoff
    /// between them.
    pub async fn build<R: ProcessRunner>(&mut self, ctx: &BuildContext<'_, R>) -> Result<(), RebuildError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(ctx.config.retry_base_delay)
            .with_max_interval(Duration::from_millis(defaults::RETRY_MAX_DELAY_MS))
            .with_max_elapsed_time(None)
            .build();
        let spec = self.build_command(ctx.config, ctx.workspace);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.preclean();
            tracing::info!("Building {} (attempt {attempt})", self.name);

            match ctx.runner.run(&spec).await {
                Ok(output) => {
                    self.status = output.status;
                    self.log = Some(output.output).filter(|log| !log.trim().is_empty());
                }
                Err(e @ ProcessError::Timeout { .. }) => {
                    tracing::warn!("Build of {} timed out: {e}", self.name);
                    self.problem = Some(e.to_string());
                    self.status = None;
                    self.log = ctx
                        .workspace
                        .read_log(&self.name)?
                        .filter(|log| !log.trim().is_empty());
                }
                Err(e) => return Err(e.into()),
            }

            self.capture_artifacts(ctx)?;
            self.refresh(ctx)?;

            let transient = self.error_type.is_transient()
                || (self.error_type == ErrorType::Unbuilt && self.log.is_none());
            if !transient {
                break;
            }
            if attempt >= ctx.config.max_build_attempts {
                let message = format!("still {} after {attempt} build attempts", self.error_type);
                tracing::warn!("{}: {message}", self.name);
                self.problem = Some(message);
                break;
            }

            let delay = backoff.next_backoff().unwrap_or(ctx.config.retry_base_delay);
            tracing::info!(
                "{} is {}, retrying in {}s",
                self.name,
                self.error_type,
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }

        tracing::info!("Built {}: {}", self.name, self.error_type);
        Ok(())
    }

    fn preclean(&mut self) {
        self.log = None;
        self.error_type = ErrorType::Unbuilt;
        self.lost_deps.clear();
    }

    fn capture_artifacts<R: ProcessRunner>(&mut self, ctx: &BuildContext<'_, R>) -> Result<(), RebuildError> {
        let Artifacts { srpms, rpms } = match &self.log {
            Some(log) => artifacts::capture(log, ctx.workspace)?,
            None => Artifacts::default(),
        };
        self.srpms = srpms;
        self.rpms = rpms;
        Ok(())
    }

    /// Names of the produced binary packages
    pub fn rpm_names(&self) -> Vec<String> {
        self.rpms.iter().filter_map(|path| artifacts::rpm_name(path)).collect()
    }

    /// Snapshot to persist
    pub fn record(&self) -> StatusRecord {
        StatusRecord {
            name: self.name.clone(),
            paths: self.paths.clone(),
            srpms: self.srpms.clone(),
            rpms: self.rpms.clone(),
            tag_name: self.tag_name.clone(),
            tag_id: self.tag_id.clone(),
            no: self.no,
            pkgname: self.pkgname.clone(),
            rebuild_from: self.rebuild_from.clone(),
            fetched_at: self.fetched_at,
            status: self.status,
            error_type: Some(self.error_type),
            states: self.states.clone(),
            lost_deps: self.lost_deps.clone(),
        }
    }
}
