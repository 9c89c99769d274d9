//! Rebuild orchestration
//!
//! Processes the work queue head by head: restore the package from its
//! status record, build it when needed, persist it, then either advance,
//! assign it to the target task, or requeue its missing dependencies in
//! front of it.

use chrono::Utc;
use std::collections::{BTreeMap, HashSet};

use crate::core::classify::{packetize_name, Classifier, ErrorType, LostDep};
use crate::core::config::{Branches, RebuildConfig};
use crate::core::package::{BuildContext, Mark, Package, PackageState};
use crate::core::queue::{QueueEntry, WorkQueue};
use crate::core::status::StatusStore;
use crate::error::{RebuildError, TaskError};
use crate::infra::process::{CommandSpec, LogMode, ProcessError, ProcessRunner};
use crate::infra::workspace::Workspace;
use crate::task::control::{AssignedSubtask, TaskControl};
use crate::task::queue::{allocate_slot, RemoteQueue};

/// Area an issue was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Assign,
    Install,
    Build,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Assign => write!(f, "assign"),
            Self::Install => write!(f, "install"),
            Self::Build => write!(f, "build"),
        }
    }
}

/// Non-fatal problem reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
    /// Package or dependency concerned
    pub entity: Option<String>,
}

impl Issue {
    fn new(kind: IssueKind, message: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entity: Some(entity.into()),
        }
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Packages that are built, deleted or removed
    pub ok: usize,
    pub errored: usize,
    pub issues: Vec<Issue>,
}

/// Outcome of the install step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Gated by break-on-error, or nothing to install
    Skipped,
    Installed { packages: usize },
    Failed,
}

/// Receives per-package progress
pub trait ProgressSink {
    fn package_started(&mut self, name: &str);
    fn package_finished(&mut self, name: &str, mark: Mark);
}

/// Progress sink that discards everything
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn package_started(&mut self, _name: &str) {}
    fn package_finished(&mut self, _name: &str, _mark: Mark) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostAction {
    Advanced,
    Assigned,
    Requeued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Requeue {
    Requeued,
    AlreadyRequeued,
    OwnPackage,
    Unavailable,
    NoSpace,
}

/// Drives a rebuild run over a work queue
pub struct Orchestrator<'a, R: ProcessRunner> {
    config: &'a RebuildConfig,
    workspace: &'a Workspace,
    runner: &'a R,
    classifier: Classifier,
    store: StatusStore,
    branches: Branches,
    target: Option<RemoteQueue>,
    queue: WorkQueue,
    packages: BTreeMap<String, Package>,
    /// Dependency names already requeued during this run
    requeued: HashSet<String>,
    issues: Vec<Issue>,
}

impl<'a, R: ProcessRunner> Orchestrator<'a, R> {
    pub fn new(
        config: &'a RebuildConfig,
        workspace: &'a Workspace,
        runner: &'a R,
        branches: Branches,
        target: Option<RemoteQueue>,
        queue: WorkQueue,
    ) -> Self {
        Self {
            config,
            workspace,
            runner,
            classifier: Classifier::new(),
            store: StatusStore::new(workspace.statuses_dir()),
            branches,
            target,
            queue,
            packages: BTreeMap::new(),
            requeued: HashSet::new(),
            issues: Vec::new(),
        }
    }

    /// Processed packages by name
    pub fn packages(&self) -> &BTreeMap<String, Package> {
        &self.packages
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    /// Target task view, with the assignments made so far
    pub fn target(&self) -> Option<&RemoteQueue> {
        self.target.as_ref()
    }

    /// Process the whole queue and write the run summary
    pub async fn run<P: ProgressSink>(&mut self, progress: &mut P) -> Result<RunReport, RebuildError> {
        if self.config.clean_plant {
            self.clean_plant().await?;
        }
        self.workspace.prepare()?;

        self.process_queue(progress).await?;

        let records = self
            .packages
            .iter()
            .map(|(name, package)| (name.clone(), package.record()))
            .collect();
        StatusStore::write_summary(&self.workspace.summary_file(), &records)?;

        Ok(self.report())
    }

    /// Tally of the processed packages
    pub fn report(&self) -> RunReport {
        let ok = self.packages.values().filter(|p| p.is_matched()).count();
        RunReport {
            ok,
            errored: self.packages.len() - ok,
            issues: self.issues.clone(),
        }
    }

    async fn clean_plant(&mut self) -> Result<(), RebuildError> {
        tracing::info!("Cleaning plant at {}", self.workspace.root().display());
        let spec = CommandSpec::new("hsh")
            .arg("--initroot")
            .arg("-vvvv")
            .args(self.config.hasher_args())
            .log_to(self.workspace.initroot_log(), LogMode::Truncate)
            .timeout(self.config.command_timeout);

        match self.runner.run(&spec).await {
            Ok(output) if output.success() => {}
            Ok(output) => tracing::warn!(
                "Hasher root initialization failed: {}",
                output.last_line().unwrap_or("no output")
            ),
            Err(e) => tracing::warn!("Hasher root initialization failed: {e}"),
        }

        self.workspace.clear_outputs()?;
        Ok(())
    }

    async fn process_queue<P: ProgressSink>(&mut self, progress: &mut P) -> Result<(), RebuildError> {
        while let Some(entry) = self.queue.front().cloned() {
            let name = entry.name.clone();
            progress.package_started(&name);

            if self.config.drop_nonbuilt && entry.pkgname.is_none() {
                tracing::debug!("Dropping recorded status of {name}");
                self.store.discard(&name)?;
            }
            let record = self.store.load(&name)?;

            let ctx = BuildContext {
                config: self.config,
                workspace: self.workspace,
                runner: self.runner,
                classifier: &self.classifier,
                branches: &self.branches,
            };
            let mut package = Package::materialize(entry, record, &ctx)?;
            if !package.is_matched() {
                let force = package.error_type == ErrorType::LostDeps;
                package.reconcile_and_build(force, &ctx).await?;
            }

            if let Some(problem) = package.problem.take() {
                self.issues.push(Issue::new(IssueKind::Build, problem, name.clone()));
            }
            self.store.save(&package.record())?;
            progress.package_finished(&name, package.mark());

            let action = self.post_action(&package).await?;
            tracing::debug!("{name}: {:?} after {}", action, package.error_type);
            let matched = package.is_matched();
            self.packages.insert(name.clone(), package);

            if self.config.break_on_error && !matched && action != PostAction::Requeued {
                tracing::warn!("Stopping after {name}: break on error is set");
                break;
            }
        }
        Ok(())
    }

    async fn post_action(&mut self, package: &Package) -> Result<PostAction, RebuildError> {
        let assigning = self.config.assign || self.config.auto_assign;
        let in_target = self
            .target
            .as_ref()
            .map(|target| target.contains(&package.name));

        if assigning && in_target == Some(false) && package.is_matched() {
            self.assign_matched(package).await?;
            self.queue.pop_front();
            return Ok(PostAction::Assigned);
        }

        if self.config.auto_assign
            && in_target.is_some()
            && package.error_type == ErrorType::LostDeps
            && !package.lost_deps.is_empty()
        {
            let mut requeued = false;
            for dep in &package.lost_deps {
                let outcome = self.requeue_dependency(package, dep).await?;
                tracing::debug!("{}: requeue of {dep}: {outcome:?}", package.name);
                requeued |= outcome == Requeue::Requeued;
            }
            if requeued {
                return Ok(PostAction::Requeued);
            }

            let deps: Vec<String> = package.lost_deps.iter().map(ToString::to_string).collect();
            self.issues.push(Issue::new(
                IssueKind::Build,
                format!("no missing dependency could be requeued: {}", deps.join(", ")),
                package.name.clone(),
            ));
        }

        self.queue.pop_front();
        Ok(PostAction::Advanced)
    }

    /// Assign a finished package to the target task
    ///
    /// A built package is added as is. A package to be deleted is replaced
    /// by its `gem-` counterpart when the target branch has one, then
    /// removed.
    async fn assign_matched(&mut self, package: &Package) -> Result<(), RebuildError> {
        let Some(task_no) = self.target.as_ref().map(RemoteQueue::task_no) else {
            return Ok(());
        };

        if package.has(PackageState::ToDelete) {
            let stripped = package.name.strip_prefix("ruby-").unwrap_or(&package.name);
            let replacement = packetize_name(stripped);
            let listing = self.workspace.branch_listing(&self.branches.target)?;
            if listing.contains(&replacement) {
                self.assign(task_no, &replacement, None).await;
            }

            let control = TaskControl::new(self.config, self.runner);
            if let Err(e) = control.mark_removed(task_no, &package.name).await {
                self.issues
                    .push(Issue::new(IssueKind::Assign, e.to_string(), package.name.clone()));
            }
        } else if package.has(PackageState::Built) {
            self.assign(task_no, &package.name, None).await;
        }
        Ok(())
    }

    /// Add a package to the target task and remember the new subtask
    async fn assign(&mut self, task_no: u64, name: &str, before: Option<u32>) -> Option<AssignedSubtask> {
        let control = TaskControl::new(self.config, self.runner);
        match control
            .assign(task_no, name, before, self.branches.build_mode())
            .await
        {
            Ok(assigned) => {
                if let Some(target) = self.target.as_mut() {
                    let entry = QueueEntry {
                        paths: vec![target.url_for(assigned.ordinal)],
                        tag_name: Some(assigned.tag.clone()),
                        no: Some(assigned.ordinal),
                        fetched_at: Some(Utc::now()),
                        ..QueueEntry::named(name)
                    };
                    target.record_assignment(assigned.ordinal, entry);
                }
                Some(assigned)
            }
            Err(e) => {
                tracing::warn!("Assigning {name} to task {task_no} failed: {e}");
                self.issues
                    .push(Issue::new(IssueKind::Assign, e.to_string(), name.to_string()));
                None
            }
        }
    }

    /// Put a missing dependency of `package` in front of it
    ///
    /// The dependency takes the nearest free ordinal below the package's
    /// own ordinal in the target task. An existing subtask of the dependency
    /// above that slot is deleted first; one at or below it is just
    /// processed again.
    async fn requeue_dependency(&mut self, package: &Package, dep: &LostDep) -> Result<Requeue, RebuildError> {
        let name = dep.package_name();
        if name == package.name {
            self.issues.push(Issue::new(
                IssueKind::Build,
                format!("{} requires its own package {dep}", package.name),
                name,
            ));
            return Ok(Requeue::OwnPackage);
        }
        if !self.requeued.insert(name.clone()) {
            return Ok(Requeue::AlreadyRequeued);
        }

        let listing = self.workspace.branch_listing(&self.branches.target)?;
        if !listing.contains(&name) {
            self.issues.push(Issue::new(
                IssueKind::Assign,
                format!("Required gem {dep} is unavailable"),
                name,
            ));
            return Ok(Requeue::Unavailable);
        }

        let Some(target) = self.target.as_mut() else {
            return Ok(Requeue::Unavailable);
        };
        let task_no = target.task_no();

        let slot = match target.ordinal_of(&package.name) {
            Some(before) => {
                let mut occupied = target.occupied();
                occupied.extend(
                    self.queue
                        .iter()
                        .filter_map(|entry| target.ordinal_of(&entry.name)),
                );
                match allocate_slot(&occupied, before) {
                    Some(slot) => Some(slot),
                    None => {
                        let error = TaskError::NoSpaceAvailable {
                            package: package.name.clone(),
                            ordinal: before,
                        };
                        self.issues.push(Issue::new(
                            IssueKind::Assign,
                            error.to_string(),
                            package.name.clone(),
                        ));
                        return Ok(Requeue::NoSpace);
                    }
                }
            }
            None => None,
        };

        if let Some(existing) = target.ordinal_of(&name) {
            if slot.is_some_and(|slot| existing > slot) {
                let control = TaskControl::new(self.config, self.runner);
                if let Err(e) = control.delete_subtask(task_no, existing).await {
                    self.issues
                        .push(Issue::new(IssueKind::Assign, e.to_string(), name));
                    return Ok(Requeue::Unavailable);
                }
                target.record_deletion(existing);
                self.queue.remove(&name);
            } else {
                if let Some(entry) = target.entry_at(existing) {
                    self.queue.remove(&name);
                    self.queue.push_front(entry);
                }
                return Ok(Requeue::Requeued);
            }
        }

        tracing::info!(
            "Requeueing {name} before {} at {}",
            package.name,
            slot.map_or_else(|| "the end".to_string(), |slot| slot.to_string())
        );
        match self.assign(task_no, &name, slot).await {
            Some(assigned) => {
                if let Some(entry) = self
                    .target
                    .as_ref()
                    .and_then(|target| target.entry_at(assigned.ordinal))
                {
                    self.queue.push_front(entry);
                }
                Ok(Requeue::Requeued)
            }
            None => Ok(Requeue::Unavailable),
        }
    }

    /// Install the produced binary packages into the hasher chroot
    ///
    /// Skipped under break-on-error when any package failed. A list too
    /// long for the command line falls back to the repository wildcard.
    pub async fn install(&mut self) -> Result<InstallOutcome, RebuildError> {
        let report = self.report();
        if self.config.break_on_error && !self.packages.is_empty() && report.errored > 0 {
            tracing::info!("Skipping install: {} packages errored", report.errored);
            return Ok(InstallOutcome::Skipped);
        }

        let names: Vec<String> = self
            .packages
            .values()
            .flat_map(Package::rpm_names)
            .filter(|name| !crate::core::artifacts::is_debuginfo(name))
            .collect();
        if names.is_empty() {
            return Ok(InstallOutcome::Skipped);
        }

        let install = |args: Vec<String>| {
            CommandSpec::new("hsh-install")
                .args(self.config.hasher_args())
                .args(args)
                .log_to(self.workspace.install_log(), LogMode::Truncate)
                .timeout(self.config.command_timeout)
        };

        tracing::info!("hsh-install {}", names.join(" "));
        let count = names.len();
        let result = match self.runner.run(&install(names)).await {
            Err(ProcessError::ArgumentListTooLong { .. }) => {
                let glob = self.workspace.hasher_rpms_glob(&self.config.arch);
                tracing::info!("Argument list too long, installing {}", glob.display());
                self.runner
                    .run(&install(vec![glob.display().to_string()]))
                    .await
            }
            other => other,
        };

        let failure = match result {
            Ok(output) if output.success() => return Ok(InstallOutcome::Installed { packages: count }),
            Ok(output) => output
                .last_line()
                .unwrap_or("hsh-install failed")
                .to_string(),
            Err(e) => e.to_string(),
        };
        self.issues.push(Issue {
            kind: IssueKind::Install,
            message: failure,
            entity: None,
        });
        Ok(InstallOutcome::Failed)
    }
}
