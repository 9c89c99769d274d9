//! Git operations
//!
//! Clone and checkout run through the `git` command so their output lands in
//! the package build log, where the classifier looks for remote errors.
//! Repository inspection (is it cloned, does the build branch exist, which
//! remote branches are there) uses the gix crate.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::defaults::BUILD_BRANCH;
use crate::infra::process::{CommandSpec, LogMode};

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to open the repository
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },

    /// Failed to list references
    #[error("Failed to list references in '{path}': {error}")]
    References { path: PathBuf, error: String },
}

/// `git clone <url> <name>` run from the scratch directory
pub fn clone_command(
    url: &str,
    name: &str,
    scratch: &Path,
    log: &Path,
    timeout: Duration,
) -> CommandSpec {
    CommandSpec::new("git")
        .args(["clone", url, name])
        .current_dir(scratch)
        .log_to(log, LogMode::Append)
        .timeout(timeout)
}

/// Create the local build branch, at the tag when one is known
pub fn checkout_command(
    tag: Option<&str>,
    checkout: &Path,
    log: &Path,
    timeout: Duration,
) -> CommandSpec {
    let spec = CommandSpec::new("git").arg("checkout");
    let spec = match tag {
        Some(tag) => spec.args([tag, "-b", BUILD_BRANCH]),
        None => spec.args(["-b", BUILD_BRANCH]),
    };
    spec.current_dir(checkout)
        .log_to(log, LogMode::Append)
        .timeout(timeout)
}

/// Latest tag reachable from `origin/<branch>`
pub fn describe_command(branch: &str, checkout: &Path, timeout: Duration) -> CommandSpec {
    CommandSpec::new("git")
        .args(["describe", "--tags", "--abbrev=0"])
        .arg(format!("origin/{branch}"))
        .current_dir(checkout)
        .timeout(timeout)
}

/// Read-only view of a package checkout
#[derive(Debug, Clone)]
pub struct GitCheckout {
    path: PathBuf,
}

impl GitCheckout {
    /// Inspect the checkout at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the checkout
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<gix::Repository, GitError> {
        gix::open(&self.path).map_err(|e| GitError::InvalidRepository {
            path: self.path.clone(),
            error: e.to_string(),
        })
    }

    /// Whether a repository with valid metadata exists at the path
    pub fn is_cloned(&self) -> bool {
        self.open().is_ok()
    }

    /// Whether the local build branch exists
    pub fn has_build_branch(&self) -> bool {
        self.has_local_branch(BUILD_BRANCH)
    }

    /// Whether `refs/heads/<branch>` exists
    pub fn has_local_branch(&self, branch: &str) -> bool {
        self.open()
            .map(|repo| {
                repo.find_reference(format!("refs/heads/{branch}").as_str())
                    .is_ok()
            })
            .unwrap_or(false)
    }

    /// Branch names under `refs/remotes/origin`, without `HEAD`
    pub fn remote_branches(&self) -> Result<Vec<String>, GitError> {
        let repo = self.open()?;
        let references_error = |e: &dyn std::fmt::Display| GitError::References {
            path: self.path.clone(),
            error: e.to_string(),
        };

        let platform = repo.references().map_err(|e| references_error(&e))?;
        let remotes = platform.remote_branches().map_err(|e| references_error(&e))?;

        let mut branches = Vec::new();
        for reference in remotes {
            let reference = reference.map_err(|e| references_error(&e))?;
            let full = reference.name().as_bstr().to_string();
            if let Some(branch) = full.strip_prefix("refs/remotes/origin/") {
                if branch != "HEAD" {
                    branches.push(branch.to_string());
                }
            }
        }
        Ok(branches)
    }
}
