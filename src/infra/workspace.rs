//! Plant workspace
//!
//! Owns the plant directory layout:
//!
//! ```text
//! <plant>/
//! ├── poligon/      # scratch area, one checkout at a time
//! ├── logs/         # <name>.log per package, install.log, initroot.log
//! ├── srpms/        # relocated source artifacts
//! ├── rpms/         # relocated binary artifacts
//! ├── statuses/     # <name>.toml per package
//! └── common.toml   # run summary
//! ```
//!
//! Also provides branch source listings, read from
//! `<repo_base>/<branch>/files/SRPMS`, used to test whether a package
//! exists in a branch.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use walkdir::WalkDir;

use crate::core::config::RebuildConfig;
use crate::error::WorkspaceError;
use crate::infra::filesystem;

/// Names of the source packages published in one branch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchListing {
    names: HashSet<String>,
}

impl BranchListing {
    /// Build from `name-version-release` file names
    ///
    /// Files whose release does not start with `alt` are ignored.
    pub fn from_filenames<I, S>(filenames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = filenames
            .into_iter()
            .filter_map(|filename| package_name_of(filename.as_ref()).map(str::to_string))
            .collect();
        Self { names }
    }

    /// Whether a package of exactly this name is listed
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Package name of a `name-version-release` file name
pub fn package_name_of(filename: &str) -> Option<&str> {
    let mut parts = filename.rsplitn(3, '-');
    let release = parts.next()?;
    let _version = parts.next()?;
    let name = parts.next()?;
    (release.starts_with("alt") && !name.is_empty()).then_some(name)
}

/// Plant directories and branch listings
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    hasher_root: PathBuf,
    repo_base_path: PathBuf,
    listings: Mutex<HashMap<String, Arc<BranchListing>>>,
}

impl Workspace {
    /// Create a workspace for the configured plant
    pub fn new(config: &RebuildConfig) -> Self {
        Self {
            root: config.plant_dir.clone(),
            hasher_root: config.hasher_root.clone(),
            repo_base_path: config.repo_base_path.clone(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn hasher_root(&self) -> &Path {
        &self.hasher_root
    }

    /// Scratch area for checkouts
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join("poligon")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Store of relocated source artifacts
    pub fn srpms_dir(&self) -> PathBuf {
        self.root.join("srpms")
    }

    /// Store of relocated binary artifacts
    pub fn rpms_dir(&self) -> PathBuf {
        self.root.join("rpms")
    }

    pub fn statuses_dir(&self) -> PathBuf {
        self.root.join("statuses")
    }

    /// Checkout of a package inside the scratch area
    pub fn checkout_dir(&self, name: &str) -> PathBuf {
        self.scratch_dir().join(name)
    }

    /// Build log of a package
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.logs_dir().join(format!("{name}.log"))
    }

    pub fn install_log(&self) -> PathBuf {
        self.logs_dir().join("install.log")
    }

    pub fn initroot_log(&self) -> PathBuf {
        self.logs_dir().join("initroot.log")
    }

    /// Run summary of all package records
    pub fn summary_file(&self) -> PathBuf {
        self.root.join("common.toml")
    }

    /// Wildcard install path used when the argument list is too long
    pub fn hasher_rpms_glob(&self, arch: &str) -> PathBuf {
        self.hasher_root
            .join("repo")
            .join(arch)
            .join("RPMS.hasher")
            .join("*.rpm")
    }

    /// Create every plant directory
    pub fn prepare(&self) -> Result<(), WorkspaceError> {
        for dir in [
            self.scratch_dir(),
            self.logs_dir(),
            self.srpms_dir(),
            self.rpms_dir(),
            self.statuses_dir(),
        ] {
            filesystem::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Destroy and recreate the scratch area
    pub fn reset_scratch(&self) -> Result<(), WorkspaceError> {
        let scratch = self.scratch_dir();
        filesystem::remove_dir_all(&scratch)?;
        filesystem::create_dir_all(&scratch)?;
        Ok(())
    }

    /// Current build log of a package, if any
    pub fn read_log(&self, name: &str) -> Result<Option<String>, WorkspaceError> {
        Ok(filesystem::read_optional(&self.log_file(name))?)
    }

    /// `RPMS.hasher` repository directories under the hasher root
    pub fn hasher_repo_dirs(&self) -> Vec<PathBuf> {
        WalkDir::new(self.hasher_root.join("repo"))
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_dir() && entry.file_name() == "RPMS.hasher")
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Delete hasher repositories, logs, artifact stores and statuses
    ///
    /// The initroot log is kept.
    pub fn clear_outputs(&self) -> Result<(), WorkspaceError> {
        for dir in self.hasher_repo_dirs() {
            filesystem::remove_dir_all(&dir)?;
        }

        let logs = self.logs_dir();
        if logs.exists() {
            let keep = self.initroot_log();
            for entry in WalkDir::new(&logs).min_depth(1).max_depth(1) {
                let Ok(entry) = entry else { continue };
                let path = entry.path();
                if path == keep {
                    continue;
                }
                if entry.file_type().is_dir() {
                    filesystem::remove_dir_all(path)?;
                } else {
                    filesystem::remove_file(path)?;
                }
            }
        }

        for dir in [self.srpms_dir(), self.rpms_dir(), self.statuses_dir()] {
            filesystem::remove_dir_all(&dir)?;
        }
        self.prepare()
    }

    /// Source listing of a branch, read once per run
    pub fn branch_listing(&self, branch: &str) -> Result<Arc<BranchListing>, WorkspaceError> {
        if let Some(listing) = self.cached_listing(branch) {
            return Ok(listing);
        }

        let path = self
            .repo_base_path
            .join(branch)
            .join("files")
            .join("SRPMS");
        let entries = std::fs::read_dir(&path).map_err(|e| WorkspaceError::BranchListing {
            branch: branch.to_string(),
            path: path.clone(),
            error: e.to_string(),
        })?;

        let filenames: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        let listing = Arc::new(BranchListing::from_filenames(filenames));
        tracing::debug!(branch, packages = listing.len(), "loaded branch listing");

        if let Ok(mut listings) = self.listings.lock() {
            listings.insert(branch.to_string(), Arc::clone(&listing));
        }
        Ok(listing)
    }

    fn cached_listing(&self, branch: &str) -> Option<Arc<BranchListing>> {
        self.listings
            .lock()
            .ok()
            .and_then(|listings| listings.get(branch).cloned())
    }
}
