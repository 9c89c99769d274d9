//! Persisted per-package status
//!
//! One TOML file per package under `<plant>/statuses/<name>.toml`, written
//! after every processing step. A run restarted from scratch reads these
//! records back and derives the same states without rebuilding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::core::classify::{ErrorType, LostDep};
use crate::core::package::PackageState;
use crate::error::StatusError;
use crate::infra::filesystem;

/// Serialized snapshot of one package
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub srpms: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rpms: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,

    /// Ordinal in the remote queue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkgname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuild_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,

    /// Exit status of the last build
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,

    #[serde(default)]
    pub states: BTreeSet<PackageState>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lost_deps: Vec<LostDep>,
}

/// Directory of status records
#[derive(Debug, Clone)]
pub struct StatusStore {
    dir: PathBuf,
}

impl StatusStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Record file of a package
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.toml"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path(name).is_file()
    }

    /// Load the record of a package
    ///
    /// A record that cannot be parsed is reported and treated as absent.
    pub fn load(&self, name: &str) -> Result<Option<StatusRecord>, StatusError> {
        let path = self.path(name);
        let Some(content) = filesystem::read_optional(&path)? else {
            return Ok(None);
        };

        match toml::from_str::<StatusRecord>(&content) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!("Ignoring unreadable status '{}': {e}", path.display());
                Ok(None)
            }
        }
    }

    /// Write the record of a package
    pub fn save(&self, record: &StatusRecord) -> Result<(), StatusError> {
        let content = toml::to_string_pretty(record).map_err(|e| StatusError::Serialize {
            name: record.name.clone(),
            error: e.to_string(),
        })?;
        filesystem::write_file(&self.path(&record.name), &content)?;
        Ok(())
    }

    /// Forget a package
    pub fn discard(&self, name: &str) -> Result<(), StatusError> {
        filesystem::remove_file(&self.path(name))?;
        Ok(())
    }

    /// Write all records of a run into one summary file
    pub fn write_summary(
        path: &Path,
        records: &BTreeMap<String, StatusRecord>,
    ) -> Result<(), StatusError> {
        let content = toml::to_string_pretty(records).map_err(|e| StatusError::Serialize {
            name: path.display().to_string(),
            error: e.to_string(),
        })?;
        filesystem::write_file(path, &content)?;
        Ok(())
    }
}
