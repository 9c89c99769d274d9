//! Task descriptor (`info.json`) model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level task descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInfo {
    /// Branch the task builds for
    pub repo: Option<String>,
    /// Task state, `DONE` once archived
    pub state: Option<String>,
    /// Subtasks keyed by octal ordinal
    pub subtasks: BTreeMap<String, SubtaskInfo>,
}

/// One subtask
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtaskInfo {
    /// Gear path ending in `<name>.git`
    pub dir: Option<String>,
    pub tag_name: Option<String>,
    pub tag_id: Option<String>,
    pub pkgname: Option<String>,
    pub rebuild_from: Option<String>,
    /// Fetch timestamp
    pub fetched: Option<String>,
    /// `delete` for deletion markers
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Package named by a deletion marker
    pub package: Option<String>,
}

impl TaskInfo {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether the task lives in the archive
    pub fn is_archived(&self) -> bool {
        self.state.as_deref() == Some("DONE")
    }
}

impl SubtaskInfo {
    pub fn is_delete(&self) -> bool {
        self.kind.as_deref() == Some("delete")
    }
}
