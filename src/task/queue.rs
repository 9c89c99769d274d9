//! Remote queue state and slot allocation
//!
//! The fetched subtasks are never modified. Assignments and deletions made
//! during the run are kept apart and merged at read time.

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use crate::config::urls;
use crate::core::queue::QueueEntry;
use crate::task::info::{SubtaskInfo, TaskInfo};
use crate::task::{format_octal, parse_octal};

/// Find the free ordinal a package must take to build before `before`
///
/// Walks back from `before - 1` over occupied ordinals and returns the first
/// free one. Ordinal 1 is never returned; `None` means there is no room.
pub fn allocate_slot(occupied: &BTreeSet<u32>, before: u32) -> Option<u32> {
    let mut candidate = before.checked_sub(1)?;
    while candidate > 1 && occupied.contains(&candidate) {
        candidate -= 1;
    }
    (candidate > 1).then_some(candidate)
}

fn gear_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^/]+)\.git$").expect("gear dir pattern is valid"))
}

/// Parse a descriptor timestamp, with or without an offset
pub fn parse_fetched(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|t| t.and_utc())
        })
}

/// A numbered remote build task
#[derive(Debug, Clone)]
pub struct RemoteQueue {
    task_no: u64,
    repo: Option<String>,
    archived: bool,
    gitery_host: String,
    fetched: BTreeMap<u32, QueueEntry>,
    assigned: BTreeMap<u32, QueueEntry>,
    deleted: BTreeSet<u32>,
}

impl RemoteQueue {
    /// A task with no subtasks
    pub fn empty(task_no: u64, gitery_host: impl Into<String>) -> Self {
        Self {
            task_no,
            repo: None,
            archived: false,
            gitery_host: gitery_host.into(),
            fetched: BTreeMap::new(),
            assigned: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }

    /// Build from a fetched descriptor
    ///
    /// Subtasks with a key that is not octal or without a package name are
    /// skipped.
    pub fn from_info(task_no: u64, info: &TaskInfo, gitery_host: impl Into<String>) -> Self {
        let mut queue = Self::empty(task_no, gitery_host);
        queue.repo = info.repo.clone();
        queue.archived = info.is_archived();

        for (key, subtask) in &info.subtasks {
            let Some(no) = parse_octal(key) else {
                tracing::warn!(task = task_no, "Skipping subtask with ordinal '{key}'");
                continue;
            };
            if let Some(entry) = queue.entry_from(no, subtask) {
                queue.fetched.insert(no, entry);
            }
        }
        queue
    }

    fn entry_from(&self, no: u32, subtask: &SubtaskInfo) -> Option<QueueEntry> {
        let name = if subtask.is_delete() {
            subtask.package.clone()
        } else {
            subtask.dir.as_deref().and_then(|dir| {
                gear_dir_pattern()
                    .captures(dir)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string())
            })
        }?;

        let fetched_at = subtask.fetched.as_deref().map(|text| {
            parse_fetched(text).unwrap_or_else(|| {
                tracing::warn!(package = %name, "Unparseable fetch time '{text}', using now");
                Utc::now()
            })
        });

        Some(QueueEntry {
            name,
            paths: vec![self.url_for(no)],
            tag_name: subtask.tag_name.clone(),
            tag_id: subtask.tag_id.clone(),
            no: Some(no),
            pkgname: subtask.pkgname.clone().or_else(|| subtask.package.clone()),
            rebuild_from: subtask.rebuild_from.clone(),
            fetched_at,
        })
    }

    pub fn task_no(&self) -> u64 {
        self.task_no
    }

    /// Branch the task builds for
    pub fn repo(&self) -> Option<&str> {
        self.repo.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    /// Gear URL of a subtask
    pub fn url_for(&self, no: u32) -> String {
        let mut url = format!("{}tasks/", self.gitery_host);
        if self.archived {
            url.push_str(&format!("archive/done/_{}/", urls::archive_group(self.task_no)));
        }
        url.push_str(&format!("{}/gears/{}/git", self.task_no, format_octal(no)));
        url
    }

    /// Current subtasks in ordinal order
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.merged().into_values().cloned().collect()
    }

    fn merged(&self) -> BTreeMap<u32, &QueueEntry> {
        self.fetched
            .iter()
            .filter(|(no, _)| !self.deleted.contains(no))
            .chain(self.assigned.iter())
            .map(|(no, entry)| (*no, entry))
            .collect()
    }

    /// Every ordinal in use
    pub fn occupied(&self) -> BTreeSet<u32> {
        self.merged().into_keys().collect()
    }

    /// Ordinal of the subtask building `name`
    pub fn ordinal_of(&self, name: &str) -> Option<u32> {
        self.merged()
            .into_iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(no, _)| no)
    }

    pub fn entry_at(&self, no: u32) -> Option<QueueEntry> {
        self.merged().get(&no).map(|entry| (*entry).clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ordinal_of(name).is_some()
    }

    /// Remember a subtask added during this run
    pub fn record_assignment(&mut self, no: u32, entry: QueueEntry) {
        self.deleted.remove(&no);
        self.assigned.insert(no, entry);
    }

    /// Remember a subtask deleted during this run
    pub fn record_deletion(&mut self, no: u32) {
        self.assigned.remove(&no);
        self.deleted.insert(no);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::generators::ordinal_set;
    use proptest::prelude::*;

    fn info() -> TaskInfo {
        TaskInfo::parse(
            r#"{
                "repo": "p10",
                "subtasks": {
                    "5": {"dir": "/gears/g/gem-foo.git", "tag_name": "1.0-alt1", "fetched": "2024-03-01T12:00:00"},
                    "10": {"dir": "/people/x/packages/gem-bar.git", "pkgname": "gem-bar", "fetched": "2024-03-01T12:00:00+03:00"},
                    "11": {"type": "delete", "package": "gem-old"},
                    "12": {"type": "copy"},
                    "9": {"dir": "/gears/g/gem-bad.git"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_allocate_slot_examples() {
        let occupied: BTreeSet<u32> = [5, 6, 7].into_iter().collect();
        assert_eq!(allocate_slot(&occupied, 8), Some(4));

        let occupied: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert_eq!(allocate_slot(&occupied, 4), None);

        assert_eq!(allocate_slot(&BTreeSet::new(), 2), None);
        assert_eq!(allocate_slot(&BTreeSet::new(), 3), Some(2));
        assert_eq!(allocate_slot(&BTreeSet::new(), 0), None);
    }

    #[test]
    fn test_from_info() {
        let queue = RemoteQueue::from_info(100, &info(), "git://git.altlinux.org/");

        assert_eq!(queue.repo(), Some("p10"));
        let names: Vec<String> = queue.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["gem-foo", "gem-bar", "gem-old"]);
        assert_eq!(queue.occupied(), [5, 8, 9].into_iter().collect());

        let foo = queue.entry_at(5).unwrap();
        assert_eq!(foo.paths, vec!["git://git.altlinux.org/tasks/100/gears/5/git".to_string()]);
        assert_eq!(foo.tag_name.as_deref(), Some("1.0-alt1"));
        assert!(foo.fetched_at.is_some());
        assert_eq!(foo.pkgname, None);

        let old = queue.entry_at(9).unwrap();
        assert_eq!(old.fetched_at, None);
        assert_eq!(old.pkgname.as_deref(), Some("gem-old"));
    }

    #[test]
    fn test_archived_urls() {
        let mut info = info();
        info.state = Some("DONE".to_string());
        let queue = RemoteQueue::from_info(312_345, &info, "git://h/");

        assert_eq!(
            queue.url_for(8),
            "git://h/tasks/archive/done/_310/312345/gears/10/git"
        );
    }

    #[test]
    fn test_assignments_and_deletions() {
        let mut queue = RemoteQueue::from_info(100, &info(), "git://h/");

        queue.record_assignment(4, QueueEntry::named("gem-dep"));
        queue.record_deletion(8);

        assert_eq!(queue.ordinal_of("gem-dep"), Some(4));
        assert!(!queue.contains("gem-bar"));
        assert_eq!(queue.occupied(), [4, 5, 9].into_iter().collect());
    }

    #[test]
    fn test_parse_fetched() {
        assert!(parse_fetched("2024-03-01T12:00:00").is_some());
        assert!(parse_fetched("2024-03-01T12:00:00Z").is_some());
        assert!(parse_fetched("yesterday").is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// The slot is free, below the request and above 1, and everything
        /// between it and the request is occupied
        #[test]
        fn prop_allocate_slot(occupied in ordinal_set(), before in 0u32..70) {
            match allocate_slot(&occupied, before) {
                Some(slot) => {
                    prop_assert!(slot > 1);
                    prop_assert!(slot < before);
                    prop_assert!(!occupied.contains(&slot));
                    for no in slot + 1..before {
                        prop_assert!(occupied.contains(&no));
                    }
                }
                None => {
                    for no in 2..before {
                        prop_assert!(occupied.contains(&no));
                    }
                }
            }
        }
    }
}
