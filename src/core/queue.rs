//! Work queue
//!
//! Ordered, double-ended sequence of queue entries keyed by package name.
//! The head stays in place while it is processed; the orchestrator either
//! pops it or pushes dependencies in front of it.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

use crate::infra::workspace::package_name_of;

/// Descriptor of one package to process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub name: String,
    /// Candidate fetch locations, absolute URLs or paths on the git host
    pub paths: Vec<String>,
    pub tag_name: Option<String>,
    pub tag_id: Option<String>,
    /// Ordinal in the remote queue
    pub no: Option<u32>,
    /// Set when the remote queue knew the package before this run
    pub pkgname: Option<String>,
    pub rebuild_from: Option<String>,
    /// Absent means the package is to be deleted
    pub fetched_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Entry with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: Vec::new(),
            tag_name: None,
            tag_id: None,
            no: None,
            pkgname: None,
            rebuild_from: None,
            fetched_at: None,
        }
    }

    /// Entry for a package named in the static list
    ///
    /// Sources are looked up in the gears tree first, then in srpms, both
    /// sharded by the first character of the name.
    pub fn from_list_name(name: &str, now: DateTime<Utc>) -> Self {
        let shard: String = name.chars().take(1).collect();
        Self {
            paths: vec![
                format!("/gears/{shard}/{name}.git"),
                format!("/srpms/{shard}/{name}.git"),
            ],
            fetched_at: Some(now),
            ..Self::named(name)
        }
    }
}

/// Package names of a list file
///
/// One name per line; `name-version-release` lines are reduced to the name.
/// Blank lines and `#` comments are skipped, repeated names kept once.
pub fn parse_list(content: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let name = package_name_of(line).unwrap_or(line);
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Double-ended work queue
#[derive(Debug, Clone, Default)]
pub struct WorkQueue {
    entries: VecDeque<QueueEntry>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from remote entries followed by list names
    ///
    /// A later remote entry replaces an earlier one of the same name in
    /// place. List names already present remotely are skipped, so remote
    /// data always wins.
    pub fn seed<I>(remote: I, list: &[String], now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = QueueEntry>,
    {
        let mut entries: Vec<QueueEntry> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for entry in remote {
            match index.get(&entry.name) {
                Some(&at) => entries[at] = entry,
                None => {
                    index.insert(entry.name.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        for name in list {
            if !index.contains_key(name) {
                index.insert(name.clone(), entries.len());
                entries.push(QueueEntry::from_list_name(name, now));
            }
        }

        Self {
            entries: entries.into(),
        }
    }

    pub fn front(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        self.entries.pop_front()
    }

    /// Schedule an entry before everything else
    pub fn push_front(&mut self, entry: QueueEntry) {
        self.entries.push_front(entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Drop every waiting entry of a package
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|entry| entry.name != name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::generators::package_name;
    use proptest::prelude::*;

    fn remote(name: &str, no: u32) -> QueueEntry {
        QueueEntry {
            paths: vec![format!("git://host/tasks/1/gears/{no:o}/git")],
            no: Some(no),
            tag_name: Some(format!("{name}-tag")),
            fetched_at: Some(Utc::now()),
            ..QueueEntry::named(name)
        }
    }

    #[test]
    fn test_list_entry_paths() {
        let entry = QueueEntry::from_list_name("gem-foo", Utc::now());
        assert_eq!(
            entry.paths,
            vec!["/gears/g/gem-foo.git".to_string(), "/srpms/g/gem-foo.git".to_string()]
        );
        assert!(entry.fetched_at.is_some());
        assert_eq!(entry.no, None);
    }

    #[test]
    fn test_parse_list() {
        let content = "# packages\ngem-foo\n\ngem-bar-1.2-alt1\n  gem-baz  \ngem-foo\n";
        assert_eq!(parse_list(content), vec!["gem-foo", "gem-bar", "gem-baz"]);
    }

    #[test]
    fn test_seed_order_and_precedence() {
        let list = vec!["b".to_string(), "c".to_string(), "a".to_string()];
        let queue = WorkQueue::seed([remote("a", 2), remote("b", 3)], &list, Utc::now());

        let names: Vec<&str> = queue.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(queue.front().unwrap().no, Some(2));
    }

    #[test]
    fn test_later_remote_entry_replaces_in_place() {
        let queue = WorkQueue::seed([remote("a", 2), remote("b", 3), remote("a", 9)], &[], Utc::now());

        let entries: Vec<(&str, Option<u32>)> =
            queue.iter().map(|e| (e.name.as_str(), e.no)).collect();
        assert_eq!(entries, vec![("a", Some(9)), ("b", Some(3))]);
    }

    #[test]
    fn test_push_front_and_remove() {
        let mut queue = WorkQueue::seed([remote("a", 4), remote("b", 5)], &[], Utc::now());
        queue.push_front(remote("dep", 3));

        assert_eq!(queue.front().unwrap().name, "dep");
        queue.remove("b");
        assert!(!queue.contains("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().unwrap().name, "dep");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A list entry never overrides a remote entry of the same name
        #[test]
        fn prop_remote_entries_win(
            names in proptest::collection::btree_set(package_name(), 1..10),
            listed in proptest::collection::vec(any::<bool>(), 10),
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let remote_entries: Vec<QueueEntry> = names
                .iter()
                .enumerate()
                .map(|(i, n)| remote(n, u32::try_from(i).unwrap() + 2))
                .collect();
            let list: Vec<String> = names
                .iter()
                .zip(listed.iter())
                .filter(|(_, l)| **l)
                .map(|(n, _)| n.clone())
                .collect();

            let queue = WorkQueue::seed(remote_entries.clone(), &list, Utc::now());

            prop_assert_eq!(queue.len(), names.len());
            for (entry, expected) in queue.iter().zip(remote_entries.iter()) {
                prop_assert_eq!(entry, expected);
            }
        }
    }
}
