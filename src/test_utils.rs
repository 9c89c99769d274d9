//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    /// Generate a source package name (lowercase alphanumeric with hyphens)
    pub fn package_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,30}[a-z0-9]?".prop_filter("Name must not be empty", |s| !s.is_empty())
    }

    /// Generate a gem name as found in build logs
    pub fn gem_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9_.-]{0,20}"
    }

    /// Generate a set of occupied task ordinals
    pub fn ordinal_set() -> impl Strategy<Value = BTreeSet<u32>> {
        proptest::collection::btree_set(1u32..64, 0..32)
    }

    /// Generate one build log line, sometimes carrying a known marker
    pub fn log_line() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-zA-Z0-9 :./-]{0,60}",
            Just("E: Some index files failed to download. They have been ignored".to_string()),
            Just("fatal: repository 'https://example/gears/f/foo.git/' not found".to_string()),
            (gem_name(), "[0-9]{1,2}\\.[0-9]{1,2}").prop_map(|(name, version)| {
                format!("gem-x-1.0-alt1.noarch: Требует: gem({name}) (>={version})")
            }),
            gem_name().prop_map(|name| format!("E: Невозможно найти пакет gem({name})")),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_package_name_generator(name in package_name()) {
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }

        #[test]
        fn test_ordinal_set_generator(set in ordinal_set()) {
            prop_assert!(set.iter().all(|no| *no >= 1));
        }

        #[test]
        fn test_log_line_generator(line in log_line()) {
            prop_assert!(!line.contains('\n'));
        }
    }
}
