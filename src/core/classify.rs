//! Build log classification
//!
//! Maps raw build output to an [`ErrorType`] through a versioned table of
//! compiled patterns, and extracts missing gem requirements from
//! `lost_deps` logs. Markers are checked in table order; the first rule
//! that matches anywhere in the log decides the type.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, OnceLock};

/// Version of the rule table, bump whenever a pattern changes
pub const RULESET_VERSION: u32 = 1;

/// Classification of a build log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Built
    Ok,
    /// Index metadata download failed, retried
    LostIndeces,
    /// Source repository does not exist
    NotExist,
    /// Build dependencies are missing
    LostDeps,
    /// Nothing built yet
    Unbuilt,
    /// Non-zero exit without a recognized marker
    UnknownError,
}

impl ErrorType {
    /// Whether another build attempt may succeed without any change
    pub fn is_transient(self) -> bool {
        self == Self::LostIndeces
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::LostIndeces => "lost_indeces",
            Self::NotExist => "not_exist",
            Self::LostDeps => "lost_deps",
            Self::Unbuilt => "unbuilt",
            Self::UnknownError => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A missing gem requirement found in a build log
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LostDep {
    /// Gem name as written in the log
    pub name: String,
    /// Comparison operator, `=` when the log has none
    pub operator: String,
    /// Required version, may be empty
    pub version: String,
}

impl LostDep {
    pub fn new(name: impl Into<String>, operator: Option<&str>, version: Option<&str>) -> Self {
        Self {
            name: name.into(),
            operator: operator
                .map(str::trim)
                .filter(|op| !op.is_empty())
                .unwrap_or("=")
                .to_string(),
            version: version.map(str::trim).unwrap_or_default().to_string(),
        }
    }

    /// Source package name providing this gem
    pub fn package_name(&self) -> String {
        packetize_name(&self.name)
    }
}

impl fmt::Display for LostDep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "gem({})", self.name)
        } else {
            write!(f, "gem({}) {} {}", self.name, self.operator, self.version)
        }
    }
}

/// Canonical source package name of a gem
///
/// Lower-cased, runs of `_` and `.` become `-`, prefixed with `gem-`.
pub fn packetize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len() + 4);
    normalized.push_str("gem-");
    let mut in_separator = false;
    for c in name.chars() {
        if c == '_' || c == '.' {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    normalized
}

/// One entry of the rule table
#[derive(Debug)]
pub struct Rule {
    pub kind: ErrorType,
    pub pattern: Regex,
}

const RULE_SOURCES: &[(ErrorType, &str)] = &[
    (
        ErrorType::LostIndeces,
        r"E: Some index files failed to download\. ",
    ),
    (
        ErrorType::NotExist,
        r"fatal: remote error: access denied or repository not exported",
    ),
    (ErrorType::NotExist, r"fatal: repository '.*' not found"),
    (
        ErrorType::LostDeps,
        r"E: Невозможно найти пакет (?:ruby-?)?gem\((?P<name>[^ )]+)\)(?:(?P<cond>[>=<~!]+)(?P<version>[^']*))?",
    ),
    (
        ErrorType::LostDeps,
        r"E: Версия (?P<cond>[>=<~!]+)'(?P<version>[^']*)' для '(?:ruby-?)?gem\((?P<name>[^ ']+)\)' не найдена",
    ),
    (
        ErrorType::LostDeps,
        r"Требует: gem\((?P<name>[^ )]+)\) \((?P<cond>[>=<~!]+)\s*(?P<version>[^')]*)\)",
    ),
];

/// The compiled rule table, in match priority order
pub fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        RULE_SOURCES
            .iter()
            .map(|(kind, source)| Rule {
                kind: *kind,
                pattern: Regex::new(source).expect("rule patterns are valid"),
            })
            .collect()
    })
}

/// What the log text alone says
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogVerdict {
    marker: Option<ErrorType>,
    lost_deps: Vec<LostDep>,
}

impl LogVerdict {
    fn scan(log: &str) -> Self {
        let marker = rules()
            .iter()
            .find(|rule| rule.pattern.is_match(log))
            .map(|rule| rule.kind);

        let lost_deps = if marker == Some(ErrorType::LostDeps) {
            extract_lost_deps(log)
        } else {
            Vec::new()
        };

        Self { marker, lost_deps }
    }
}

/// Missing gem requirements, one per matching line, without duplicates
pub fn extract_lost_deps(log: &str) -> Vec<LostDep> {
    let dep_rules: Vec<&Rule> = rules()
        .iter()
        .filter(|rule| rule.kind == ErrorType::LostDeps)
        .collect();

    let mut deps: Vec<LostDep> = Vec::new();
    for line in log.lines() {
        let Some(caps) = dep_rules.iter().find_map(|rule| rule.pattern.captures(line)) else {
            continue;
        };
        let Some(name) = caps.name("name") else {
            continue;
        };
        let dep = LostDep::new(
            name.as_str(),
            caps.name("cond").map(|m| m.as_str()),
            caps.name("version").map(|m| m.as_str()),
        );
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    deps
}

/// Result of classifying one build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub error_type: ErrorType,
    pub lost_deps: Vec<LostDep>,
}

/// Log classifier caching verdicts per distinct log text
#[derive(Debug, Default)]
pub struct Classifier {
    cache: Mutex<HashMap<String, LogVerdict>>,
}

impl Classifier {
    pub fn new() -> Self {
        tracing::debug!(
            "Classifier rule table v{RULESET_VERSION}, {} rules",
            rules().len()
        );
        Self::default()
    }

    /// Classify a build
    ///
    /// A recognized marker decides the type. Otherwise a missing log means
    /// `unbuilt`, a built package is `ok`, a positive exit status is
    /// `unknown_error` and anything else is `unbuilt`.
    pub fn classify(&self, log: Option<&str>, built: bool, status: Option<i32>) -> Classification {
        let Some(log) = log else {
            return Classification {
                error_type: ErrorType::Unbuilt,
                lost_deps: Vec::new(),
            };
        };

        let verdict = self.verdict(log);
        let error_type = match verdict.marker {
            Some(marker) => marker,
            None if built => ErrorType::Ok,
            None if status.is_some_and(|s| s > 0) => ErrorType::UnknownError,
            None => ErrorType::Unbuilt,
        };

        Classification {
            error_type,
            lost_deps: verdict.lost_deps,
        }
    }

    /// Marker type of a log, ignoring build facts
    pub fn marker(&self, log: &str) -> Option<ErrorType> {
        self.verdict(log).marker
    }

    fn verdict(&self, log: &str) -> LogVerdict {
        if let Ok(cache) = self.cache.lock() {
            if let Some(verdict) = cache.get(log) {
                return verdict.clone();
            }
        }

        let verdict = LogVerdict::scan(log);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(log.to_string(), verdict.clone());
        }
        verdict
    }

    /// Number of distinct logs seen
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|cache| cache.len()).unwrap_or(0)
    }
}
