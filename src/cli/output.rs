//! Output formatting and progress indicators
//!
//! Per-package progress lines, the run summary and issue reporting. A
//! spinner runs while a package is being processed; indicatif hides it when
//! stdout is not a terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Write as _;
use std::sync::OnceLock;

use crate::core::orchestrator::{InstallOutcome, Issue, ProgressSink, RunReport};
use crate::core::package::Mark;

/// Version line with the git revision when it is known
pub fn long_version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        let mut version = match option_env!("VERGEN_GIT_SHA") {
            Some(sha) if !sha.is_empty() => format!("{} ({sha})", env!("CARGO_PKG_VERSION")),
            _ => env!("CARGO_PKG_VERSION").to_string(),
        };
        for (label, value) in [
            ("built", option_env!("VERGEN_BUILD_TIMESTAMP")),
            ("target", option_env!("VERGEN_CARGO_TARGET_TRIPLE")),
            ("rustc", option_env!("VERGEN_RUSTC_SEMVER")),
        ] {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                let _ = write!(version, "\n{label}: {value}");
            }
        }
        version
    })
}

/// Create a spinner for operations with unknown duration
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {msg}")
            .expect("Invalid spinner template"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";

    /// Warning prefix (yellow triangle)
    pub const WARNING: &str = "⚠";
}

/// `name...V`
pub fn format_mark(name: &str, mark: Mark) -> String {
    format!("{name}...{}", mark.symbol())
}

pub fn format_summary(report: &RunReport) -> String {
    format!(
        "Compilation summary: ok: {}, errored: {}",
        report.ok, report.errored
    )
}

pub fn format_issue(issue: &Issue) -> String {
    match &issue.entity {
        Some(entity) => format!("{} [{}] {entity}: {}", status::WARNING, issue.kind, issue.message),
        None => format!("{} [{}] {}", status::WARNING, issue.kind, issue.message),
    }
}

/// Prints a mark line per package
#[derive(Debug, Default)]
pub struct ConsoleProgress {
    quiet: bool,
    spinner: Option<ProgressBar>,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            spinner: None,
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn package_started(&mut self, name: &str) {
        if !self.quiet {
            self.spinner = Some(create_spinner(name));
        }
    }

    fn package_finished(&mut self, name: &str, mark: Mark) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if !self.quiet {
            println!("{}", format_mark(name, mark));
        }
    }
}

pub fn print_summary(report: &RunReport) {
    println!("{}", format_summary(report));
}

pub fn print_install(outcome: &InstallOutcome) {
    match outcome {
        InstallOutcome::Installed { packages } => {
            println!("{} Installed {packages} packages", status::SUCCESS);
        }
        InstallOutcome::Failed => eprintln!("{} Install failed", status::ERROR),
        InstallOutcome::Skipped => {}
    }
}

pub fn print_issues(issues: &[Issue]) {
    for issue in issues {
        eprintln!("{}", format_issue(issue));
    }
}

/// Print a fatal error with its cause chain
pub fn display_error(error: &anyhow::Error) {
    eprintln!("error: {error:#}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::orchestrator::IssueKind;

    #[test]
    fn test_format_mark() {
        assert_eq!(format_mark("gem-foo", Mark::Built), "gem-foo...V");
        assert_eq!(format_mark("ruby-old", Mark::ToDelete), "ruby-old...\\");
        assert_eq!(format_mark("gem-bar", Mark::Failed), "gem-bar...X");
    }

    #[test]
    fn test_format_summary() {
        let report = RunReport {
            ok: 3,
            errored: 1,
            issues: Vec::new(),
        };
        assert_eq!(format_summary(&report), "Compilation summary: ok: 3, errored: 1");
    }

    #[test]
    fn test_format_issue() {
        let issue = Issue {
            kind: IssueKind::Assign,
            message: "Required gem foo (>= 1) is unavailable".to_string(),
            entity: Some("gem-foo".to_string()),
        };
        assert_eq!(
            format_issue(&issue),
            "⚠ [assign] gem-foo: Required gem foo (>= 1) is unavailable"
        );
    }

    #[test]
    fn test_long_version_starts_with_package_version() {
        assert!(long_version().starts_with(env!("CARGO_PKG_VERSION")));
    }
}
