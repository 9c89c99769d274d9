//! Build artifact capture
//!
//! The build tool reports every produced package with a relocation line:
//!
//! ```text
//! 'chroot/.out/gem-foo-1.0-alt1.src.rpm' -> 'repo/SRPMS.hasher/gem-foo-1.0-alt1.src.rpm'
//! ```
//!
//! Destinations are resolved against the hasher root, moved into the plant
//! artifact stores and replaced by a symlink to the stored file. Scanning the
//! same log again finds the symlinks and moves nothing.

use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::error::FilesystemError;
use crate::infra::filesystem;
use crate::infra::workspace::Workspace;

/// Artifacts produced by one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    /// Source packages
    pub srpms: Vec<PathBuf>,
    /// Binary packages
    pub rpms: Vec<PathBuf>,
}

fn relocation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"chroot/\.out.* -> '(?P<dest>[^']+)'\s*$").expect("relocation pattern is valid")
    })
}

fn rpm_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<name>[^/]+)-[^-]+-[^-]+\.[^.]+\.rpm$").expect("rpm pattern is valid")
    })
}

/// Destination paths of every relocation line, resolved against the hasher root
pub fn relocation_targets(log: &str, hasher_root: &Path) -> Vec<PathBuf> {
    log.lines()
        .filter_map(|line| relocation_pattern().captures(line))
        .filter_map(|caps| caps.name("dest").map(|m| hasher_root.join(m.as_str())))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Source,
    Binary,
}

fn kind_of(path: &Path) -> Option<Kind> {
    path.components().find_map(|component| match component {
        Component::Normal(part) => {
            let part = part.to_string_lossy();
            if part.starts_with("SRPMS") {
                Some(Kind::Source)
            } else if part.starts_with("RPMS") {
                Some(Kind::Binary)
            } else {
                None
            }
        }
        _ => None,
    })
}

/// Scan a build log and relocate everything it reports
///
/// Only paths that exist after relocation are returned.
pub fn capture(log: &str, workspace: &Workspace) -> Result<Artifacts, FilesystemError> {
    let mut artifacts = Artifacts::default();

    for file in relocation_targets(log, workspace.hasher_root()) {
        let (store, list) = match kind_of(&file) {
            Some(Kind::Source) => (workspace.srpms_dir(), &mut artifacts.srpms),
            Some(Kind::Binary) => (workspace.rpms_dir(), &mut artifacts.rpms),
            None => continue,
        };

        if relocate(&file, &store)? && !list.contains(&file) {
            list.push(file);
        }
    }

    Ok(artifacts)
}

/// Move `file` into `store` and link it back, unless that already happened
///
/// Returns whether `file` resolves to an existing package afterwards.
fn relocate(file: &Path, store: &Path) -> Result<bool, FilesystemError> {
    if filesystem::is_symlink(file) {
        return Ok(file.exists());
    }

    let Some(filename) = file.file_name() else {
        return Ok(false);
    };
    let stored = store.join(filename);

    if file.is_file() {
        filesystem::create_dir_all(store)?;
        filesystem::move_file(file, &stored)?;
    }
    if stored.is_file() && file.parent().is_some_and(Path::is_dir) {
        filesystem::symlink(&stored, file)?;
    }

    Ok(file.exists())
}

/// Package name of an rpm file path
pub fn rpm_name(path: &Path) -> Option<String> {
    let filename = path.file_name()?.to_str()?;
    rpm_pattern()
        .captures(filename)
        .and_then(|caps| caps.name("name"))
        .map(|m| m.as_str().to_string())
}

/// Whether an rpm carries debug information
pub fn is_debuginfo(name: &str) -> bool {
    name.contains("debuginfo")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RebuildConfig;
    use tempfile::TempDir;

    const LOG: &str = "\
building...
'chroot/.out/gem-foo-1.0-alt1.src.rpm' -> 'repo/SRPMS.hasher/gem-foo-1.0-alt1.src.rpm'
'chroot/.out/gem-foo-1.0-alt1.noarch.rpm' -> 'repo/x86_64/RPMS.hasher/gem-foo-1.0-alt1.noarch.rpm'
'chroot/.out/gem-foo-doc-1.0-alt1.noarch.rpm' -> 'repo/x86_64/RPMS.hasher/gem-foo-doc-1.0-alt1.noarch.rpm'
'something/else' -> 'repo/x86_64/RPMS.hasher/ignored.rpm'
";

    fn setup() -> (TempDir, Workspace) {
        let temp = TempDir::new().unwrap();
        let mut config = RebuildConfig::with_plant_dir(temp.path().join("plant"));
        config.hasher_root = temp.path().join("hasher");
        let workspace = Workspace::new(&config);
        workspace.prepare().unwrap();

        let srpms = temp.path().join("hasher/repo/SRPMS.hasher");
        let rpms = temp.path().join("hasher/repo/x86_64/RPMS.hasher");
        std::fs::create_dir_all(&srpms).unwrap();
        std::fs::create_dir_all(&rpms).unwrap();
        std::fs::write(srpms.join("gem-foo-1.0-alt1.src.rpm"), "src").unwrap();
        std::fs::write(rpms.join("gem-foo-1.0-alt1.noarch.rpm"), "bin").unwrap();
        std::fs::write(rpms.join("gem-foo-doc-1.0-alt1.noarch.rpm"), "doc").unwrap();

        (temp, workspace)
    }

    #[test]
    fn test_relocation_targets() {
        let targets = relocation_targets(LOG, Path::new("/h"));
        assert_eq!(targets.len(), 3);
        assert_eq!(
            targets[0],
            PathBuf::from("/h/repo/SRPMS.hasher/gem-foo-1.0-alt1.src.rpm")
        );
    }

    #[test]
    fn test_capture_moves_and_links() {
        let (temp, workspace) = setup();

        let artifacts = capture(LOG, &workspace).unwrap();

        assert_eq!(artifacts.srpms.len(), 1);
        assert_eq!(artifacts.rpms.len(), 2);
        let rpm = &artifacts.rpms[0];
        assert!(filesystem::is_symlink(rpm));
        assert!(workspace.rpms_dir().join("gem-foo-1.0-alt1.noarch.rpm").is_file());
        assert!(workspace.srpms_dir().join("gem-foo-1.0-alt1.src.rpm").is_file());
        assert_eq!(std::fs::read_to_string(rpm).unwrap(), "bin");
        drop(temp);
    }

    #[test]
    fn test_capture_is_idempotent() {
        let (_temp, workspace) = setup();

        let first = capture(LOG, &workspace).unwrap();
        let second = capture(LOG, &workspace).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(workspace.rpms_dir().join("gem-foo-1.0-alt1.noarch.rpm"))
                .unwrap(),
            "bin"
        );
    }

    #[test]
    fn test_capture_skips_missing_files() {
        let temp = TempDir::new().unwrap();
        let mut config = RebuildConfig::with_plant_dir(temp.path().join("plant"));
        config.hasher_root = temp.path().join("hasher");
        let workspace = Workspace::new(&config);

        let artifacts = capture(LOG, &workspace).unwrap();
        assert_eq!(artifacts, Artifacts::default());
    }

    #[test]
    fn test_rpm_name() {
        assert_eq!(
            rpm_name(Path::new(
                "/tmp/repo/x86_64/RPMS.hasher/gem-concurrent-ruby-edge-doc-0.7.2-alt1.noarch.rpm"
            ))
            .as_deref(),
            Some("gem-concurrent-ruby-edge-doc")
        );
        assert_eq!(rpm_name(Path::new("/tmp/not-an-rpm.txt")), None);
        assert!(is_debuginfo("gem-foo-debuginfo"));
    }
}
