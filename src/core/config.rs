//! Run configuration
//!
//! [`RebuildConfig`] is built once per run and handed by reference to every
//! component. Values come from, in priority order, command-line overrides,
//! the TOML config file and built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{defaults, urls};
use crate::error::ConfigError;
use crate::infra::dirs::AppDirs;
use crate::task::control::BuildMode;

/// Immutable configuration of one rebuild run
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildConfig {
    /// Root of the plant (scratch, logs, artifact stores, statuses)
    pub plant_dir: PathBuf,
    /// Hasher working root, relocation paths are resolved against it
    pub hasher_root: PathBuf,
    /// Root of the mirrored branch repositories
    pub repo_base_path: PathBuf,
    /// Target architecture
    pub arch: String,
    /// Git host
    pub host: String,
    /// Base URL for task descriptors
    pub task_info_url: String,
    /// Target task number
    pub task_no: Option<u64>,
    /// Source task numbers, sorted
    pub source_task_noes: Vec<u64>,
    /// Static list of package names
    pub list_file: Option<PathBuf>,
    /// Configured source branch
    pub in_branch: String,
    /// Configured target branch
    pub to_branch: Option<String>,
    pub clean_plant: bool,
    pub break_on_error: bool,
    pub assign: bool,
    pub auto_assign: bool,
    pub drop_nonbuilt: bool,
    /// Hasher config file passed as `--config=`
    pub hasher_config: Option<PathBuf>,
    /// ssh target accepting `task` commands
    pub control_host: String,
    pub control_port: u16,
    /// Timeout for git, ssh and install calls
    pub command_timeout: Duration,
    /// Timeout for one build tool invocation
    pub build_timeout: Duration,
    /// Upper bound of build tool invocations while the log is transient
    pub max_build_attempts: u32,
    /// Initial delay between transient retries
    pub retry_base_delay: Duration,
}

impl RebuildConfig {
    /// Configuration with defaults rooted at the given plant directory
    pub fn with_plant_dir(plant_dir: impl Into<PathBuf>) -> Self {
        let plant_dir = plant_dir.into();
        Self {
            hasher_root: default_hasher_root(&plant_dir),
            plant_dir,
            repo_base_path: PathBuf::from(defaults::DEFAULT_REPO_BASE_PATH),
            arch: host_arch(),
            host: defaults::DEFAULT_HOST.to_string(),
            task_info_url: urls::task_info_base(defaults::DEFAULT_HOST),
            task_no: None,
            source_task_noes: Vec::new(),
            list_file: None,
            in_branch: defaults::DEFAULT_IN_BRANCH.to_string(),
            to_branch: None,
            clean_plant: false,
            break_on_error: false,
            assign: false,
            auto_assign: false,
            drop_nonbuilt: false,
            hasher_config: None,
            control_host: defaults::DEFAULT_CONTROL_HOST.to_string(),
            control_port: defaults::DEFAULT_CONTROL_PORT,
            command_timeout: Duration::from_secs(defaults::COMMAND_TIMEOUT_SECS),
            build_timeout: Duration::from_secs(defaults::BUILD_TIMEOUT_SECS),
            max_build_attempts: defaults::MAX_BUILD_ATTEMPTS,
            retry_base_delay: Duration::from_millis(defaults::RETRY_BASE_DELAY_MS),
        }
    }

    /// Resolve the configuration from file settings and command-line overrides
    pub fn resolve(
        file: FileConfig,
        overrides: ConfigOverrides,
        dirs: &AppDirs,
    ) -> Result<Self, ConfigError> {
        let plant_dir = overrides
            .plant_dir
            .or(file.paths.plant_dir)
            .unwrap_or_else(|| dirs.plant_dir());
        let mut config = Self::with_plant_dir(plant_dir);

        if let Some(root) = overrides.hasher_root.or(file.paths.hasher_root) {
            config.hasher_root = root;
        }
        if let Some(base) = overrides.repo_base_path.or(file.paths.repo_base_path) {
            config.repo_base_path = base;
        }
        if let Some(arch) = overrides.arch.or(file.build.arch) {
            config.arch = arch;
        }
        if let Some(host) = overrides.host.or(file.remote.host) {
            config.task_info_url = urls::task_info_base(&host);
            config.host = host;
        }
        if let Some(url) = file.remote.task_info_url {
            config.task_info_url = url.trim_end_matches('/').to_string();
        }
        if let Some(branch) = overrides.in_branch.or(file.remote.in_branch) {
            config.in_branch = branch;
        }
        config.to_branch = overrides.to_branch.or(file.remote.to_branch);
        config.task_no = overrides.task_no;
        config.source_task_noes = overrides.source_task_noes;
        config.source_task_noes.sort_unstable();
        config.list_file = overrides.list_file;

        config.clean_plant = overrides.clean_plant.unwrap_or(false);
        config.break_on_error = overrides
            .break_on_error
            .or(file.build.break_on_error)
            .unwrap_or(false);
        config.assign = overrides.assign.unwrap_or(false);
        config.auto_assign = overrides.auto_assign.unwrap_or(false);
        config.drop_nonbuilt = overrides
            .drop_nonbuilt
            .or(file.build.drop_nonbuilt)
            .unwrap_or(false);

        config.hasher_config = overrides.hasher_config.or(file.build.hasher_config);
        if let Some(host) = file.control.host {
            config.control_host = host;
        }
        if let Some(port) = file.control.port {
            config.control_port = port;
        }

        if let Some(secs) = overrides.command_timeout_secs.or(file.build.command_timeout_secs) {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = overrides.build_timeout_secs.or(file.build.build_timeout_secs) {
            config.build_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = overrides
            .max_build_attempts
            .or(file.build.max_build_attempts)
        {
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "max_build_attempts".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.max_build_attempts = attempts;
        }
        if let Some(ms) = file.build.retry_base_delay_ms {
            config.retry_base_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Extra arguments for every hasher invocation
    pub fn hasher_args(&self) -> Vec<String> {
        self.hasher_config
            .iter()
            .map(|path| format!("--config={}", path.display()))
            .collect()
    }

    /// Base URL for relative gear paths
    pub fn git_host(&self) -> String {
        urls::git_host(&self.host)
    }

    /// Base URL for task gear repositories
    pub fn gitery_host(&self) -> String {
        urls::gitery_host(&self.host)
    }

    /// ssh destination plus port arguments for task control
    pub fn control_ssh_args(&self) -> Vec<String> {
        vec![
            self.control_host.clone(),
            "-p".to_string(),
            self.control_port.to_string(),
        ]
    }
}

/// Source and target branches of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branches {
    /// Branch packages come from
    pub source: String,
    /// Branch packages are built for
    pub target: String,
}

impl Branches {
    /// Resolve the branches
    ///
    /// The source branch is the first source task's branch, else the
    /// configured one. The target branch is the configured one, else the
    /// target task's branch, else the source branch.
    pub fn resolve(
        config: &RebuildConfig,
        target_repo: Option<&str>,
        source_repos: &[Option<String>],
    ) -> Self {
        let source = source_repos
            .iter()
            .flatten()
            .next()
            .cloned()
            .unwrap_or_else(|| config.in_branch.clone());
        let target = config
            .to_branch
            .clone()
            .or_else(|| target_repo.map(str::to_string))
            .unwrap_or_else(|| source.clone());
        Self { source, target }
    }

    /// `copy` across branches, `rebuild` within one
    pub fn build_mode(&self) -> BuildMode {
        if self.source == self.target {
            BuildMode::Rebuild
        } else {
            BuildMode::Copy
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub plant_dir: Option<PathBuf>,
    pub hasher_root: Option<PathBuf>,
    pub repo_base_path: Option<PathBuf>,
    pub arch: Option<String>,
    pub host: Option<String>,
    pub task_no: Option<u64>,
    pub source_task_noes: Vec<u64>,
    pub list_file: Option<PathBuf>,
    pub in_branch: Option<String>,
    pub to_branch: Option<String>,
    pub clean_plant: Option<bool>,
    pub break_on_error: Option<bool>,
    pub assign: Option<bool>,
    pub auto_assign: Option<bool>,
    pub drop_nonbuilt: Option<bool>,
    pub hasher_config: Option<PathBuf>,
    pub command_timeout_secs: Option<u64>,
    pub build_timeout_secs: Option<u64>,
    pub max_build_attempts: Option<u32>,
}

/// TOML config file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub build: BuildConfig,
}

/// Directory settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    pub plant_dir: Option<PathBuf>,
    pub hasher_root: Option<PathBuf>,
    pub repo_base_path: Option<PathBuf>,
}

/// Git host and branch settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub host: Option<String>,
    pub task_info_url: Option<String>,
    pub in_branch: Option<String>,
    pub to_branch: Option<String>,
}

/// Task control endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ControlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Build behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildConfig {
    pub arch: Option<String>,
    pub hasher_config: Option<PathBuf>,
    pub break_on_error: Option<bool>,
    pub drop_nonbuilt: Option<bool>,
    pub command_timeout_secs: Option<u64>,
    pub build_timeout_secs: Option<u64>,
    pub max_build_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
}

impl FileConfig {
    /// Load from a path; a missing file yields the defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }
}

/// Hasher root when none is configured: `$TMP`, else the plant
fn default_hasher_root(plant_dir: &Path) -> PathBuf {
    std::env::var_os("TMP").map_or_else(|| plant_dir.to_path_buf(), PathBuf::from)
}

/// Hasher name of the host architecture
fn host_arch() -> String {
    match std::env::consts::ARCH {
        "x86" => "i586".to_string(),
        arch => arch.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RebuildConfig::with_plant_dir("/plant");
        assert_eq!(config.in_branch, "sisyphus");
        assert_eq!(config.control_port, 222);
        assert_eq!(config.max_build_attempts, defaults::MAX_BUILD_ATTEMPTS);
        assert!(config.hasher_args().is_empty());
        assert_eq!(config.git_host(), "https://git.altlinux.org/");
        assert_eq!(config.gitery_host(), "git://git.altlinux.org/");
    }

    #[test]
    fn test_hasher_args_with_config() {
        let mut config = RebuildConfig::with_plant_dir("/plant");
        config.hasher_config = Some(PathBuf::from("/plant/config/hasher.conf"));
        assert_eq!(
            config.hasher_args(),
            vec!["--config=/plant/config/hasher.conf".to_string()]
        );
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file: FileConfig = toml::from_str(
            r#"
            [paths]
            plant_dir = "/from/file"

            [remote]
            in_branch = "p10"
            to_branch = "p11"

            [build]
            max_build_attempts = 7
            break_on_error = true
            "#,
        )
        .unwrap();
        let overrides = ConfigOverrides {
            plant_dir: Some(PathBuf::from("/from/cli")),
            to_branch: Some("c10f2".to_string()),
            source_task_noes: vec![30, 10, 20],
            ..Default::default()
        };

        let config = RebuildConfig::resolve(file, overrides, &AppDirs::new()).unwrap();

        assert_eq!(config.plant_dir, PathBuf::from("/from/cli"));
        assert_eq!(config.in_branch, "p10");
        assert_eq!(config.to_branch.as_deref(), Some("c10f2"));
        assert_eq!(config.max_build_attempts, 7);
        assert!(config.break_on_error);
        assert_eq!(config.source_task_noes, vec![10, 20, 30]);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let overrides = ConfigOverrides {
            max_build_attempts: Some(0),
            ..Default::default()
        };
        let result = RebuildConfig::resolve(FileConfig::default(), overrides, &AppDirs::new());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_host_changes_task_info_url() {
        let overrides = ConfigOverrides {
            host: Some("git.example.org".to_string()),
            ..Default::default()
        };
        let config =
            RebuildConfig::resolve(FileConfig::default(), overrides, &AppDirs::new()).unwrap();
        assert_eq!(config.task_info_url, "https://git.example.org");
    }

    #[test]
    fn test_branches_resolution() {
        let mut config = RebuildConfig::with_plant_dir("/plant");

        let branches = Branches::resolve(&config, None, &[]);
        assert_eq!(branches.source, "sisyphus");
        assert_eq!(branches.target, "sisyphus");
        assert_eq!(branches.build_mode(), BuildMode::Rebuild);

        let branches = Branches::resolve(&config, Some("p10"), &[None, Some("p11".to_string())]);
        assert_eq!(branches.source, "p11");
        assert_eq!(branches.target, "p10");
        assert_eq!(branches.build_mode(), BuildMode::Copy);

        config.to_branch = Some("c10f2".to_string());
        let branches = Branches::resolve(&config, Some("p10"), &[]);
        assert_eq!(branches.target, "c10f2");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let temp = TempDir::new().unwrap();
        let config = FileConfig::load_from_path(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config, FileConfig::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[build\nnot toml").unwrap();

        let result = FileConfig::load_from_path(&path);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
