//! Platform-specific directory management
//!
//! Provides the default plant directory and the config file location.
//!
//! Environment variables can override default directories:
//! - `GEAR_REBUILD_CONFIG_DIR` - Override config directory
//! - `GEAR_REBUILD_PLANT_DIR` - Override default plant directory

use std::env;
use std::path::PathBuf;

use crate::config::defaults;

/// Environment variable names for directory overrides
pub const ENV_CONFIG_DIR: &str = "GEAR_REBUILD_CONFIG_DIR";
pub const ENV_PLANT_DIR: &str = "GEAR_REBUILD_PLANT_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "gear-rebuild";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct AppDirs {
    config_dir: PathBuf,
    plant_dir: PathBuf,
}

impl AppDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
            plant_dir: Self::resolve_plant_dir(),
        }
    }

    /// Config directory (`$XDG_CONFIG_HOME/gear-rebuild` on Linux)
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Default plant directory (`~/plant`)
    #[must_use]
    pub fn plant_dir(&self) -> PathBuf {
        self.plant_dir.clone()
    }

    /// Path of the config file
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }

    fn resolve_plant_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_PLANT_DIR) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(defaults::DEFAULT_PLANT_DIR_NAME)
    }
}

impl Default for AppDirs {
    fn default() -> Self {
        Self::new()
    }
}
