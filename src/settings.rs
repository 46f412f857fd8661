//! Application settings using Figment.
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. `moku-conf.toml` in the working directory (or a file given explicitly)
//! 3. Environment variables prefixed with `MOKUCONF_`
//!
//! ```text
//! MOKUCONF_LOG_LEVEL=debug
//! MOKUCONF_DEFAULT_MODE=interactive
//! MOKUCONF_CACHE_FILE=/srv/moku/device_cache.json
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::DeviceCache;
use crate::error::{MokuError, MokuResult};
use crate::policy::ReconcileMode;
use crate::retrieve::ReadLevel;

/// Default settings file name.
pub const SETTINGS_FILE: &str = "moku-conf.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MOKUCONF_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Device cache location
    pub cache_file: PathBuf,
    /// Directory holding simulated device state files
    pub state_dir: PathBuf,
    /// Reconciliation mode used when `--mode` is not given
    pub default_mode: ReconcileMode,
    /// Read level used when `--level` is not given
    pub read_level: ReadLevel,
}

impl Default for AppSettings {
    fn default() -> Self {
        let cache_file = DeviceCache::default_path();
        let state_dir = cache_file
            .parent()
            .map(|dir| dir.join("devices"))
            .unwrap_or_else(|| PathBuf::from("devices"));
        Self {
            log_level: "info".to_string(),
            cache_file,
            state_dir,
            default_mode: ReconcileMode::default(),
            read_level: ReadLevel::default(),
        }
    }
}

impl AppSettings {
    /// Load from `moku-conf.toml` and the environment.
    pub fn load() -> MokuResult<Self> {
        Self::load_from(SETTINGS_FILE)
    }

    /// Load using `path` as the settings file. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// `MokuError::Settings` when a layer cannot be parsed, and
    /// `MokuError::SettingsValidation` when a value is out of range.
    pub fn load_from<P: AsRef<Path>>(path: P) -> MokuResult<Self> {
        let settings: Self = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppSettings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Checks that the log level is one of trace, debug, info, warn, error.
    pub fn validate(&self) -> MokuResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(MokuError::SettingsValidation(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    /// State file backing the simulated device at `address`.
    pub fn device_state_path(&self, address: &str) -> PathBuf {
        self.state_dir.join(format!("{}.json", address.replace([':', '/'], "_")))
    }
}
