//! Session configuration
//!
//! Loaded from `config.toml` in the platform config directory
//! (`~/.config/vesselcast/` on Linux) or from an explicit path. A missing file
//! means defaults; a file that exists but does not parse is an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::data::{Granularity, Package, PackageSelection, METEOBLUE_BASE_URL};
use crate::forecast::EngineConfig;

/// Error types for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("Invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A package list names something the provider does not offer
    #[error("Unknown {granularity} package '{name}'. Valid packages: basic, wind, sea, solar, trend, clouds")]
    UnknownPackage { name: String, granularity: Granularity },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Enabled package names per granularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackagesConfig {
    pub hourly: Vec<String>,
    pub daily: Vec<String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            hourly: vec!["basic".to_string(), "wind".to_string(), "sea".to_string()],
            daily: vec!["basic".to_string()],
        }
    }
}

/// Vesselcast configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Provider API key
    pub api_key: String,
    /// Provider base URL
    pub base_url: String,
    /// Time-based refresh interval
    pub interval_minutes: u64,
    /// Hourly records per package, and hours predicted ahead when moving
    pub max_forecast_hours: u32,
    /// Daily records per package
    pub max_forecast_days: u32,
    /// Speed above which the vessel counts as moving
    pub speed_threshold_knots: f64,
    /// Engage moving forecasts automatically above the threshold
    pub auto_enable_moving: bool,
    /// Delay between per-hour fetches
    pub request_pacing_ms: u64,
    /// Timeout for each provider request
    pub request_timeout_secs: u64,
    pub packages: PackagesConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: METEOBLUE_BASE_URL.to_string(),
            interval_minutes: 60,
            max_forecast_hours: 12,
            max_forecast_days: 7,
            speed_threshold_knots: 1.0,
            auto_enable_moving: false,
            request_pacing_ms: 1000,
            request_timeout_secs: 30,
            packages: PackagesConfig::default(),
        }
    }
}

impl Config {
    /// Default config file location, if a home directory can be determined
    pub fn default_path() -> Option<PathBuf> {
        let project_dirs = ProjectDirs::from("", "", "vesselcast")?;
        Some(project_dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, or from the default location when `None`
    ///
    /// # Returns
    /// * `Ok(Config)` - Parsed and validated config, or defaults when no file exists
    /// * `Err(ConfigError)` - If the file is unreadable, malformed or names unknown packages
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load_from_path(&path),
            None => {
                debug!("no config directory available, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load from a specific file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;

        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Reject package names the provider does not offer
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.selection().map(|_| ())
    }

    /// Enabled (package, granularity) pairs
    pub fn selection(&self) -> Result<PackageSelection, ConfigError> {
        let mut pairs = Vec::new();
        for (names, granularity) in [
            (&self.packages.hourly, Granularity::Hourly),
            (&self.packages.daily, Granularity::Daily),
        ] {
            for name in names {
                let package = Package::from_str(name).ok_or_else(|| ConfigError::UnknownPackage {
                    name: name.clone(),
                    granularity,
                })?;
                pairs.push((package, granularity));
            }
        }
        Ok(PackageSelection::new(pairs))
    }

    /// Engine settings derived from this config
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        Ok(EngineConfig {
            selection: self.selection()?,
            interval_minutes: self.interval_minutes,
            max_forecast_hours: self.max_forecast_hours,
            max_forecast_days: self.max_forecast_days,
            speed_threshold_knots: self.speed_threshold_knots,
            auto_enable_moving: self.auto_enable_moving,
            pacing: Duration::from_millis(self.request_pacing_ms),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
