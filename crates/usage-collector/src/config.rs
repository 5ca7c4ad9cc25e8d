use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use usage_metrics::{PriceTable, DEFAULT_UNIT_INTERVAL_ENV};
use usage_poller::{MetricDefinition, PlanError, SchedulerError, DEFAULT_PROBE_TIMEOUT_SECS};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_callback_interval() -> u64 {
    60
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_unit_interval_env() -> String {
    DEFAULT_UNIT_INTERVAL_ENV.to_string()
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            script_dir: None,
            timeout_secs: default_probe_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_callback_interval")]
    pub callback_interval: u64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_unit_interval_env")]
    pub unit_interval_env: String,
    /// Bound on events waiting for the next reduction; unbounded when unset
    #[serde(default)]
    pub max_pending_events: Option<usize>,
    /// Level name -> seconds; replaces the default tier when non-empty
    #[serde(default)]
    pub custom_poll_interval: BTreeMap<String, u64>,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub prices: PriceTable,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            callback_interval: default_callback_interval(),
            initial_delay_ms: default_initial_delay_ms(),
            unit_interval_env: default_unit_interval_env(),
            max_pending_events: None,
            custom_poll_interval: BTreeMap::new(),
            database: None,
            probes: ProbeConfig::default(),
            prices: PriceTable::new(),
            metrics: Vec::new(),
        }
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|error| ConfigError::invalid(key, format!("'{}': {}", value, error)))
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load the file (defaults when it does not exist), apply environment
    /// overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_toml(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            log::warn!(
                "Config file {} not found, using defaults",
                path.display()
            );
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// `POLL_INTERVAL`, `CALLBACK_INTERVAL` and `DB_PATH` override the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("POLL_INTERVAL") {
            self.poll_interval = parse_secs("POLL_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("CALLBACK_INTERVAL") {
            self.callback_interval = parse_secs("CALLBACK_INTERVAL", &value)?;
        }
        if let Some(value) = lookup("DB_PATH") {
            if !value.trim().is_empty() {
                self.database = Some(DatabaseConfig {
                    path: PathBuf::from(value.trim()),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval == 0 {
            return Err(ConfigError::invalid("poll_interval", "must be non-zero"));
        }
        if self.callback_interval == 0 {
            return Err(ConfigError::invalid("callback_interval", "must be non-zero"));
        }
        if self.probes.timeout_secs == 0 {
            return Err(ConfigError::invalid("probes.timeout_secs", "must be non-zero"));
        }
        if self.max_pending_events == Some(0) {
            return Err(ConfigError::invalid("max_pending_events", "must be non-zero"));
        }
        if self.unit_interval_env.trim().is_empty() {
            return Err(ConfigError::invalid("unit_interval_env", "cannot be empty"));
        }
        Ok(())
    }
}
