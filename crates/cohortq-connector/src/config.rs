//! Configuration loading from TOML and environment variables.
//!
//! The connector reads its configuration from:
//! 1. A TOML config file (default: config/cohortq.toml)
//! 2. Environment variables (override TOML values)
//!
//! Environment variable prefix: COHORTQ_

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level connector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Configuration sync actor settings.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Where the queue and cohort topology comes from.
    #[serde(default)]
    pub topology: TopologyConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cohortq_quota=debug").
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output JSON-formatted logs.
    #[serde(default)]
    pub json_format: bool,
}

/// Configuration sync actor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the inbound event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Maximum number of events parked while waiting for their parent.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Interval in seconds between status log lines. 0 disables them.
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

/// Topology source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyConfig {
    /// Path to the topology TOML file.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Interval in seconds between checks of the topology file for
    /// changes. 0 loads it once.
    #[serde(default)]
    pub reload_interval_secs: u64,
}

// -- Defaults --

fn default_log_level() -> String {
    "info".to_string()
}
fn default_channel_capacity() -> usize {
    cohortq_protocol::DEFAULT_EVENT_CHANNEL_CAPACITY
}
fn default_max_pending() -> usize {
    cohortq_protocol::DEFAULT_MAX_PENDING_EVENTS
}
fn default_status_interval() -> u64 {
    60
}

// -- Trait impls --

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_pending: default_max_pending(),
            status_interval_secs: default_status_interval(),
        }
    }
}

impl ConnectorConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)?;
        let config: ConnectorConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file, with environment variable overrides.
    ///
    /// A missing file is not an error: defaults are used and a warning logged.
    pub fn load(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut config = if let Some(path) = path {
            if path.exists() {
                Self::from_file(path)?
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not found, using defaults"
                );
                Self::default()
            }
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply overrides looked up through `var`, which maps a full variable
    /// name (e.g. `COHORTQ_LOG_LEVEL`) to its value.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let key = |name: &str| format!("{}{}", cohortq_protocol::ENV_PREFIX, name);

        if let Some(val) = var(&key("LOG_LEVEL")) {
            self.logging.level = val;
        }
        if let Some(val) = var(&key("LOG_JSON")) {
            self.logging.json_format = val == "true" || val == "1";
        }
        if let Some(val) = var(&key("TOPOLOGY")) {
            self.topology.path = Some(PathBuf::from(val));
        }
        if let Some(val) = var(&key("TOPOLOGY_RELOAD_INTERVAL")) {
            if let Ok(secs) = val.parse() {
                self.topology.reload_interval_secs = secs;
            }
        }
        if let Some(val) = var(&key("SYNC_MAX_PENDING")) {
            if let Ok(n) = val.parse() {
                self.sync.max_pending = n;
            }
        }
        if let Some(val) = var(&key("SYNC_CHANNEL_CAPACITY")) {
            if let Ok(n) = val.parse() {
                self.sync.channel_capacity = n;
            }
        }
        if let Some(val) = var(&key("STATUS_INTERVAL")) {
            if let Ok(secs) = val.parse() {
                self.sync.status_interval_secs = secs;
            }
        }
    }
}
