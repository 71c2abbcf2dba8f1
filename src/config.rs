use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bus::RouterSettings;

pub const CONFIG_PATH_ENV: &str = "PLAYWATCH_CONFIG";
const ENV_PREFIX: &str = "PLAYWATCH_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// WebSocket listener for live push connections.
    #[serde(default = "default_push_addr")]
    pub push_addr: SocketAddr,
    /// Line-delimited JSON control listener.
    #[serde(default = "default_control_addr")]
    pub control_addr: SocketAddr,
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_push_send_timeout_ms")]
    pub push_send_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_log_retention_secs")]
    pub log_retention_secs: u64,
    /// SQLite file for the envelope log; in-memory when unset.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_push_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8001))
}

fn default_control_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8100))
}

fn default_max_queue_depth() -> usize {
    1000
}

fn default_max_in_flight() -> usize {
    256
}

fn default_push_send_timeout_ms() -> u64 {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_log_retention_secs() -> u64 {
    7 * 24 * 3600
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            push_addr: default_push_addr(),
            control_addr: default_control_addr(),
            max_queue_depth: default_max_queue_depth(),
            max_in_flight: default_max_in_flight(),
            push_send_timeout_ms: default_push_send_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            log_retention_secs: default_log_retention_secs(),
            db_path: None,
        }
    }
}

impl RelayConfig {
    /// Load from `PLAYWATCH_CONFIG` (if set), then apply `PLAYWATCH_*`
    /// overrides from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Override fields from `PLAYWATCH_<FIELD>` variables found by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |field: &str| {
            let key = format!("{ENV_PREFIX}{}", field.to_ascii_uppercase());
            lookup(&key).map(|value| (key, value.trim().to_string()))
        };

        if let Some((key, value)) = var("push_addr") {
            self.push_addr = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("control_addr") {
            self.control_addr = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("max_queue_depth") {
            self.max_queue_depth = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("max_in_flight") {
            self.max_in_flight = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("push_send_timeout_ms") {
            self.push_send_timeout_ms = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("idle_timeout_secs") {
            self.idle_timeout_secs = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("sweep_interval_secs") {
            self.sweep_interval_secs = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = var("log_retention_secs") {
            self.log_retention_secs = parse_value(&key, &value)?;
        }
        if let Some((_, value)) = var("db_path") {
            self.db_path = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_depth == 0 {
            return Err(ConfigError::Invalid("max_queue_depth must be at least 1".to_string()));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max_in_flight must be at least 1".to_string()));
        }
        if self.push_send_timeout_ms == 0 {
            return Err(ConfigError::Invalid("push_send_timeout_ms must be positive".to_string()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".to_string()));
        }
        if self.push_addr.port() != 0 && self.push_addr == self.control_addr {
            return Err(ConfigError::Invalid(format!(
                "push_addr and control_addr are both {}",
                self.push_addr
            )));
        }
        Ok(())
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            max_queue_depth: self.max_queue_depth,
            max_in_flight: self.max_in_flight,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        }
    }

    pub fn push_send_timeout(&self) -> Duration {
        Duration::from_millis(self.push_send_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn log_retention(&self) -> Duration {
        Duration::from_secs(self.log_retention_secs)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
