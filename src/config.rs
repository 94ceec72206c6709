use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const SERVER_URL_ENV: &str = "MONITOR_SERVER_URL";
pub const CLIENT_ID_ENV: &str = "CLIENT_ID";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub thresholds: ThresholdsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rehydrate_on_start")]
    pub rehydrate_on_start: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NetworkConfig {
    /// Pins the sampled interface instead of picking the first non-loopback one.
    #[serde(default)]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: f64,
    #[serde(default = "default_memory_percent")]
    pub memory_percent: f64,
    #[serde(default = "default_network_bytes_per_interval")]
    pub network_bytes_per_interval: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            client_id: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            rehydrate_on_start: default_rehydrate_on_start(),
        }
    }
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            network_bytes_per_interval: default_network_bytes_per_interval(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
    #[error("no usable network interface: {0}")]
    NoInterface(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let mut cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.apply_env_overrides(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment values win over the file when they are non-empty.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty(SERVER_URL_ENV) {
            self.monitor.server_url = url;
        }
        if let Some(id) = non_empty(CLIENT_ID_ENV) {
            self.monitor.client_id = id;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_monitor(&self.monitor)?;
        validate_thresholds(&self.thresholds)?;

        if let Some(iface) = &self.network.interface {
            if iface.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "network.interface must not be blank when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_monitor(cfg: &MonitorConfig) -> Result<(), ConfigError> {
    let url = cfg.server_url.trim();
    if url.is_empty() {
        return Err(ConfigError::Validation(format!(
            "monitor.server_url is required (or set {SERVER_URL_ENV})"
        )));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "monitor.server_url must start with http:// or https://".to_string(),
        ));
    }
    if cfg.client_id.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "monitor.client_id is required (or set {CLIENT_ID_ENV})"
        )));
    }
    if cfg.client_id.contains('/') {
        return Err(ConfigError::Validation(
            "monitor.client_id must not contain '/'".to_string(),
        ));
    }
    if cfg.request_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "monitor.request_timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_thresholds(cfg: &ThresholdsConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&cfg.cpu_percent) {
        return Err(ConfigError::Validation(
            "thresholds.cpu_percent must be in 0..100".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&cfg.memory_percent) {
        return Err(ConfigError::Validation(
            "thresholds.memory_percent must be in 0..100".to_string(),
        ));
    }
    if cfg.network_bytes_per_interval == 0 {
        return Err(ConfigError::Validation(
            "thresholds.network_bytes_per_interval must be > 0".to_string(),
        ));
    }
    Ok(())
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

const fn default_rehydrate_on_start() -> bool {
    true
}

const fn default_cpu_percent() -> f64 {
    80.0
}

const fn default_memory_percent() -> f64 {
    80.0
}

const fn default_network_bytes_per_interval() -> u64 {
    2 * 1024 * 1024
}
