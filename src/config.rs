use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GateError, Result};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "cfg/config.yaml";

/// Prefix for environment overrides, e.g. `REVIEWER__CACHE__ENABLE=false`
pub const ENV_PREFIX: &str = "REVIEWER";

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Deadline for one admission check, cache round trips included.
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            admission_timeout_ms: default_admission_timeout(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Fixed-window admission settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Zero or negative disables enforcement.
    #[serde(default = "default_requests_per_window", alias = "requests")]
    pub requests_per_window: i64,
    #[serde(default = "default_window_size", alias = "window_size")]
    pub window_size_seconds: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_requests_per_window(),
            window_size_seconds: default_window_size(),
        }
    }
}

impl RateLimiterConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_size_seconds)
    }
}

/// Counter cache backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_backend")]
    pub backend: CacheBackend,
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Expiry for keys bootstrapped by increment/decrement.
    #[serde(default = "default_ttl", alias = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Entry bound for the in-memory backend.
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            backend: default_backend(),
            servers: default_servers(),
            default_ttl_seconds: default_ttl(),
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_admission_timeout() -> u64 {
    2000
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_requests_per_window() -> i64 {
    30
}

fn default_window_size() -> u64 {
    60
}

fn default_backend() -> CacheBackend {
    CacheBackend::Redis
}

fn default_servers() -> Vec<String> {
    vec!["redis://127.0.0.1:6379".to_string()]
}

fn default_ttl() -> u64 {
    300
}

fn default_key_prefix() -> String {
    "reviewer".to_string()
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_max_capacity() -> u64 {
    100_000
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file layered under `REVIEWER__*` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cache.servers"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the path in `CONFIG_PATH`, or the default location
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load(&path)
    }

    /// Parse configuration from a YAML string, without environment overrides
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AppConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GateError::Config(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot run
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiter.enabled && self.rate_limiter.window_size_seconds == 0 {
            return Err(GateError::Config(
                "rate_limiter.window_size_seconds must be greater than zero".to_string(),
            ));
        }

        if self.cache.enable
            && self.cache.backend == CacheBackend::Redis
            && self.cache.servers.is_empty()
        {
            return Err(GateError::Config(
                "cache.servers must list at least one server".to_string(),
            ));
        }

        if !self.metrics.path.starts_with('/') {
            return Err(GateError::Config(format!(
                "metrics.path must start with '/': {}",
                self.metrics.path
            )));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(GateError::Config(format!(
                "logging.format must be 'text' or 'json': {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}
