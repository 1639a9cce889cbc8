use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::{debug, info};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_MAX_CONCURRENT_CLIENTS: usize = 100;
pub const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 10;
pub const DEFAULT_REDIRECT_PROB: f64 = 0.3;
pub const DEFAULT_LOG_PATH: &str = "logs/events.jsonl";
pub const DEFAULT_APP_LOG_PATH: &str = "logs/app.log";
pub const DEFAULT_READ_LIMIT_BYTES: usize = 4096;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Application configuration structure that defines all runtime parameters.
///
/// Every field is a command-line flag that falls back to an environment variable and then to
/// a built-in default, through the `clap` derive macro. The same structure can be loaded from
/// a TOML file with [`Config::from_file`], in which case missing keys take the same defaults.
///
/// Values are range-checked by [`Config::validate`], which must be called before any
/// component is built from the configuration.
///
/// # Examples
///
/// ```
/// use ruche::configuration::config::Config;
///
/// let config = Config::default();
/// assert!(config.validate().is_ok());
/// assert_eq!(config.services().len(), 3);
/// ```
#[derive(Parser, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Network address every listener binds to.
    #[arg(long, env = "BIND_ADDRESS", default_value = DEFAULT_BIND_ADDRESS)]
    pub bind_address: String,

    /// Port of the SSH-like banner listener, `0` disables it.
    #[arg(long, env = "SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,

    /// Port of the HTTP listener, `0` disables it.
    #[arg(long, env = "HTTP_PORT", default_value_t = DEFAULT_HTTP_PORT)]
    pub http_port: u16,

    /// Port of the HTTPS listener (served as plaintext HTTP), `0` disables it.
    #[arg(long, env = "HTTPS_PORT", default_value_t = DEFAULT_HTTPS_PORT)]
    pub https_port: u16,

    /// Maximum number of concurrent sessions across all listeners.
    ///
    /// Connections arriving while every slot is taken are closed immediately.
    #[arg(long, env = "MAX_CONCURRENT_CLIENTS", default_value_t = DEFAULT_MAX_CONCURRENT_CLIENTS)]
    pub max_concurrent_clients: usize,

    /// Connections admitted per source IP and per minute, `0` disables rate limiting.
    #[arg(long, env = "RATE_LIMIT_PER_MIN", default_value_t = DEFAULT_RATE_LIMIT_PER_MIN)]
    pub rate_limit_per_min: u32,

    /// Probability in `[0, 1]` that an HTTP request is answered with a redirect.
    #[arg(long, env = "RESPOND_WITH_REDIRECT_PROB", default_value_t = DEFAULT_REDIRECT_PROB)]
    pub respond_with_redirect_prob: f64,

    /// Append target of the JSONL event log.
    #[arg(long, env = "LOG_PATH", default_value = DEFAULT_LOG_PATH)]
    pub log_path: PathBuf,

    /// Maximum number of bytes read from a single connection.
    #[arg(long, env = "READ_LIMIT_BYTES", default_value_t = DEFAULT_READ_LIMIT_BYTES)]
    pub read_limit_bytes: usize,

    /// Time budget, in milliseconds, for reading a connection's payload.
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    pub read_timeout_ms: u64,

    /// How long shutdown waits for in-flight sessions before giving up on them.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,

    /// Port of the read-only dashboard. The dashboard is not started when unset.
    #[arg(long, env = "DASHBOARD_PORT")]
    pub dashboard_port: Option<u16>,

    /// Size-rotated copy of the operational log.
    #[arg(long, env = "APP_LOG_PATH", default_value = DEFAULT_APP_LOG_PATH)]
    pub app_log_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            max_concurrent_clients: DEFAULT_MAX_CONCURRENT_CLIENTS,
            rate_limit_per_min: DEFAULT_RATE_LIMIT_PER_MIN,
            respond_with_redirect_prob: DEFAULT_REDIRECT_PROB,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            read_limit_bytes: DEFAULT_READ_LIMIT_BYTES,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            dashboard_port: None,
            app_log_path: PathBuf::from(DEFAULT_APP_LOG_PATH),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file. Keys are the field names of [`Config`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration file {}", path.display());
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Checks every value against its valid range.
    ///
    /// The returned error names the offending setting by its environment variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_ip()?;

        if self.max_concurrent_clients < 1 {
            return Err(ConfigError::NotInRange(format!(
                "MAX_CONCURRENT_CLIENTS must be >= 1, got {}",
                self.max_concurrent_clients
            )));
        }

        if !(0.0..=1.0).contains(&self.respond_with_redirect_prob) {
            return Err(ConfigError::NotInRange(format!(
                "RESPOND_WITH_REDIRECT_PROB must be within [0, 1], got {}",
                self.respond_with_redirect_prob
            )));
        }

        if self.read_limit_bytes < 1 {
            return Err(ConfigError::NotInRange(format!(
                "READ_LIMIT_BYTES must be >= 1, got {}",
                self.read_limit_bytes
            )));
        }

        if self.read_timeout_ms < 1 {
            return Err(ConfigError::NotInRange(format!(
                "READ_TIMEOUT_MS must be >= 1, got {}",
                self.read_timeout_ms
            )));
        }

        if self.log_path.as_os_str().is_empty() {
            return Err(ConfigError::NotInRange(
                "LOG_PATH must not be empty".to_string(),
            ));
        }

        if self.app_log_path.as_os_str().is_empty() {
            return Err(ConfigError::NotInRange(
                "APP_LOG_PATH must not be empty".to_string(),
            ));
        }

        if self.services().is_empty() {
            return Err(ConfigError::ServicesEmpty(
                "SSH_PORT, HTTP_PORT and HTTPS_PORT are all disabled".to_string(),
            ));
        }

        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, ConfigError> {
        self.bind_address.parse().map_err(|_| {
            ConfigError::BadIPFormatting(format!(
                "BIND_ADDRESS is not an IP address: {:?}",
                self.bind_address
            ))
        })
    }

    /// Enabled services, one per non-zero port.
    pub fn services(&self) -> Vec<ServiceConfig> {
        [
            (Protocol::SSH, self.ssh_port),
            (Protocol::HTTP, self.http_port),
            (Protocol::HTTPS, self.https_port),
        ]
        .into_iter()
        .filter(|(_, port)| *port != 0)
        .map(|(protocol, port)| ServiceConfig::new(protocol, port))
        .collect()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Creates the parent directory of the event log if needed.
    pub fn ensure_log_directory(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.log_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("Created log directory {}", parent.display());
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn from_args_under_test(args: &[&str]) -> Result<Config, clap::Error> {
        let mut argv = vec!["ruche"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv)
    }
}
