//! Configuration loading for clusterdrive.
//!
//! Configuration is loaded from a TOML file (default: `clusterdrive.toml`).
//! Every section and field is optional.

use clusterdrive_core::{NodeType, RetryConfig, UnitTable, DEFAULT_CNI_OPERATOR_PREFIX};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "clusterdrive.toml";

/// Root configuration for clusterdrive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// SSH credentials and connection settings.
    #[serde(default)]
    pub ssh: SshConfig,
    /// Retry policy for `exec --retry`.
    #[serde(default)]
    pub retry: RetrySection,
    /// Retry policy for service actions.
    #[serde(default)]
    pub service: ServiceSection,
    /// Readiness watch settings.
    #[serde(default)]
    pub readiness: ReadinessSection,
    /// Extra or overriding product-to-unit entries.
    #[serde(default)]
    pub units: Vec<UnitEntry>,
}

/// SSH configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// Remote user.
    #[serde(default)]
    pub user: String,
    /// Private key path.
    pub key_path: Option<PathBuf>,
    /// Port for hosts given without one (default: 22).
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// General retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    /// Maximum attempts (default: 5).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Delay before the second attempt in milliseconds (default: 5000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Backoff factor (default: 1.5).
    #[serde(default = "default_delay_multiplier")]
    pub delay_multiplier: f64,
    /// Exit statuses worth retrying (default: 255).
    #[serde(default = "default_retryable_exit_codes")]
    pub retryable_exit_codes: Vec<i32>,
    /// Error text marking a failure as transient.
    #[serde(default = "default_retryable_error_substrings")]
    pub retryable_error_substrings: Vec<String>,
    /// Error text that stops retrying immediately.
    #[serde(default = "default_non_retryable_error_substrings")]
    pub non_retryable_error_substrings: Vec<String>,
    /// Overall bound in seconds. Derived from the schedule when unset.
    pub timeout_secs: Option<u64>,
}

/// Service action retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSection {
    /// Attempts for retried actions (default: 5).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Fixed delay between attempts in seconds (default: 5).
    #[serde(default = "default_service_delay_secs")]
    pub delay_secs: u64,
}

/// Readiness watch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSection {
    /// Watch timeout in seconds (default: 300).
    #[serde(default = "default_readiness_timeout_secs")]
    pub timeout_secs: u64,
    /// Re-list interval when watching is unavailable (default: 5).
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// CNI operator pod prefix (default: `cilium-operator`).
    #[serde(default = "default_cni_operator_prefix")]
    pub cni_operator_prefix: String,
}

/// One product-to-unit mapping.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitEntry {
    /// Product name, e.g. `k3s`.
    pub product: String,
    /// Node role.
    pub node_type: NodeType,
    /// systemd unit name.
    pub unit: String,
}

// Default value functions
fn default_ssh_port() -> u16 {
    clusterdrive_core::DEFAULT_SSH_PORT
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_attempts() -> u32 {
    5
}

fn default_delay_ms() -> u64 {
    5000
}

fn default_delay_multiplier() -> f64 {
    1.5
}

fn default_retryable_exit_codes() -> Vec<i32> {
    RetryConfig::default().retryable_exit_codes
}

fn default_retryable_error_substrings() -> Vec<String> {
    RetryConfig::default().retryable_error_substrings
}

fn default_non_retryable_error_substrings() -> Vec<String> {
    RetryConfig::default().non_retryable_error_substrings
}

fn default_service_delay_secs() -> u64 {
    5
}

fn default_readiness_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_cni_operator_prefix() -> String {
    DEFAULT_CNI_OPERATOR_PREFIX.to_string()
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: String::new(),
            key_path: None,
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
            delay_multiplier: default_delay_multiplier(),
            retryable_exit_codes: default_retryable_exit_codes(),
            retryable_error_substrings: default_retryable_error_substrings(),
            non_retryable_error_substrings: default_non_retryable_error_substrings(),
            timeout_secs: None,
        }
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_service_delay_secs(),
        }
    }
}

impl Default for ReadinessSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_readiness_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            cni_operator_prefix: default_cni_operator_prefix(),
        }
    }
}

impl RetrySection {
    /// Build the retry engine configuration.
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            attempts: self.attempts,
            delay: Duration::from_millis(self.delay_ms),
            delay_multiplier: self.delay_multiplier,
            retryable_exit_codes: self.retryable_exit_codes.clone(),
            retryable_error_substrings: self.retryable_error_substrings.clone(),
            non_retryable_error_substrings: self.non_retryable_error_substrings.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            ..RetryConfig::default()
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path` if given, else the default file if it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Built-in unit table with the configured entries applied on top.
    pub fn unit_table(&self) -> UnitTable {
        let mut table = UnitTable::default();
        for entry in &self.units {
            table.insert(&entry.product, entry.node_type, &entry.unit);
        }
        table
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
