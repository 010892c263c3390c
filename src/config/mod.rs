//! Configuration module for Throttle Uploadr
//!
//! Handles the optional YAML configuration file (with environment variable
//! expansion), command-line overrides, and the immutable [`TransferRequest`]
//! that drives a single upload run.

use crate::s3::Dialect;
use crate::target::{RemoteTarget, TargetError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Default upload rate in KiB/s.
pub const DEFAULT_UPLOAD_KBPS: u64 = 125_000;

/// Default overall timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

/// Default copy chunk size, the same buffer size a plain `io::copy` uses.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid remote location: {0}")]
    Target(#[from] TargetError),
}

/// Main configuration structure
///
/// Every section is optional in the file; missing sections fall back to
/// their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let transfer = &self.transfer;

        if transfer.upload_kbps == 0 {
            return Err(ConfigError::ValidationError(
                "Upload rate must be at least 1 KiB/s".into(),
            ));
        }

        if transfer.upload_kbps.checked_mul(1024).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "Upload rate {} KiB/s is too large",
                transfer.upload_kbps
            )));
        }

        if transfer.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Timeout must be at least 1 second".into(),
            ));
        }

        if transfer.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "Chunk size cannot be zero".into(),
            ));
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid storage endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.storage.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Storage region cannot be empty".into(),
            ));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    other
                )))
            }
        }

        Ok(())
    }
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Object storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Endpoint URL. Defaults to the public endpoint of the selected dialect.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            access_key: None,
            secret_key: None,
            session_token: None,
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl StorageConfig {
    /// Endpoint to use for the given dialect
    pub fn endpoint_for(&self, dialect: Dialect) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| dialect.default_endpoint(&self.region))
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

/// Transfer tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upload rate in KiB/s
    #[serde(default = "default_upload_kbps")]
    pub upload_kbps: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_kbps: default_upload_kbps(),
            timeout_seconds: default_timeout_seconds(),
            chunk_size: default_chunk_size(),
        }
    }
}

fn default_upload_kbps() -> u64 {
    DEFAULT_UPLOAD_KBPS
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
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

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here when the run ends
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

// ============================================================================
// Transfer Request
// ============================================================================

/// Everything a single upload run needs, resolved once and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    local_path: String,
    target: RemoteTarget,
    rate_bytes_per_sec: u64,
    timeout: Duration,
    chunk_size: usize,
}

impl TransferRequest {
    /// Resolve a transfer request from the two positional arguments and the
    /// effective transfer settings.
    pub fn new(
        local_path: impl Into<String>,
        remote: &str,
        transfer: &TransferConfig,
    ) -> Result<Self, ConfigError> {
        let rate_bytes_per_sec = transfer
            .upload_kbps
            .checked_mul(1024)
            .filter(|rate| *rate > 0)
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Invalid upload rate {} KiB/s",
                    transfer.upload_kbps
                ))
            })?;

        if transfer.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "Timeout must be at least 1 second".into(),
            ));
        }

        if transfer.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "Chunk size cannot be zero".into(),
            ));
        }

        let local_path = local_path.into();
        let target = RemoteTarget::parse(remote)?;
        target.checked_object_key(&local_path)?;

        Ok(Self {
            local_path,
            target,
            rate_bytes_per_sec,
            timeout: Duration::from_secs(transfer.timeout_seconds),
            chunk_size: transfer.chunk_size,
        })
    }

    /// Local path exactly as given on the command line
    pub fn local_path(&self) -> &str {
        &self.local_path
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn bucket(&self) -> &str {
        self.target.bucket()
    }

    /// Remote object key: `<prefix>/<local path as given>`
    pub fn object_key(&self) -> String {
        self.target.object_key(&self.local_path)
    }

    /// Upload rate in bytes per second
    pub fn rate(&self) -> u64 {
        self.rate_bytes_per_sec
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transfer_config() {
        let config = TransferConfig::default();
        assert_eq!(config.upload_kbps, 125_000);
        assert_eq!(config.timeout_seconds, 600);
        assert_eq!(config.chunk_size, 32768);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_rate() {
        let mut config = Config::default();
        config.transfer.upload_kbps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_overflowing_rate() {
        let mut config = Config::default();
        config.transfer.upload_kbps = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_endpoint() {
        let mut config = Config::default();
        config.storage.endpoint = Some("localhost:9000".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_transfer_request_rate_is_kib() {
        let transfer = TransferConfig {
            upload_kbps: 500,
            ..Default::default()
        };
        let request = TransferRequest::new("photo.jpg", "gs://mybucket/incoming", &transfer)
            .unwrap();

        assert_eq!(request.rate(), 500 * 1024);
        assert_eq!(request.timeout(), Duration::from_secs(600));
        assert_eq!(request.bucket(), "mybucket");
        assert_eq!(request.object_key(), "incoming/photo.jpg");
    }

    #[test]
    fn test_transfer_request_rejects_zero_timeout() {
        let transfer = TransferConfig {
            timeout_seconds: 0,
            ..Default::default()
        };
        let result = TransferRequest::new("a.txt", "s3://bucket/prefix", &transfer);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_transfer_request_rejects_dot_segment_key() {
        let result = TransferRequest::new(
            "../../other/x.bin",
            "gs://mybucket/incoming",
            &TransferConfig::default(),
        );
        assert!(matches!(
            result,
            Err(ConfigError::Target(TargetError::DotSegment(_)))
        ));
    }

    #[test]
    fn test_expand_env_vars_default() {
        let expanded = expand_env_vars("${THROTTLE_UPLOADR_SURELY_UNSET:-fallback}");
        assert_eq!(expanded, "fallback");
    }

    #[test]
    fn test_expand_env_vars_keeps_unknown_placeholder() {
        let expanded = expand_env_vars("key: ${THROTTLE_UPLOADR_SURELY_UNSET}");
        assert_eq!(expanded, "key: ${THROTTLE_UPLOADR_SURELY_UNSET}");
    }
}
