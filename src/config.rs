/*!
 * Configuration types for the object-storage client
 */

use crate::error::{ClientErrorCode, CosError, CosResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default host template; `{bucket}` and `{region}` are substituted per request
pub const DEFAULT_HOST_TEMPLATE: &str = "{bucket}.cos.{region}.myqcloud.com";

/// Smallest accepted connect/socket timeout
pub const MIN_TIMEOUT_MS: u64 = 10_000;

/// Bodies at or above this size are hashed incrementally (1 MiB)
pub const DEFAULT_MD5_STREAM_THRESHOLD: u64 = 1024 * 1024;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default region (e.g., "ap-guangzhou")
    #[serde(default)]
    pub region: String,

    /// URL scheme, "https" or "http"
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Host template with `{bucket}` and `{region}` placeholders
    #[serde(default = "default_host_template")]
    pub host_template: String,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Socket (read/write) timeout in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Validity window of a request signature, in seconds
    #[serde(default = "default_sign_duration_secs")]
    pub sign_duration_secs: u64,

    /// Bodies at or above this many bytes are hashed in streaming mode
    #[serde(default = "default_md5_stream_threshold")]
    pub md5_stream_threshold: u64,

    /// Worker pool sizes
    #[serde(default)]
    pub pools: PoolConfig,

    /// File holding download checkpoints (None = in-memory only)
    #[serde(default)]
    pub checkpoint_file: Option<PathBuf>,

    /// Logging setup for the CLI
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker pool sizes per traffic shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_upload_workers")]
    pub upload: usize,
    #[serde(default = "default_download_workers")]
    pub download: usize,
    #[serde(default = "default_command_workers")]
    pub command: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            upload: default_upload_workers(),
            download: default_download_workers(),
            command: default_command_workers(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Shorthand for level = debug
    #[serde(default)]
    pub verbose: bool,
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_host_template() -> String {
    DEFAULT_HOST_TEMPLATE.to_string()
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_socket_timeout_ms() -> u64 {
    30_000
}

fn default_sign_duration_secs() -> u64 {
    600
}

fn default_md5_stream_threshold() -> u64 {
    DEFAULT_MD5_STREAM_THRESHOLD
}

fn default_upload_workers() -> usize {
    2
}

fn default_download_workers() -> usize {
    3
}

fn default_command_workers() -> usize {
    5
}

impl ClientConfig {
    /// Create a config for the given default region
    pub fn new<S: Into<String>>(region: S) -> Self {
        Self {
            region: region.into(),
            scheme: default_scheme(),
            host_template: default_host_template(),
            connect_timeout_ms: default_connect_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            sign_duration_secs: default_sign_duration_secs(),
            md5_stream_threshold: default_md5_stream_threshold(),
            pools: PoolConfig::default(),
            checkpoint_file: None,
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> CosResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> CosResult<Self> {
        let config: ClientConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> CosResult<()> {
        if self.region.is_empty() {
            return Err(invalid("Region cannot be empty"));
        }

        if self.scheme != "https" && self.scheme != "http" {
            return Err(invalid(format!("Unsupported scheme: {}", self.scheme)));
        }

        if !self.host_template.contains("{bucket}") {
            return Err(invalid(format!(
                "Host template must contain {{bucket}}: {}",
                self.host_template
            )));
        }

        if self.connect_timeout_ms < MIN_TIMEOUT_MS {
            return Err(invalid(format!(
                "Connection timeout must be at least {} ms, got {}",
                MIN_TIMEOUT_MS, self.connect_timeout_ms
            )));
        }

        if self.socket_timeout_ms < MIN_TIMEOUT_MS {
            return Err(invalid(format!(
                "Socket timeout must be at least {} ms, got {}",
                MIN_TIMEOUT_MS, self.socket_timeout_ms
            )));
        }

        if self.sign_duration_secs == 0 {
            return Err(invalid("Signature duration must be positive"));
        }

        if self.pools.upload == 0 || self.pools.download == 0 || self.pools.command == 0 {
            return Err(invalid("Every worker pool needs at least one worker"));
        }

        Ok(())
    }

    /// Render the host for a bucket in a region
    pub fn host(&self, bucket: &str, region: &str) -> String {
        self.host_template
            .replace("{bucket}", bucket)
            .replace("{region}", region)
    }

    /// Connection timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Socket timeout
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    /// Signature validity window
    pub fn sign_duration(&self) -> Duration {
        Duration::from_secs(self.sign_duration_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Builder for ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with the default region
    pub fn new<S: Into<String>>(region: S) -> Self {
        Self {
            config: ClientConfig::new(region),
        }
    }

    /// Use plain HTTP
    pub fn http(mut self) -> Self {
        self.config.scheme = "http".to_string();
        self
    }

    /// Set the host template
    pub fn host_template<S: Into<String>>(mut self, template: S) -> Self {
        self.config.host_template = template.into();
        self
    }

    /// Set the connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the socket timeout
    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.config.socket_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the signature validity window
    pub fn sign_duration(mut self, duration: Duration) -> Self {
        self.config.sign_duration_secs = duration.as_secs();
        self
    }

    /// Set the streaming-hash threshold
    pub fn md5_stream_threshold(mut self, bytes: u64) -> Self {
        self.config.md5_stream_threshold = bytes;
        self
    }

    /// Set worker pool sizes
    pub fn pools(mut self, upload: usize, download: usize, command: usize) -> Self {
        self.config.pools = PoolConfig {
            upload,
            download,
            command,
        };
        self
    }

    /// Persist checkpoints in this file
    pub fn checkpoint_file(mut self, path: PathBuf) -> Self {
        self.config.checkpoint_file = Some(path);
        self
    }

    /// Build the configuration
    pub fn build(self) -> CosResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn invalid<S: Into<String>>(message: S) -> CosError {
    CosError::client(ClientErrorCode::InvalidArgument, message)
}

/// Validate a bucket name: 1-63 chars of lowercase letters, digits and
/// hyphens, not starting or ending with a hyphen
pub fn validate_bucket_name(name: &str) -> CosResult<()> {
    let len = name.len();
    if !(1..=63).contains(&len) {
        return Err(invalid(format!("Invalid bucket name length: {}", name)));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(invalid(format!(
            "Bucket name cannot start or end with a hyphen: {}",
            name
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(format!(
            "Bucket names may only contain lowercase letters, digits and hyphens: {}",
            name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid_once_region_set() {
        assert!(ClientConfig::default().validate().is_err());
        assert!(ClientConfig::new("ap-guangzhou").validate().is_ok());
    }

    #[test]
    fn test_timeouts_below_minimum_rejected() {
        let mut config = ClientConfig::new("ap-guangzhou");
        config.connect_timeout_ms = 5_000;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("ap-guangzhou");
        config.socket_timeout_ms = 9_999;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_pool_rejected() {
        let result = ClientConfigBuilder::new("ap-guangzhou")
            .pools(2, 0, 5)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_host_rendering() {
        let config = ClientConfig::new("ap-beijing");
        assert_eq!(
            config.host("examplebucket-1250000000", "ap-beijing"),
            "examplebucket-1250000000.cos.ap-beijing.myqcloud.com"
        );

        let config = ClientConfigBuilder::new("us-east-1")
            .host_template("localhost:9000/{bucket}")
            .http()
            .build()
            .unwrap();
        assert_eq!(config.host("b", "us-east-1"), "localhost:9000/b");
        assert_eq!(config.scheme, "http");
    }

    #[test]
    fn test_from_toml() {
        let config = ClientConfig::from_toml_str(
            r#"
            region = "ap-shanghai"
            socket_timeout_ms = 60000
            checkpoint_file = "/tmp/checkpoints.json"

            [pools]
            download = 8

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.region, "ap-shanghai");
        assert_eq!(config.scheme, "https");
        assert_eq!(config.socket_timeout_ms, 60_000);
        assert_eq!(config.connect_timeout_ms, 15_000);
        assert_eq!(config.pools.download, 8);
        assert_eq!(config.pools.upload, 2);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.checkpoint_file,
            Some(PathBuf::from("/tmp/checkpoints.json"))
        );
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(ClientConfig::from_toml_str("region = 42").is_err());
        assert!(ClientConfig::from_toml_str("region = \"\"").is_err());
    }

    #[test]
    fn test_bucket_names() {
        assert!(validate_bucket_name("examplebucket-1250000000").is_ok());
        assert!(validate_bucket_name("a").is_ok());
        assert!(validate_bucket_name("").is_err());
        assert!(validate_bucket_name("Bucket").is_err());
        assert!(validate_bucket_name("my_bucket").is_err());
        assert!(validate_bucket_name("-bucket").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
