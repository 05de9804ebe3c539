//! # Configuration Management
//!
//! Centralized configuration for servers and clients.
//!
//! This module provides structured configuration for listen/connect addresses,
//! framing parameters, encryption, timeouts and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Defaults
//! - Header width 50 bytes, buffer size 1024 bytes, port 5000
//! - Encryption off; when turned on the `rsa` suite derives its modulus size
//!   (in bits) from the buffer size

use crate::core::frame::{self, DEFAULT_HEADER_WIDTH};
use crate::protocol::cipher::CipherSuite;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

use crate::error::{ProtocolError, Result};

/// Default I/O chunk size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Default listen/connect address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:5000";

/// Max allowed payload size a reader will accept (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Whether to enable encryption by default
pub const ENABLE_ENCRYPTION: bool = false;

/// Largest header width accepted by validation
pub const MAX_HEADER_WIDTH: usize = 64;

/// RSA modulus bounds (bits) when the RSA suite is used
pub const MIN_RSA_BITS: usize = 1024;
pub const MAX_RSA_BITS: usize = 4096;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing and encryption configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `CHATWIRE_*` overrides using `lookup` to read variables
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .parse::<T>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {key}: {value}")))
        }

        if let Some(addr) = lookup("CHATWIRE_SERVER_ADDRESS") {
            self.server.address = addr;
        }
        if let Some(addr) = lookup("CHATWIRE_CLIENT_ADDRESS") {
            self.client.address = addr;
        }
        if let Some(value) = lookup("CHATWIRE_HEADER_WIDTH") {
            self.transport.header_width = parse("CHATWIRE_HEADER_WIDTH", &value)?;
        }
        if let Some(value) = lookup("CHATWIRE_BUFFER_SIZE") {
            self.transport.buffer_size = parse("CHATWIRE_BUFFER_SIZE", &value)?;
        }
        if let Some(value) = lookup("CHATWIRE_ENCRYPTION") {
            self.transport.encryption_enabled = parse("CHATWIRE_ENCRYPTION", &value)?;
        }
        if let Some(value) = lookup("CHATWIRE_CIPHER_SUITE") {
            self.transport.cipher_suite = parse("CHATWIRE_CIPHER_SUITE", &value)?;
        }
        if let Some(value) = lookup("CHATWIRE_HANDSHAKE_TIMEOUT_MS") {
            let timeout = Duration::from_millis(parse("CHATWIRE_HANDSHAKE_TIMEOUT_MS", &value)?);
            self.server.handshake_timeout = timeout;
            self.client.handshake_timeout = timeout;
        }
        if let Some(value) = lookup("CHATWIRE_IDLE_TIMEOUT_MS") {
            self.server.idle_timeout =
                Duration::from_millis(parse("CHATWIRE_IDLE_TIMEOUT_MS", &value)?);
        }

        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Accepts a socket address literal or `host:port`; hostnames are resolved
/// when binding or connecting, not here.
fn validate_address(kind: &str, address: &str, errors: &mut Vec<String>) {
    if address.is_empty() {
        errors.push(format!("{kind} address cannot be empty"));
        return;
    }
    if address.parse::<std::net::SocketAddr>().is_ok() {
        return;
    }

    let valid_host_port = match address.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && !host.contains(':')
                && !host.chars().any(char::is_whitespace)
                && port.parse::<u16>().is_ok()
        }
        None => false,
    };
    if !valid_host_port {
        errors.push(format!(
            "Invalid {} address format: '{address}' (expected format: '127.0.0.1:5000' or 'host:5000')",
            kind.to_lowercase()
        ));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:5000")
    pub address: String,

    /// Listen backlog passed to the socket
    pub backlog: u32,

    /// Maximum number of concurrently registered connections
    pub max_connections: usize,

    /// Bound on the key exchange with a new client
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// How long a worker waits for the next message before dropping the client
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Bound on a single frame write to one client
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,

    /// Time allowed for workers to finish during graceful shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            backlog: 128,
            max_connections: 1000,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            idle_timeout: timeout::IDLE_TIMEOUT,
            send_timeout: timeout::DEFAULT_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Server", &self.address, &mut errors);

        if self.backlog == 0 {
            errors.push("Backlog must be greater than 0".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        } else if self.handshake_timeout.as_secs() > 300 {
            errors.push("Handshake timeout too long (maximum: 300s)".to_string());
        }

        if self.idle_timeout.as_secs() < 1 {
            errors.push("Idle timeout too short (minimum: 1s)".to_string());
        } else if self.idle_timeout.as_secs() > 24 * 3600 {
            errors.push("Idle timeout too long (maximum: 24 hours)".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for the TCP connect
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Bound on the key exchange with the server
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,

    /// Bound on a single frame write to the server
    #[serde(with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from(DEFAULT_ADDRESS),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
            send_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address("Client", &self.address, &mut errors);

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.handshake_timeout.as_millis() < 100 {
            errors.push("Handshake timeout too short (minimum: 100ms)".to_string());
        }

        if self.send_timeout.as_millis() < 10 {
            errors.push("Send timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Framing and encryption configuration, shared by both ends of a connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Width of the decimal length header in bytes
    pub header_width: usize,

    /// Chunk size for payload reads; also the RSA modulus size in bits
    pub buffer_size: usize,

    /// Maximum payload length a reader accepts
    pub max_payload_size: usize,

    /// Whether to run the key exchange and encrypt every message
    pub encryption_enabled: bool,

    /// Cipher suite used when encryption is enabled
    #[serde(default)]
    pub cipher_suite: CipherSuite,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            header_width: DEFAULT_HEADER_WIDTH,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_payload_size: MAX_PAYLOAD_SIZE,
            encryption_enabled: ENABLE_ENCRYPTION,
            cipher_suite: CipherSuite::default(),
        }
    }
}

impl TransportConfig {
    /// Largest payload that is both allowed and representable in the header
    pub fn effective_max_payload(&self) -> usize {
        self.max_payload_size
            .min(frame::max_length_for_width(self.header_width))
    }

    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.header_width == 0 {
            errors.push("Header width must be greater than 0".to_string());
        } else if self.header_width > MAX_HEADER_WIDTH {
            errors.push(format!(
                "Header width too large: {} (maximum: {MAX_HEADER_WIDTH})",
                self.header_width
            ));
        }

        if self.buffer_size == 0 {
            errors.push("Buffer size must be greater than 0".to_string());
        }

        if self.max_payload_size == 0 {
            errors.push("Max payload size cannot be 0".to_string());
        } else if self.header_width > 0
            && self.max_payload_size > frame::max_length_for_width(self.header_width)
        {
            errors.push(format!(
                "Max payload size {} does not fit in a {}-byte header",
                self.max_payload_size, self.header_width
            ));
        }

        if self.encryption_enabled && self.cipher_suite == CipherSuite::Rsa {
            if self.buffer_size < MIN_RSA_BITS || self.buffer_size > MAX_RSA_BITS {
                errors.push(format!(
                    "RSA key size {} bits out of range ({MIN_RSA_BITS}-{MAX_RSA_BITS}); adjust buffer_size",
                    self.buffer_size
                ));
            } else if self.buffer_size % 8 != 0 {
                errors.push(format!(
                    "RSA key size {} bits must be a multiple of 8; adjust buffer_size",
                    self.buffer_size
                ));
            }
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("chatwire"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
