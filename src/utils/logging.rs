//! # Logging Setup
//!
//! Installs the global `tracing` subscriber described by [`LoggingConfig`].
//!
//! `RUST_LOG` wins over the configured level when it is set. Console and file
//! outputs are independent layers and either can use JSON formatting.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the level filter: `RUST_LOG` if present, otherwise the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()))
}

fn output_layers(config: &LoggingConfig) -> Result<Vec<BoxedLayer>> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.log_to_console {
        let layer = fmt::layer().with_target(true);
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open log file: {e}")))?;

        let layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));
        layers.push(if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        });
    }

    Ok(layers)
}

/// Install the global subscriber.
///
/// # Errors
/// Returns `ProtocolError::ConfigError` if the log file cannot be opened or a
/// global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let layers = output_layers(config)?;

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(config))
        .try_init()
        .map_err(|e| ProtocolError::ConfigError(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_output_requires_path() {
        let config = LoggingConfig {
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };
        assert!(matches!(
            output_layers(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn test_one_layer_per_enabled_output() {
        let path = std::env::temp_dir().join(format!("chatwire-log-{}.log", std::process::id()));
        let config = LoggingConfig {
            log_to_console: true,
            log_to_file: true,
            log_file_path: Some(path.to_string_lossy().to_string()),
            ..LoggingConfig::default()
        };
        let layers = output_layers(&config).map(|l| l.len());
        let _ = std::fs::remove_file(&path);
        assert!(matches!(layers, Ok(2)));
    }
}
