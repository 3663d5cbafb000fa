//! Logging initialization.
//!
//! Every Herald process installs one `tracing` subscriber at startup. The
//! filter comes from `RUST_LOG` when set, otherwise from the configured
//! level.

use crate::{HeraldError, HeraldResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings consumed by [`init_logging`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info,herald=debug,tower_http=debug".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

impl LoggingSettings {
    /// Builds the env filter, preferring `RUST_LOG`.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Subscriber with the default filter and pretty output, for the moments
/// before configuration decides the real one. Install it with
/// `tracing::subscriber::with_default`.
#[must_use]
pub fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::registry()
        .with(LoggingSettings::default().filter())
        .with(tracing_subscriber::fmt::layer().with_target(true))
}

/// Installs the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(settings: &LoggingSettings) -> HeraldResult<()> {
    let registry = tracing_subscriber::registry().with(settings.filter());

    let result = match settings.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init(),
    };

    result.map_err(|e| HeraldError::internal(format!("Failed to initialize logging: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LoggingSettings::default();
        assert_eq!(settings.format, LogFormat::Pretty);
        assert!(settings.level.contains("herald=debug"));
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let settings: LoggingSettings =
            serde_json::from_str(r#"{"level":"warn","format":"json"}"#).unwrap();
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.level, "warn");
    }

    #[test]
    fn test_bootstrap_subscriber_records_info() {
        let enabled = tracing::subscriber::with_default(bootstrap_subscriber(), || {
            tracing::enabled!(target: "herald_config::loader", tracing::Level::INFO)
        });
        assert!(enabled);
    }

    #[test]
    fn test_second_init_is_an_error() {
        let settings = LoggingSettings::default();
        let _ = init_logging(&settings);
        assert!(init_logging(&settings).is_err());
    }
}
