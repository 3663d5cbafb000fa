//! Configuration loader with layered sources.

use crate::{AppConfig, ConfigValidator};
use config::{Config, ConfigError, Environment, File};
use herald_core::HeraldError;
use std::path::Path;
use tracing::{debug, info, warn};

/// Keys parsed from comma-separated environment values.
const LIST_KEYS: &[&str] = &["queue.backoff_schedule_secs", "database.migration_command"];

/// Configuration loader.
///
/// Loads once at process start; the result is handed to components by value.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config: AppConfig,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{dir}/default.toml` - Default values
    /// 2. `{dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{dir}/local.toml` - Local overrides
    /// 4. Environment variables with `HERALD_` prefix (`__` separates sections)
    /// 5. `DATABASE_URL` and `REDIS_URL`, when set
    pub fn new(config_dir: impl AsRef<Path>) -> Result<Self, HeraldError> {
        let config = Self::load_config(config_dir.as_ref())?;
        Ok(Self { config })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, HeraldError> {
        Self::new("./config")
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Consumes the loader, returning the configuration.
    #[must_use]
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    fn load_config(config_dir: &Path) -> Result<AppConfig, HeraldError> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("HERALD_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = config_dir.join(format!("{name}.toml"));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        let mut env_source = Environment::with_prefix("HERALD")
            .separator("__")
            .list_separator(",")
            .try_parsing(true);
        for key in LIST_KEYS {
            env_source = env_source.with_list_parse_key(key);
        }
        builder = builder.add_source(env_source);

        // Conventional variables win over everything else
        builder = builder
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())
            .map_err(config_error_to_herald_error)?
            .set_override_option("redis.url", std::env::var("REDIS_URL").ok())
            .map_err(config_error_to_herald_error)?;

        let config = builder.build().map_err(config_error_to_herald_error)?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_herald_error)?;

        Self::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Validates the configuration, joining every problem into one error.
    fn validate_config(config: &AppConfig) -> Result<(), HeraldError> {
        ConfigValidator::validate(config).map_err(|errors| {
            for error in &errors {
                warn!("Invalid configuration: {}", error);
            }
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            HeraldError::configuration(joined)
        })
    }
}

fn config_error_to_herald_error(err: ConfigError) -> HeraldError {
    HeraldError::configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn test_loads_defaults_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.config();

        assert_eq!(config.queue.max_attempts, 4);
        assert_eq!(config.supervisor.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_default_toml_overrides_builtin_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
[queue]
name = "emails"
max_attempts = 2
backoff_schedule_secs = [5]

[readiness]
retries = 3
base_delay_ms = 250
"#,
        )
        .unwrap();

        let config = ConfigLoader::new(dir.path()).unwrap().into_config();
        assert_eq!(config.queue.name, "emails");
        assert_eq!(config.queue.max_attempts, 2);
        assert_eq!(config.queue.backoff_schedule(), vec![Duration::from_secs(5)]);
        assert_eq!(config.readiness.retries, 3);
        assert_eq!(config.readiness.base_delay(), Duration::from_millis(250));
        // untouched sections keep their defaults
        assert_eq!(config.queue.result_ttl_secs, 86400);
    }

    #[test]
    fn test_invalid_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[queue]\nname = \"\"\nmax_attempts = 0\n",
        )
        .unwrap();

        let err = ConfigLoader::new(dir.path()).unwrap_err();
        assert!(matches!(err, HeraldError::Configuration(_)));
        let msg = err.to_string();
        assert!(msg.contains("Queue name") && msg.contains("max_attempts"));
    }
}
