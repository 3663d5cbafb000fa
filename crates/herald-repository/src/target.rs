//! Database URL handling.

use herald_core::{HeraldError, HeraldResult};
use url::Url;

/// Application database and the maintenance database used to create it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Normalised URL of the application database.
    pub url: Url,
    /// Same server, pointing at the maintenance database.
    pub admin_url: Url,
    /// Name of the application database.
    pub database: String,
}

impl DatabaseTarget {
    /// Parses a connection URL.
    ///
    /// Driver-qualified schemes such as `postgresql+asyncpg://` are reduced
    /// to `postgres://`. The database name comes from the URL path and must
    /// not be empty.
    pub fn parse(raw: &str, admin_database: &str) -> HeraldResult<Self> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| HeraldError::configuration("database URL has no scheme"))?;

        let base_scheme = scheme.split('+').next().unwrap_or(scheme);
        if !matches!(base_scheme, "postgres" | "postgresql") {
            return Err(HeraldError::configuration(format!(
                "unsupported database scheme '{scheme}'"
            )));
        }

        let url = Url::parse(&format!("postgres://{rest}"))
            .map_err(|e| HeraldError::configuration(format!("invalid database URL: {e}")))?;

        let database = url.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(HeraldError::configuration(
                "no database name found in database URL",
            ));
        }

        let mut admin_url = url.clone();
        admin_url.set_path(&format!("/{admin_database}"));

        Ok(Self {
            url,
            admin_url,
            database,
        })
    }

    /// Database name quoted as an SQL identifier.
    #[must_use]
    pub fn quoted_database(&self) -> String {
        format!("\"{}\"", self.database.replace('"', "\"\""))
    }
}
