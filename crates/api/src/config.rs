use std::path::PathBuf;

use axum::http::HeaderValue;
use drip_sequencer::engine::{DEFAULT_TICK_BATCH_SIZE, DEFAULT_TICK_CONCURRENCY};
use drip_sequencer::EngineSettings;

/// Error type for server configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("CRON_SECRET must be set when APP_ENV=production")]
    MissingCronSecret,
}

/// Server configuration loaded from environment variables.
///
/// Defaults suit local development. In production, override via environment
/// variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Postgres connection string.
    pub database_url: String,
    /// Shared secret for the trigger endpoints. `None` leaves them open.
    pub cron_secret: Option<String>,
    /// Whether `APP_ENV` is `production`.
    pub production: bool,
    /// Parallel sends per tick.
    pub tick_concurrency: usize,
    /// Maximum due rows fetched per tick.
    pub tick_batch_size: i64,
    /// JSON file replacing the built-in sequence catalog.
    pub sequence_catalog_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `DATABASE_URL`          | required                   |
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `APP_ENV`               | `development`              |
    /// | `CRON_SECRET`           | unset (required in prod)   |
    /// | `TICK_CONCURRENCY`      | `4`                        |
    /// | `TICK_BATCH_SIZE`       | `500`                      |
    /// | `SEQUENCE_CATALOG_PATH` | unset (built-in catalog)   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = non_empty("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let host = non_empty("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_or(&lookup, "PORT", 3000u16)?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(bad) = cors_origins
            .iter()
            .find(|origin| origin.parse::<HeaderValue>().is_err())
        {
            return Err(ConfigError::Invalid {
                key: "CORS_ORIGINS",
                value: bad.clone(),
            });
        }

        let request_timeout_secs = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 30u64)?;

        let production = non_empty("APP_ENV")
            .is_some_and(|env| env.trim().eq_ignore_ascii_case("production"));
        // Presented tokens are trimmed before comparison; trim the secret the same way.
        let cron_secret = non_empty("CRON_SECRET").map(|s| s.trim().to_string());
        if production && cron_secret.is_none() {
            return Err(ConfigError::MissingCronSecret);
        }

        let tick_concurrency = parse_or(&lookup, "TICK_CONCURRENCY", DEFAULT_TICK_CONCURRENCY)?;
        if tick_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "TICK_CONCURRENCY",
                value: "0".into(),
            });
        }
        let tick_batch_size = parse_or(&lookup, "TICK_BATCH_SIZE", DEFAULT_TICK_BATCH_SIZE)?;
        if tick_batch_size < 1 {
            return Err(ConfigError::Invalid {
                key: "TICK_BATCH_SIZE",
                value: tick_batch_size.to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            database_url,
            cron_secret,
            production,
            tick_concurrency,
            tick_batch_size,
            sequence_catalog_path: non_empty("SEQUENCE_CATALOG_PATH").map(PathBuf::from),
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            concurrency: self.tick_concurrency,
            batch_size: self.tick_batch_size,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
