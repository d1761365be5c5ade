use std::time::Duration;

/// Default pause between trigger calls (15 minutes).
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 900;

/// Per-request timeout for the trigger call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum WorkerConfigError {
    #[error("TICK_URL must be set")]
    MissingUrl,

    #[error("TICK_INTERVAL_SECS must be a positive integer, got '{0}'")]
    InvalidInterval(String),
}

/// Settings for the periodic tick trigger.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Full URL of the tick endpoint, e.g. `http://localhost:3000/sequences/tick`.
    pub tick_url: String,
    /// Bearer secret sent with every call.
    pub cron_secret: Option<String>,
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl WorkerConfig {
    /// | Variable             | Required | Default |
    /// |----------------------|----------|---------|
    /// | `TICK_URL`           | yes      |         |
    /// | `CRON_SECRET`        | no       |         |
    /// | `TICK_INTERVAL_SECS` | no       | `900`   |
    pub fn from_env() -> Result<Self, WorkerConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WorkerConfigError> {
        let tick_url = lookup("TICK_URL")
            .filter(|u| !u.trim().is_empty())
            .ok_or(WorkerConfigError::MissingUrl)?;

        let interval_secs = match lookup("TICK_INTERVAL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(WorkerConfigError::InvalidInterval(raw))?,
            None => DEFAULT_TICK_INTERVAL_SECS,
        };

        Ok(Self {
            tick_url: tick_url.trim().to_string(),
            cron_secret: lookup("CRON_SECRET")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            interval: Duration::from_secs(interval_secs),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}
