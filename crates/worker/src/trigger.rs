//! Periodic caller of the tick endpoint.
//!
//! The API has no in-process timer; something outside has to hit
//! `/sequences/tick`. [`TickTrigger`] is that something when no platform
//! cron is available.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tick endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Counts reported by one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TickResults {
    pub processed: u64,
    pub sent: u64,
    pub completed: u64,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
}

/// Success body of the tick endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TickReport {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub results: TickResults,
}

// ---------------------------------------------------------------------------
// TickTrigger
// ---------------------------------------------------------------------------

pub struct TickTrigger {
    client: reqwest::Client,
    config: WorkerConfig,
}

impl TickTrigger {
    pub fn new(config: WorkerConfig) -> Result<Self, TriggerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Call the tick endpoint on every interval until `cancel` fires.
    ///
    /// The first call happens immediately. Failures are logged and the loop
    /// keeps going; the next tick picks up whatever was left.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Tick trigger cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.fire().await {
                        Ok(report) => log_report(&report),
                        Err(e) => tracing::error!(error = %e, "Tick request failed"),
                    }
                }
            }
        }
    }

    /// Issue one `GET` against the tick endpoint.
    pub async fn fire(&self) -> Result<TickReport, TriggerError> {
        let mut request = self.client.get(&self.config.tick_url);
        if let Some(secret) = &self.config.cron_secret {
            request = request.bearer_auth(secret);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<TickReport>().await?)
    }
}

fn log_report(report: &TickReport) {
    let results = &report.results;
    if results.errors.is_empty() {
        tracing::info!(
            processed = results.processed,
            sent = results.sent,
            completed = results.completed,
            "Tick finished"
        );
    } else {
        tracing::warn!(
            processed = results.processed,
            sent = results.sent,
            completed = results.completed,
            errors = results.errors.len(),
            "Tick finished with errors"
        );
        for err in &results.errors {
            tracing::warn!(error = %err, "Tick item failed");
        }
    }
}
