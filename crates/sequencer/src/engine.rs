//! Enrollment, due-set processing and status queries.
//!
//! A tick fetches every due enrollment and processes each one independently:
//! render the current step, send it, then record the advance with a
//! conditional update. Nothing is written unless the send succeeded, and one
//! enrollment failing never stops the rest of the batch.

use std::sync::Arc;

use drip_core::email::parse_email;
use drip_core::error::CoreError;
use drip_core::sequences::{SequenceCatalog, SequenceDefinition};
use drip_core::templates::StepRenderer;
use drip_core::types::{DbId, Timestamp};
use drip_db::models::enrollment::{CreateEnrollment, Enrollment, StepAdvance};
use drip_events::DeliveryChannel;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::store::{EnrollmentStore, StoreError};

/// Maximum stored length of the free-text `source` tag.
pub const MAX_SOURCE_LENGTH: usize = 200;

/// Default number of enrollments processed in parallel within one tick.
pub const DEFAULT_TICK_CONCURRENCY: usize = 4;

/// Default cap on due rows fetched per tick.
pub const DEFAULT_TICK_BATCH_SIZE: i64 = 500;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Operation-level failures surfaced to callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown sequence: {0}")]
    UnknownSequence(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownSequence(id) => Self::UnknownSequence(id),
            CoreError::Validation(msg) => Self::InvalidInput(msg),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

/// Why a single due enrollment was not advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickErrorKind {
    /// The enrollment references a sequence missing from the catalog.
    UnknownSequence,
    /// The step could not be rendered.
    Render,
    /// The delivery channel failed; nothing was sent.
    Delivery,
    /// The step was delivered but the advance could not be recorded. The same
    /// step will be sent again on a later tick.
    PartialPersistence,
    /// The step was delivered but another tick advanced the row first.
    StaleUpdate,
}

/// One per-enrollment failure reported in a [`TickSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickError {
    pub enrollment_id: DbId,
    pub sequence_id: String,
    pub email: String,
    pub step: i32,
    pub kind: TickErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Aggregate result of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Due rows found.
    pub processed: usize,
    /// Rows whose current step was sent and recorded.
    pub sent: usize,
    /// Rows that finished their sequence in this tick (also counted in `sent`).
    pub completed: usize,
    pub errors: Vec<TickError>,
}

/// Result of an enroll call.
#[derive(Debug, Clone)]
pub struct EnrollOutcome {
    pub enrollment: Enrollment,
    /// `false` when an existing active run was returned instead.
    pub created: bool,
}

enum StepOutcome {
    Advanced,
    Completed,
    Failed(TickError),
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tuning knobs for tick processing.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Parallel per-enrollment pipelines within a tick (at least 1).
    pub concurrency: usize,
    /// Maximum due rows fetched per tick; the rest wait for the next one.
    pub batch_size: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_TICK_CONCURRENCY,
            batch_size: DEFAULT_TICK_BATCH_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// SequenceEngine
// ---------------------------------------------------------------------------

/// Drives enrollments through their sequences.
pub struct SequenceEngine {
    store: Arc<dyn EnrollmentStore>,
    channel: Arc<dyn DeliveryChannel>,
    renderer: Arc<dyn StepRenderer>,
    catalog: Arc<SequenceCatalog>,
    settings: EngineSettings,
}

impl SequenceEngine {
    pub fn new(
        store: Arc<dyn EnrollmentStore>,
        channel: Arc<dyn DeliveryChannel>,
        renderer: Arc<dyn StepRenderer>,
        catalog: Arc<SequenceCatalog>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            channel,
            renderer,
            catalog,
            settings,
        }
    }

    pub fn catalog(&self) -> &SequenceCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn EnrollmentStore> {
        &self.store
    }

    /// Enroll `email` in `sequence_id`.
    ///
    /// Idempotent while a run is active: a second call returns the existing
    /// enrollment with `created = false`. Concurrent callers racing on the
    /// insert are resolved by the store's uniqueness rule; the loser re-reads
    /// and returns the winner's row.
    pub async fn enroll(
        &self,
        email: &str,
        sequence_id: &str,
        source: Option<&str>,
        now: Timestamp,
    ) -> Result<EnrollOutcome, EngineError> {
        let email = parse_email(email)?;
        let definition = self.catalog.require(sequence_id)?;

        if let Some(existing) = self.store.find_active(&email, sequence_id).await? {
            tracing::debug!(
                enrollment_id = existing.id,
                sequence_id,
                "Subject already enrolled"
            );
            return Ok(EnrollOutcome {
                enrollment: existing,
                created: false,
            });
        }

        let input = CreateEnrollment {
            email: email.clone(),
            sequence_id: definition.id.clone(),
            source: normalize_source(source),
            started_at: now,
            // Validated definitions always have a step 1.
            next_send_at: definition.send_at(now, 1).unwrap_or(now),
        };

        match self.store.create(&input).await {
            Ok(enrollment) => {
                tracing::info!(
                    enrollment_id = enrollment.id,
                    sequence_id,
                    email = %enrollment.email,
                    "Enrolled subject in sequence"
                );
                Ok(EnrollOutcome {
                    enrollment,
                    created: true,
                })
            }
            Err(StoreError::ActiveConflict { .. }) => {
                let winner = self.store.find_active(&email, sequence_id).await?;
                match winner {
                    Some(enrollment) => Ok(EnrollOutcome {
                        enrollment,
                        created: false,
                    }),
                    None => Err(EngineError::Storage(StoreError::ActiveConflict {
                        email,
                        sequence_id: sequence_id.to_string(),
                    })),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Process every enrollment due at `now`.
    ///
    /// Only a failure to fetch the due set fails the whole tick; everything
    /// after that is reported per enrollment in [`TickSummary::errors`].
    pub async fn tick(&self, now: Timestamp) -> Result<TickSummary, EngineError> {
        let due = self.store.find_due(now, self.settings.batch_size).await?;
        let mut summary = TickSummary {
            processed: due.len(),
            ..TickSummary::default()
        };
        if due.is_empty() {
            return Ok(summary);
        }

        let outcomes: Vec<StepOutcome> = stream::iter(due)
            .map(|enrollment| self.process(enrollment))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                StepOutcome::Advanced => summary.sent += 1,
                StepOutcome::Completed => {
                    summary.sent += 1;
                    summary.completed += 1;
                }
                StepOutcome::Failed(err) => summary.errors.push(err),
            }
        }
        summary.errors.sort_by_key(|e| e.enrollment_id);

        tracing::info!(
            processed = summary.processed,
            sent = summary.sent,
            completed = summary.completed,
            errors = summary.errors.len(),
            "Sequence tick finished"
        );
        Ok(summary)
    }

    /// Every enrollment for `email`, optionally narrowed to one sequence.
    pub async fn status(
        &self,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, EngineError> {
        let email = parse_email(email)?;
        Ok(self.store.list_for_email(&email, sequence_id).await?)
    }

    /// Stop the active run of `sequence_id` for `email`.
    ///
    /// Returns `None` when there is nothing active to cancel.
    pub async fn cancel(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, EngineError> {
        let email = parse_email(email)?;
        let cancelled = self.store.cancel_active(&email, sequence_id).await?;
        if let Some(enrollment) = &cancelled {
            tracing::info!(
                enrollment_id = enrollment.id,
                sequence_id,
                step = enrollment.current_step,
                "Enrollment cancelled"
            );
        }
        Ok(cancelled)
    }

    /// Render, send and record the current step of one enrollment.
    async fn process(&self, enrollment: Enrollment) -> StepOutcome {
        let step = enrollment.current_step;
        let fail = |kind: TickErrorKind, message: String| {
            StepOutcome::Failed(TickError {
                enrollment_id: enrollment.id,
                sequence_id: enrollment.sequence_id.clone(),
                email: enrollment.email.clone(),
                step,
                kind,
                message,
            })
        };

        let Some(definition) = self.catalog.get(&enrollment.sequence_id) else {
            tracing::warn!(
                enrollment_id = enrollment.id,
                sequence_id = %enrollment.sequence_id,
                "Due enrollment references a sequence missing from the catalog"
            );
            return fail(
                TickErrorKind::UnknownSequence,
                format!("Unknown sequence: {}", enrollment.sequence_id),
            );
        };

        let content = match self
            .renderer
            .render(&enrollment.sequence_id, step, &enrollment.email)
        {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!(
                    enrollment_id = enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    step,
                    error = %err,
                    "Failed to render sequence step"
                );
                return fail(TickErrorKind::Render, err.to_string());
            }
        };

        let receipt = match self
            .channel
            .send(&enrollment.email, &content.subject, &content.html)
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                tracing::warn!(
                    enrollment_id = enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    step,
                    error = %err,
                    "Failed to deliver sequence step, will retry next tick"
                );
                return fail(TickErrorKind::Delivery, err.to_string());
            }
        };

        let advance = next_advance(definition, &enrollment);
        match self.store.advance(enrollment.id, step, advance).await {
            Ok(true) => {
                tracing::info!(
                    enrollment_id = enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    step,
                    message_id = %receipt.id,
                    "Sequence step sent"
                );
                match advance {
                    StepAdvance::Complete => StepOutcome::Completed,
                    StepAdvance::Next { .. } => StepOutcome::Advanced,
                }
            }
            Ok(false) => {
                tracing::warn!(
                    enrollment_id = enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    step,
                    message_id = %receipt.id,
                    "Sequence step sent but the enrollment was already advanced or cancelled"
                );
                fail(
                    TickErrorKind::StaleUpdate,
                    "Enrollment changed while the step was being sent".to_string(),
                )
            }
            Err(err) => {
                tracing::error!(
                    enrollment_id = enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    step,
                    message_id = %receipt.id,
                    error = %err,
                    "Sequence step sent but progress was not saved; it will be sent again"
                );
                fail(
                    TickErrorKind::PartialPersistence,
                    format!("Delivered as {} but failed to record progress: {err}", receipt.id),
                )
            }
        }
    }
}

/// State to record after `enrollment`'s current step went out.
///
/// The next send time is anchored to `started_at`, not to the time of this
/// tick.
fn next_advance(definition: &SequenceDefinition, enrollment: &Enrollment) -> StepAdvance {
    if definition.is_last_step(enrollment.current_step) {
        return StepAdvance::Complete;
    }
    let step = enrollment.current_step + 1;
    match definition.send_at(enrollment.started_at, step) {
        Some(next_send_at) => StepAdvance::Next { step, next_send_at },
        None => StepAdvance::Complete,
    }
}

fn normalize_source(source: Option<&str>) -> Option<String> {
    source
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.chars().take(MAX_SOURCE_LENGTH).collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use drip_db::models::enrollment::EnrollmentStatus;

    use super::*;

    fn enrollment_at(step: i32, started_at: Timestamp) -> Enrollment {
        Enrollment {
            id: 7,
            email: "a@example.com".to_string(),
            sequence_id: "welcome".to_string(),
            current_step: step,
            status: EnrollmentStatus::Active,
            source: None,
            started_at,
            next_send_at: Some(started_at),
            created_at: started_at,
            updated_at: started_at,
        }
    }

    #[test]
    fn next_advance_moves_to_anchored_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let def = SequenceDefinition::from_delays("welcome", &[0, 24, 72]);
        assert_eq!(
            next_advance(&def, &enrollment_at(1, t0)),
            StepAdvance::Next {
                step: 2,
                next_send_at: t0 + Duration::hours(24)
            }
        );
        assert_eq!(
            next_advance(&def, &enrollment_at(2, t0)),
            StepAdvance::Next {
                step: 3,
                next_send_at: t0 + Duration::hours(72)
            }
        );
    }

    #[test]
    fn next_advance_completes_on_last_step() {
        let t0 = Utc::now();
        let def = SequenceDefinition::from_delays("welcome", &[0, 24]);
        assert_eq!(next_advance(&def, &enrollment_at(2, t0)), StepAdvance::Complete);
    }

    #[test]
    fn normalize_source_trims_and_caps() {
        assert_eq!(normalize_source(None), None);
        assert_eq!(normalize_source(Some("   ")), None);
        assert_eq!(normalize_source(Some(" footer ")), Some("footer".to_string()));
        let long = "x".repeat(MAX_SOURCE_LENGTH + 50);
        assert_eq!(
            normalize_source(Some(&long)).map(|s| s.len()),
            Some(MAX_SOURCE_LENGTH)
        );
    }

    #[test]
    fn core_errors_map_to_engine_errors() {
        assert!(matches!(
            EngineError::from(CoreError::UnknownSequence("x".into())),
            EngineError::UnknownSequence(id) if id == "x"
        ));
        assert!(matches!(
            EngineError::from(CoreError::Validation("bad".into())),
            EngineError::InvalidInput(msg) if msg == "bad"
        ));
    }

    #[test]
    fn tick_error_kind_serializes_snake_case() {
        let json = serde_json::to_value(TickErrorKind::PartialPersistence).unwrap();
        assert_eq!(json, "partial_persistence");
    }
}
