//! Enrollment persistence seam.
//!
//! [`EnrollmentStore`] is the only shared mutable resource the scheduler
//! touches. Every mutation is scoped to a single row, and step advances are
//! conditional on the step the caller observed.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use drip_core::types::{DbId, Timestamp};
use drip_db::models::enrollment::{CreateEnrollment, Enrollment, EnrollmentStatus, StepAdvance};
use drip_db::repositories::enrollment_repo::is_active_conflict;
use drip_db::repositories::EnrollmentRepo;
use drip_db::DbPool;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The subject already has an active run of this sequence.
    #[error("Active enrollment already exists for {email} in '{sequence_id}'")]
    ActiveConflict { email: String, sequence_id: String },

    /// The database rejected or failed the query.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The backing store cannot serve requests.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Durable record store for enrollments.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    /// Insert a new active enrollment at step 1.
    ///
    /// Must fail with [`StoreError::ActiveConflict`] when an active row
    /// already exists for the same (email, sequence).
    async fn create(&self, input: &CreateEnrollment) -> Result<Enrollment, StoreError>;

    async fn find_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    /// Active rows with `next_send_at <= now`, ordered by `next_send_at`.
    async fn find_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Enrollment>, StoreError>;

    /// All rows for `email` in any status, optionally filtered by sequence.
    async fn list_for_email(
        &self,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, StoreError>;

    /// Apply `advance` if the row is still active at `expected_step`.
    /// Returns whether the row was updated.
    async fn advance(
        &self,
        id: DbId,
        expected_step: i32,
        advance: StepAdvance,
    ) -> Result<bool, StoreError>;

    /// Mark the active run for (email, sequence) as cancelled.
    async fn cancel_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

/// [`EnrollmentStore`] backed by the `sequence_enrollments` table.
#[derive(Clone)]
pub struct PgEnrollmentStore {
    pool: DbPool,
}

impl PgEnrollmentStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentStore for PgEnrollmentStore {
    async fn create(&self, input: &CreateEnrollment) -> Result<Enrollment, StoreError> {
        EnrollmentRepo::create(&self.pool, input)
            .await
            .map_err(|err| {
                if is_active_conflict(&err) {
                    StoreError::ActiveConflict {
                        email: input.email.clone(),
                        sequence_id: input.sequence_id.clone(),
                    }
                } else {
                    StoreError::Database(err)
                }
            })
    }

    async fn find_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(EnrollmentRepo::find_active(&self.pool, email, sequence_id).await?)
    }

    async fn find_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Enrollment>, StoreError> {
        Ok(EnrollmentRepo::list_due(&self.pool, now, limit).await?)
    }

    async fn list_for_email(
        &self,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, StoreError> {
        Ok(EnrollmentRepo::list_for_email(&self.pool, email, sequence_id).await?)
    }

    async fn advance(
        &self,
        id: DbId,
        expected_step: i32,
        advance: StepAdvance,
    ) -> Result<bool, StoreError> {
        Ok(EnrollmentRepo::advance(&self.pool, id, expected_step, advance).await?)
    }

    async fn cancel_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(EnrollmentRepo::cancel_active(&self.pool, email, sequence_id).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(drip_db::health_check(&self.pool).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    rows: Vec<Enrollment>,
    next_id: DbId,
}

/// Process-local [`EnrollmentStore`] with the same uniqueness and
/// conditional-update rules as the Postgres schema.
#[derive(Default)]
pub struct MemoryEnrollmentStore {
    state: Mutex<MemoryState>,
}

impl MemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored row, in insertion order.
    pub fn all(&self) -> Vec<Enrollment> {
        self.state
            .lock()
            .map(|state| state.rows.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

fn is_active_for(row: &Enrollment, email: &str, sequence_id: &str) -> bool {
    row.status == EnrollmentStatus::Active && row.email == email && row.sequence_id == sequence_id
}

#[async_trait]
impl EnrollmentStore for MemoryEnrollmentStore {
    async fn create(&self, input: &CreateEnrollment) -> Result<Enrollment, StoreError> {
        let mut state = self.lock()?;
        if state
            .rows
            .iter()
            .any(|row| is_active_for(row, &input.email, &input.sequence_id))
        {
            return Err(StoreError::ActiveConflict {
                email: input.email.clone(),
                sequence_id: input.sequence_id.clone(),
            });
        }

        state.next_id += 1;
        let now = Utc::now();
        let row = Enrollment {
            id: state.next_id,
            email: input.email.clone(),
            sequence_id: input.sequence_id.clone(),
            current_step: 1,
            status: EnrollmentStatus::Active,
            source: input.source.clone(),
            started_at: input.started_at,
            next_send_at: Some(input.next_send_at),
            created_at: now,
            updated_at: now,
        };
        state.rows.push(row.clone());
        Ok(row)
    }

    async fn find_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .rows
            .iter()
            .find(|row| is_active_for(row, email, sequence_id))
            .cloned())
    }

    async fn find_due(&self, now: Timestamp, limit: i64) -> Result<Vec<Enrollment>, StoreError> {
        let state = self.lock()?;
        let mut due: Vec<Enrollment> = state
            .rows
            .iter()
            .filter(|row| row.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|row| (row.next_send_at, row.id));
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn list_for_email(
        &self,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<Enrollment> = state
            .rows
            .iter()
            .filter(|row| row.email == email)
            .filter(|row| sequence_id.map_or(true, |id| row.sequence_id == id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn advance(
        &self,
        id: DbId,
        expected_step: i32,
        advance: StepAdvance,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(row) = state.rows.iter_mut().find(|row| {
            row.id == id
                && row.current_step == expected_step
                && row.status == EnrollmentStatus::Active
        }) else {
            return Ok(false);
        };

        match advance {
            StepAdvance::Next { step, next_send_at } => {
                row.current_step = step;
                row.next_send_at = Some(next_send_at);
            }
            StepAdvance::Complete => {
                row.status = EnrollmentStatus::Completed;
                row.next_send_at = None;
            }
        }
        row.updated_at = Utc::now();
        Ok(true)
    }

    async fn cancel_active(
        &self,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let mut state = self.lock()?;
        let Some(row) = state
            .rows
            .iter_mut()
            .find(|row| is_active_for(row, email, sequence_id))
        else {
            return Ok(None);
        };
        row.status = EnrollmentStatus::Cancelled;
        row.next_send_at = None;
        row.updated_at = Utc::now();
        Ok(Some(row.clone()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
