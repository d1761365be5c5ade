//! Repository for the `sequence_enrollments` table.

use drip_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::enrollment::{CreateEnrollment, Enrollment, StepAdvance};

/// Column list for `sequence_enrollments` queries.
const COLUMNS: &str = "id, email, sequence_id, current_step, status, source, \
                       started_at, next_send_at, created_at, updated_at";

/// Partial unique index guarding one active run per (email, sequence).
pub const ACTIVE_UNIQUE_CONSTRAINT: &str = "uq_sequence_enrollments_active";

/// Provides CRUD operations for sequence enrollments.
pub struct EnrollmentRepo;

impl EnrollmentRepo {
    /// Insert a new active enrollment at step 1, returning the created row.
    ///
    /// Fails with a unique violation on [`ACTIVE_UNIQUE_CONSTRAINT`] if the
    /// subject already has an active run of this sequence; see
    /// [`is_active_conflict`].
    pub async fn create(pool: &PgPool, input: &CreateEnrollment) -> Result<Enrollment, sqlx::Error> {
        let query = format!(
            "INSERT INTO sequence_enrollments \
                 (email, sequence_id, current_step, status, source, started_at, next_send_at) \
             VALUES ($1, $2, 1, 'active', $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(&input.email)
            .bind(&input.sequence_id)
            .bind(&input.source)
            .bind(input.started_at)
            .bind(input.next_send_at)
            .fetch_one(pool)
            .await
    }

    /// Find an enrollment by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Enrollment>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sequence_enrollments WHERE id = $1");
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Find the active enrollment for a subject in a sequence, if any.
    pub async fn find_active(
        pool: &PgPool,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sequence_enrollments \
             WHERE email = $1 AND sequence_id = $2 AND status = 'active'"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(email)
            .bind(sequence_id)
            .fetch_optional(pool)
            .await
    }

    /// Active enrollments whose next send time is at or before `now`,
    /// oldest first.
    pub async fn list_due(
        pool: &PgPool,
        now: Timestamp,
        limit: i64,
    ) -> Result<Vec<Enrollment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sequence_enrollments \
             WHERE status = 'active' AND next_send_at <= $1 \
             ORDER BY next_send_at ASC, id ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Every enrollment (any status) for `email`, optionally narrowed to one
    /// sequence. Newest first.
    pub async fn list_for_email(
        pool: &PgPool,
        email: &str,
        sequence_id: Option<&str>,
    ) -> Result<Vec<Enrollment>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sequence_enrollments \
             WHERE email = $1 AND ($2::TEXT IS NULL OR sequence_id = $2) \
             ORDER BY started_at DESC, id DESC"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(email)
            .bind(sequence_id)
            .fetch_all(pool)
            .await
    }

    /// Record a delivered step.
    ///
    /// The update only applies while the row is still active at
    /// `expected_step`, so two overlapping ticks cannot both advance it.
    /// Returns `false` when the guard did not match.
    pub async fn advance(
        pool: &PgPool,
        id: DbId,
        expected_step: i32,
        advance: StepAdvance,
    ) -> Result<bool, sqlx::Error> {
        let result = match advance {
            StepAdvance::Next { step, next_send_at } => {
                sqlx::query(
                    "UPDATE sequence_enrollments \
                     SET current_step = $3, next_send_at = $4, updated_at = NOW() \
                     WHERE id = $1 AND current_step = $2 AND status = 'active'",
                )
                .bind(id)
                .bind(expected_step)
                .bind(step)
                .bind(next_send_at)
                .execute(pool)
                .await?
            }
            StepAdvance::Complete => {
                sqlx::query(
                    "UPDATE sequence_enrollments \
                     SET status = 'completed', next_send_at = NULL, updated_at = NOW() \
                     WHERE id = $1 AND current_step = $2 AND status = 'active'",
                )
                .bind(id)
                .bind(expected_step)
                .execute(pool)
                .await?
            }
        };

        let applied = result.rows_affected() > 0;
        if !applied {
            tracing::debug!(enrollment_id = id, expected_step, "Step advance guard did not match");
        }
        Ok(applied)
    }

    /// Cancel the active enrollment for a subject in a sequence.
    ///
    /// Returns the cancelled row, or `None` if there was no active run.
    pub async fn cancel_active(
        pool: &PgPool,
        email: &str,
        sequence_id: &str,
    ) -> Result<Option<Enrollment>, sqlx::Error> {
        let query = format!(
            "UPDATE sequence_enrollments \
             SET status = 'cancelled', next_send_at = NULL, updated_at = NOW() \
             WHERE email = $1 AND sequence_id = $2 AND status = 'active' \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Enrollment>(&query)
            .bind(email)
            .bind(sequence_id)
            .fetch_optional(pool)
            .await
    }
}

/// Whether `err` is a unique violation on the one-active-run index.
pub fn is_active_conflict(err: &sqlx::Error) -> bool {
    match err {
        // PostgreSQL unique constraint violation: error code 23505
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505")
                && db_err.constraint() == Some(ACTIVE_UNIQUE_CONSTRAINT)
        }
        _ => false,
    }
}
