//! Sequence enrollment entity models and DTOs.

use drip_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of an enrollment. Maps to the `enrollment_status` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

impl EnrollmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `sequence_enrollments` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: DbId,
    pub email: String,
    pub sequence_id: String,
    pub current_step: i32,
    pub status: EnrollmentStatus,
    pub source: Option<String>,
    pub started_at: Timestamp,
    pub next_send_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Enrollment {
    /// Active and scheduled at or before `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == EnrollmentStatus::Active
            && self.next_send_at.is_some_and(|at| at <= now)
    }
}

/// DTO for inserting a fresh enrollment at step 1.
#[derive(Debug, Clone)]
pub struct CreateEnrollment {
    pub email: String,
    pub sequence_id: String,
    pub source: Option<String>,
    pub started_at: Timestamp,
    pub next_send_at: Timestamp,
}

/// State change recorded after a step was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAdvance {
    /// Move to `step`, due at `next_send_at`.
    Next { step: i32, next_send_at: Timestamp },
    /// The final step went out; the enrollment is finished.
    Complete,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn enrollment(status: EnrollmentStatus, next_send_at: Option<Timestamp>) -> Enrollment {
        let now = Utc::now();
        Enrollment {
            id: 1,
            email: "a@example.com".to_string(),
            sequence_id: "welcome".to_string(),
            current_step: 1,
            status,
            source: None,
            started_at: now,
            next_send_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn due_when_active_and_past() {
        let now = Utc::now();
        assert!(enrollment(EnrollmentStatus::Active, Some(now)).is_due(now));
        assert!(!enrollment(EnrollmentStatus::Active, Some(now + Duration::minutes(1))).is_due(now));
    }

    #[test]
    fn never_due_when_not_active() {
        let now = Utc::now();
        assert!(!enrollment(EnrollmentStatus::Cancelled, Some(now)).is_due(now));
        assert!(!enrollment(EnrollmentStatus::Completed, None).is_due(now));
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(EnrollmentStatus::Cancelled).unwrap();
        assert_eq!(json, "cancelled");
        assert_eq!(EnrollmentStatus::Active.to_string(), "active");
    }

    #[test]
    fn enrollment_serializes_camel_case() {
        let json = serde_json::to_value(enrollment(EnrollmentStatus::Active, None)).unwrap();
        assert_eq!(json["sequenceId"], "welcome");
        assert_eq!(json["currentStep"], 1);
        assert!(json["nextSendAt"].is_null());
    }
}
