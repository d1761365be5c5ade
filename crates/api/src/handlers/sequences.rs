//! Handlers for the `/sequences` resource.
//!
//! Enrollment and status lookups are public. The tick trigger and
//! cancellation require the shared `CRON_SECRET` via [`CronAuth`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use drip_core::sequences::SequenceDefinition;
use drip_core::types::DbId;
use drip_db::models::enrollment::Enrollment;
use drip_sequencer::TickSummary;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::cron_auth::CronAuth;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /sequences`.
///
/// Fields are optional so a missing one yields a clear 400 instead of a
/// deserialization error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub email: Option<String>,
    pub sequence_id: Option<String>,
    pub source: Option<String>,
}

/// Body of `POST /sequences/cancel`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub email: Option<String>,
    pub sequence_id: Option<String>,
}

/// Query of `GET /sequences`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub email: Option<String>,
    pub sequence_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TickResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub results: TickSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
    pub sequence_record_id: DbId,
    pub current_step: i32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub sequences: Vec<Enrollment>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub enrollment: Enrollment,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub success: bool,
    pub sequences: Vec<SequenceDefinition>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET|POST /sequences/tick
///
/// Send every due step. Per-enrollment failures are reported in
/// `results.errors`; only a failure to read the due set returns 500.
pub async fn tick(_auth: CronAuth, State(state): State<AppState>) -> AppResult<Json<TickResponse>> {
    let results = state.engine.tick(Utc::now()).await?;
    let message = (results.processed == 0).then_some("No emails to send");
    Ok(Json(TickResponse {
        success: true,
        message,
        results,
    }))
}

/// POST /sequences
///
/// Enroll an address in a sequence. Returns 201 for a new enrollment and
/// 200 with the existing record when already enrolled.
pub async fn enroll(
    State(state): State<AppState>,
    body: Result<Json<EnrollRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<EnrollResponse>)> {
    let Json(input) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (email, sequence_id) = required_pair(input.email, input.sequence_id)?;

    let outcome = state
        .engine
        .enroll(&email, &sequence_id, input.source.as_deref(), Utc::now())
        .await?;

    let (status, message) = if outcome.created {
        (StatusCode::CREATED, None)
    } else {
        (StatusCode::OK, Some("Already enrolled in sequence"))
    };

    Ok((
        status,
        Json(EnrollResponse {
            success: true,
            message,
            sequence_record_id: outcome.enrollment.id,
            current_step: outcome.enrollment.current_step,
        }),
    ))
}

/// GET /sequences?email=...&sequenceId=...
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusQuery>,
) -> AppResult<Json<StatusResponse>> {
    let email = params
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest("email is required".into()))?;
    let sequence_id = params.sequence_id.filter(|s| !s.trim().is_empty());

    let sequences = state.engine.status(&email, sequence_id.as_deref()).await?;
    Ok(Json(StatusResponse {
        success: true,
        sequences,
    }))
}

/// POST /sequences/cancel
///
/// Stop the active run. 404 when nothing is active for the pair.
pub async fn cancel(
    _auth: CronAuth,
    State(state): State<AppState>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> AppResult<Json<CancelResponse>> {
    let Json(input) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (email, sequence_id) = required_pair(input.email, input.sequence_id)?;

    let enrollment = state
        .engine
        .cancel(&email, &sequence_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("No active enrollment in sequence '{sequence_id}'"))
        })?;

    Ok(Json(CancelResponse {
        success: true,
        enrollment,
    }))
}

/// GET /sequences/catalog
pub async fn catalog(State(state): State<AppState>) -> Json<CatalogResponse> {
    let sequences = state.engine.catalog().iter().cloned().collect();
    Json(CatalogResponse {
        success: true,
        sequences,
    })
}

/// Both `email` and `sequenceId` present and non-blank.
fn required_pair(
    email: Option<String>,
    sequence_id: Option<String>,
) -> Result<(String, String), AppError> {
    match (
        email.filter(|e| !e.trim().is_empty()),
        sequence_id.filter(|s| !s.trim().is_empty()),
    ) {
        (Some(email), Some(sequence_id)) => Ok((email, sequence_id.trim().to_string())),
        _ => Err(AppError::BadRequest(
            "email and sequenceId are required".into(),
        )),
    }
}
