//! Shared-secret gate for the trigger endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use drip_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried the configured `CRON_SECRET` as a bearer
/// token.
///
/// Add it as the first extractor of a handler so rejected requests never
/// reach the store. When no secret is configured every request passes.
///
/// ```ignore
/// async fn tick(_auth: CronAuth, State(state): State<AppState>) -> AppResult<Json<TickResponse>> {
///     ...
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct CronAuth;

impl FromRequestParts<AppState> for CronAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(secret) = state.config.cron_secret.as_deref() else {
            return Ok(CronAuth);
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized("Missing bearer token".into()))
            })?;

        if !constant_time_eq(token.trim().as_bytes(), secret.as_bytes()) {
            return Err(AppError::Core(CoreError::Unauthorized(
                "Bearer token mismatch".into(),
            )));
        }

        Ok(CronAuth)
    }
}

/// Compare two byte strings without short-circuiting on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
