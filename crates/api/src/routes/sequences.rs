//! Route definitions for the `/sequences` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sequences;
use crate::state::AppState;

/// Routes mounted at `/sequences`.
///
/// ```text
/// GET    /          -> status   (?email=&sequenceId=)
/// POST   /          -> enroll
/// GET    /tick      -> tick     (bearer)
/// POST   /tick      -> tick     (bearer)
/// POST   /cancel    -> cancel   (bearer)
/// GET    /catalog   -> catalog
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(sequences::status).post(sequences::enroll))
        .route("/tick", get(sequences::tick).post(sequences::tick))
        .route("/cancel", post(sequences::cancel))
        .route("/catalog", get(sequences::catalog))
}
