pub mod health;
pub mod sequences;

use axum::Router;

use crate::state::AppState;

/// Build the application route tree.
///
/// ```text
/// /health                  service + store health
/// /sequences               enroll, status
/// /sequences/tick          send due steps (bearer)
/// /sequences/cancel        stop an active run (bearer)
/// /sequences/catalog       configured sequences
/// ```
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/sequences", sequences::router())
}
