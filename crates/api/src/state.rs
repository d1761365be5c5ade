use std::sync::Arc;

use drip_sequencer::SequenceEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything lives behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Enrollment scheduler (owns the store, renderer and delivery channel).
    pub engine: Arc<SequenceEngine>,
    /// Server configuration (trigger secret read by the auth extractor).
    pub config: Arc<ServerConfig>,
}
