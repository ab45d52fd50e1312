//! Health check endpoint.

use axum::{extract::State, routing::get, Json};
use serde::Serialize;

use super::AppState;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Configs and tombstones currently resident in the router
    pub records: usize,
}

/// Create health routes.
pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Health check handler.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: state.router.state().store().len(),
    })
}

/// Root handler.
async fn root() -> &'static str {
    "Beacon Config Server"
}
