//! HTTP route definitions.

mod configs;
mod health;

use crate::router::Router;
use beacon_engine::TypeRegistry;
use std::sync::Arc;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The local config router
    pub router: Router,
    /// Payload registry used to validate ingested configs
    pub registry: Arc<TypeRegistry>,
}

/// Create all application routes.
pub fn create_routes() -> axum::Router<AppState> {
    axum::Router::new()
        .merge(health::routes())
        .merge(configs::routes())
}
