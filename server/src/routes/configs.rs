//! Configs endpoint.
//!
//! The wire surface of a beacon peer:
//!
//! - `GET    /v1/configs` returns the full store
//! - `PUT    /v1/configs` merges a store into the router
//! - `POST   /v1/configs` adds a single config
//! - `DELETE /v1/configs` adds a single tombstone
//! - `GET    /v1/configs/list` returns a type → id → version summary
//! - `GET    /v1/configs/{type}/{id}` returns one record or 404
//!
//! Everything ingested is validated here: identity fields must be
//! non-empty and any payload must decode through the type registry.
//! Rejected records are dropped with a 400 and never reach the mutator.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json,
};
use beacon_engine::{Config, ConfigList, ConfigResult, Store, Tombstone};

use super::AppState;
use crate::error::{AppError, Result};

/// Create config routes.
pub fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/v1/configs",
            get(pull_configs)
                .put(push_configs)
                .post(new_config)
                .delete(dead_config),
        )
        .route("/v1/configs/list", get(list_configs))
        .route("/v1/configs/{kind}/{id}", get(get_config))
}

fn validate_config(state: &AppState, config: &Config) -> Result<()> {
    config.validate()?;
    // Data-less records carry no payload to materialize.
    if !config.data.is_null() {
        state.registry.decode(config)?;
    }
    Ok(())
}

/// GET /v1/configs - return the full store.
async fn pull_configs(State(state): State<AppState>) -> Json<Store> {
    Json(state.router.pull_configs())
}

/// PUT /v1/configs - merge a store into the router.
async fn push_configs(
    State(state): State<AppState>,
    Json(store): Json<Store>,
) -> Result<StatusCode> {
    for config in store.configs() {
        validate_config(&state, config)?;
    }
    for tombstone in store.tombstones() {
        tombstone.validate()?;
    }

    state.router.push_configs(store).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/configs - add a single config.
async fn new_config(
    State(state): State<AppState>,
    Json(config): Json<Config>,
) -> Result<StatusCode> {
    validate_config(&state, &config)?;

    state.router.new_config(config).await;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /v1/configs - add a single tombstone.
async fn dead_config(
    State(state): State<AppState>,
    Json(tombstone): Json<Tombstone>,
) -> Result<StatusCode> {
    tombstone.validate()?;

    state.router.dead_config(tombstone).await;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/configs/list - summarize the live configs.
async fn list_configs(State(state): State<AppState>) -> Json<ConfigList> {
    Json(state.router.state().store().list())
}

/// GET /v1/configs/{type}/{id} - return a single record.
async fn get_config(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<ConfigResult>> {
    state
        .router
        .state()
        .store()
        .get(&kind, &id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no config '{id}' of type '{kind}'")))
}
