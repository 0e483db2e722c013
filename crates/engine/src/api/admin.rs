//! Health probe and admin operations.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiResult;
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.catalog.get().agent_count(),
        "pool": {
            "in_flight": state.pool.in_flight(),
            "max_concurrent": state.pool.max_concurrent(),
        },
    }))
}

/// POST /admin/reload — atomic catalog reload. Either the new catalog
/// fully replaces the old or the old remains; in-flight tasks keep the
/// view they started with.
pub async fn reload_config(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let catalog = sw_domain::config::load_catalog(&state.config)?;
    let agents = catalog.agent_count();
    state.catalog.swap(catalog);
    state.scheduler.wake();
    tracing::info!(agents, "catalog reloaded");
    Ok(Json(serde_json::json!({ "reloaded": true, "agents": agents })))
}

/// GET /admin/breakers — circuit-breaker registry snapshot.
pub async fn breakers(State(state): State<AppState>) -> Json<Vec<sw_providers::BreakerSnapshot>> {
    Json(state.gateway.breakers().snapshot())
}
