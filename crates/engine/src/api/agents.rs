//! Agent pool introspection.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;

use sw_domain::session::SessionStatus;

use crate::api::error::{ApiError, ApiResult};
use crate::state::AppState;

/// GET /agents — pool status plus per-agent session counts.
pub async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let catalog = state.catalog.get();
    let stats = state.store.agent_session_stats().await?;

    let mut counts: HashMap<String, (i64, i64, i64)> = HashMap::new();
    for stat in stats {
        let entry = counts.entry(stat.agent_id).or_default();
        match stat.status {
            SessionStatus::Active => entry.0 += stat.count,
            SessionStatus::Ended => entry.1 += stat.count,
            SessionStatus::Failed => entry.2 += stat.count,
        }
    }

    let agents: Vec<serde_json::Value> = catalog
        .agent_ids()
        .into_iter()
        .filter_map(|id| catalog.agent(&id).ok().cloned())
        .map(|agent| {
            let (active, ended, failed) = counts.get(&agent.id).copied().unwrap_or((0, 0, 0));
            serde_json::json!({
                "id": agent.id,
                "role": agent.role,
                "model": agent.model,
                "fallbacks": agent.fallbacks,
                "sessions": {
                    "active": active,
                    "ended": ended,
                    "failed": failed,
                },
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "total": agents.len(),
        "max_concurrent": state.pool.max_concurrent(),
        "in_flight": state.pool.in_flight(),
        "agents": agents,
    })))
}

/// GET /agents/:id — one agent's summary with pheromone scores and the
/// breaker state of its candidate endpoints.
pub async fn get_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let catalog = state.catalog.get();
    let agent = catalog
        .agent(&id)
        .map_err(|_| ApiError::not_found(format!("agent '{id}'")))?
        .clone();

    let breakers: Vec<serde_json::Value> = catalog
        .candidate_models(&agent)
        .iter()
        .map(|spec| {
            let key = sw_providers::breaker_key(spec);
            let blocked = state.gateway.breakers().is_blocked(&key);
            serde_json::json!({
                "model": spec.id,
                "endpoint": key,
                "blocked": blocked,
            })
        })
        .collect();

    let pheromones: serde_json::Value = ["interactive", "cron", "sub_agent"]
        .iter()
        .map(|task_type| {
            (
                task_type.to_string(),
                serde_json::json!(state.pheromones.score(&agent.id, task_type)),
            )
        })
        .collect::<serde_json::Map<String, serde_json::Value>>()
        .into();

    Ok(Json(serde_json::json!({
        "id": agent.id,
        "role": agent.role,
        "model": agent.model,
        "fallbacks": agent.fallbacks,
        "parent": agent.parent,
        "timeout_secs": agent.timeout_secs,
        "tags": agent.tags,
        "pheromones": pheromones,
        "candidates": breakers,
    })))
}
