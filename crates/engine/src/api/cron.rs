//! Cron management endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use sw_domain::cron::{CronEntry, CronSessionMode};

use crate::api::error::{ApiError, ApiResult};
use crate::runtime::{cron, scheduler};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CronRequest {
    pub id: Option<String>,
    pub name: String,
    pub schedule: String,
    pub payload: String,
    pub agent_id: String,
    #[serde(default)]
    pub session_mode: Option<CronSessionMode>,
    #[serde(default = "d_enabled")]
    pub enabled: bool,
    #[serde(default = "d_max_duration")]
    pub max_duration_secs: i64,
    #[serde(default)]
    pub retry_count: i32,
}

fn d_enabled() -> bool {
    true
}

fn d_max_duration() -> i64 {
    600
}

impl CronRequest {
    /// Validate and materialize into an entry. `existing` carries over
    /// creation and run timestamps on update.
    fn into_entry(self, state: &AppState, existing: Option<&CronEntry>) -> ApiResult<CronEntry> {
        cron::validate(&self.schedule)?;
        let catalog = state.catalog.get();
        catalog.agent(&self.agent_id)?;

        let now = Utc::now();
        let id = self
            .id
            .or_else(|| existing.map(|e| e.id.clone()))
            .unwrap_or_else(|| format!("cron-{}", uuid::Uuid::new_v4()));

        // Schedules fire forward only: enabling or editing never causes
        // a retroactive tick.
        let next_run_at = if self.enabled {
            cron::next_after(&self.schedule, &now)?
        } else {
            None
        };

        Ok(CronEntry {
            id,
            name: self.name,
            schedule: self.schedule,
            enabled: self.enabled,
            payload: self.payload,
            agent_id: self.agent_id,
            session_mode: self.session_mode.unwrap_or(CronSessionMode::Ephemeral),
            max_duration_secs: self.max_duration_secs.max(1),
            retry_count: self.retry_count.max(0),
            last_run_at: existing.and_then(|e| e.last_run_at),
            next_run_at,
            created_at: existing.map(|e| e.created_at).unwrap_or(now),
            updated_at: now,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_crons(State(state): State<AppState>) -> ApiResult<Json<Vec<CronEntry>>> {
    Ok(Json(state.store.list_crons().await?))
}

pub async fn create_cron(
    State(state): State<AppState>,
    Json(body): Json<CronRequest>,
) -> ApiResult<(StatusCode, Json<CronEntry>)> {
    let entry = body.into_entry(&state, None)?;
    if state.store.get_cron(&entry.id).await?.is_some() {
        return Err(ApiError::conflict(format!(
            "cron '{}' already exists",
            entry.id
        )));
    }
    state.store.upsert_cron(&entry).await?;
    state.scheduler.wake();
    tracing::info!(cron_id = %entry.id, schedule = %entry.schedule, "cron created");
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn get_cron(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<CronEntry>> {
    let entry = state
        .store
        .get_cron(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cron '{id}'")))?;
    Ok(Json(entry))
}

pub async fn update_cron(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut body): Json<CronRequest>,
) -> ApiResult<Json<CronEntry>> {
    let existing = state
        .store
        .get_cron(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cron '{id}'")))?;

    body.id = Some(id);
    let entry = body.into_entry(&state, Some(&existing))?;
    state.store.upsert_cron(&entry).await?;
    state.scheduler.wake();
    Ok(Json(entry))
}

pub async fn delete_cron(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    // Deleting a running entry cancels its in-flight task.
    if let Some(session_id) = state.scheduler.running_session(&id) {
        tracing::info!(cron_id = %id, session_id = %session_id, "cancelling in-flight run");
        state.cancel_map.cancel(session_id);
    }

    if !state.store.delete_cron(&id).await? {
        return Err(ApiError::not_found(format!("cron '{id}'")));
    }
    state.scheduler.wake();
    Ok(Json(serde_json::json!({ "id": id, "deleted": true })))
}

pub async fn trigger_cron(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let entry = state
        .store
        .get_cron(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cron '{id}'")))?;
    if !entry.enabled {
        return Err(ApiError::conflict(format!("cron '{id}' is disabled")));
    }

    let disposition = scheduler::fire_entry(&state, &entry, true).await;
    let body = match disposition {
        scheduler::FireDisposition::Submitted { session_id } => serde_json::json!({
            "id": id,
            "triggered": true,
            "session_id": session_id,
        }),
        scheduler::FireDisposition::Skipped(outcome) => serde_json::json!({
            "id": id,
            "triggered": false,
            "outcome": outcome.as_str(),
        }),
        scheduler::FireDisposition::Deferred => serde_json::json!({
            "id": id,
            "triggered": false,
            "outcome": "deferred",
        }),
    };
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "d_history_limit")]
    pub limit: i64,
}

fn d_history_limit() -> i64 {
    20
}

pub async fn cron_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<sw_domain::cron::CronExecution>>> {
    state
        .store
        .get_cron(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("cron '{id}'")))?;
    let history = state
        .store
        .list_cron_history(&id, query.limit.clamp(1, 500))
        .await?;
    Ok(Json(history))
}

pub async fn cron_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "running": true,
        "active_executions": state.scheduler.active_count(),
        "active_job_ids": state.scheduler.running_jobs(),
        "max_concurrent": state.pool.max_concurrent(),
    }))
}
