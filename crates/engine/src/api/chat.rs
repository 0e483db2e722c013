//! Chat session endpoints.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use sw_domain::session::{SessionStatus, SessionType};
use sw_sessions::{to_jsonl, to_transcript};

use crate::api::error::{ApiError, ApiResult};
use crate::runtime::pool::{Invocation, TaskSpec, TaskStatus};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub agent_id: Option<String>,
    /// Per-session model override (must name a catalog model).
    pub model: Option<String>,
    pub session_type: Option<String>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let catalog = state.catalog.get();

    let agent_id = body
        .agent_id
        .or_else(|| state.config.sessions.default_agent.clone())
        .ok_or_else(|| ApiError::bad_request("agent_id required (no default agent configured)"))?;
    let agent = catalog.agent(&agent_id)?.clone();

    if let Some(model) = &body.model {
        catalog.model(model)?; // reject unknown overrides up front
    }

    let session_type = match body.session_type.as_deref() {
        None => SessionType::Interactive,
        Some(raw) => raw
            .parse::<SessionType>()
            .map_err(|_| ApiError::bad_request(format!("unknown session_type '{raw}'")))?,
    };

    let mut metadata = serde_json::json!({});
    if let Some(model) = &body.model {
        metadata["model_override"] = serde_json::json!(model);
    }
    if let Some(t) = body.temperature {
        metadata["temperature"] = serde_json::json!(t);
    }
    if let Some(m) = body.max_tokens {
        metadata["max_tokens"] = serde_json::json!(m);
    }

    let session_id = state
        .sessions
        .open(&agent.id, session_type, None, metadata)
        .await?;

    if let Some(system) = &body.system_prompt {
        state.sessions.append_system(session_id, system).await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "id": session_id,
            "agent_id": agent.id,
            "model": body.model.unwrap_or_else(|| agent.model.clone()),
            "status": "active",
            "session_type": session_type.as_str(),
            "created_at": Utc::now(),
        })),
    ))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chat/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<sw_sessions::SessionView>> {
    let view = state
        .sessions
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id}")))?;
    Ok(Json(view))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
    #[serde(default)]
    pub enable_tools: bool,
}

pub async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PostMessageRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.content.trim().is_empty() {
        return Err(ApiError::bad_request("content must not be empty"));
    }

    let session = state
        .sessions
        .store()
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id}")))?;
    if session.status.is_terminal() {
        return Err(sw_domain::Error::SessionClosed(id).into());
    }

    let catalog = state.catalog.get();
    let agent = catalog.agent(&session.agent_id)?.clone();

    let model_override = session
        .metadata
        .get("model_override")
        .and_then(|v| v.as_str())
        .map(str::to_owned);
    let max_tokens = session
        .metadata
        .get("max_tokens")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);

    let spec = TaskSpec {
        agent_id: agent.id.clone(),
        prompt: body.content.clone(),
        session_id: Some(id),
        parent_session_id: session.parent_session_id,
        invocation: Invocation::Interactive,
        skill: None,
        spawn_depth: 0,
        model_override,
        max_tokens,
        deadline: interactive_deadline(agent.timeout()),
    };

    let rx = state.pool.submit(state.clone(), spec);
    let outcome = rx
        .await
        .map_err(|_| ApiError::bad_request("task dropped before completion"))?;

    match outcome.status {
        TaskStatus::Succeeded => Ok(Json(serde_json::json!({
            "session_id": id,
            "role": "assistant",
            "content": outcome.content,
            "model": outcome.model,
            "input_tokens": outcome.input_tokens,
            "output_tokens": outcome.output_tokens,
            "cost_usd": outcome.cost_usd,
            "latency_ms": outcome.latency_ms,
            "finish_reason": "stop",
        }))),
        _ if outcome.invariant => Err(ApiError::bad_request(
            outcome.error.unwrap_or_else(|| "invalid request".into()),
        )),
        // Degraded reply: the failing message comes back with
        // finish_reason "error" and the session stays active.
        _ => Ok(Json(serde_json::json!({
            "session_id": id,
            "role": "assistant",
            "content": "",
            "finish_reason": "error",
            "error": outcome.error,
        }))),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /chat/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .sessions
        .store()
        .get_session(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id}")))?;

    // Cancel a running task and cascade to sub-agent children; orphaned
    // child sessions are force-ended by the next scheduler wake.
    state.cancel_map.cancel(id);
    state.sessions.close(id, SessionStatus::Ended).await?;
    state.scheduler.wake();

    Ok(Json(serde_json::json!({ "id": id, "status": "ended" })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /chat/sessions/:id/export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

pub async fn export_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<([(axum::http::HeaderName, &'static str); 1], String)> {
    let view = state
        .sessions
        .fetch(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("session {id}")))?;

    match query.format.as_deref().unwrap_or("jsonl") {
        "jsonl" => Ok((
            [(axum::http::header::CONTENT_TYPE, "application/x-ndjson")],
            to_jsonl(&view.messages),
        )),
        "text" => Ok((
            [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            to_transcript(&view.session, &view.messages),
        )),
        other => Err(ApiError::bad_request(format!(
            "unknown export format '{other}' (expected jsonl or text)"
        ))),
    }
}

/// Room for the primary attempt plus at least one fallback, with a
/// floor so short agent timeouts don't starve the walk.
pub(crate) fn interactive_deadline(timeout: Duration) -> Duration {
    (timeout * 2).max(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interactive_deadline_has_floor() {
        assert_eq!(
            interactive_deadline(Duration::from_secs(5)),
            Duration::from_secs(30)
        );
        assert_eq!(
            interactive_deadline(Duration::from_secs(120)),
            Duration::from_secs(240)
        );
    }
}
