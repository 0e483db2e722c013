//! WebSocket chat — token streaming for one session.
//!
//! The client sends `{"type": "message", "content": "...",
//! "enable_thinking": false}`. The server streams
//! `{"type": "token", "content": "..."}` frames and finishes with a
//! `{"type": "done", ...}` frame carrying the totals. Only the final
//! assembled message is persisted; partial tokens never touch the
//! store.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::StreamExt;
use serde::Deserialize;
use uuid::Uuid;

use sw_domain::llm::LlmResult;
use sw_providers::StreamEvent;

use crate::api::chat::interactive_deadline;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    #[allow(dead_code)]
    enable_thinking: bool,
}

pub async fn chat_ws(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(state, session_id, socket))
}

async fn handle_socket(state: AppState, session_id: Uuid, mut socket: WebSocket) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(raw) = message else {
            continue;
        };
        let frame: ClientFrame = match serde_json::from_str(&raw) {
            Ok(f) => f,
            Err(e) => {
                send_error(&mut socket, &format!("malformed frame: {e}")).await;
                continue;
            }
        };
        if frame.kind != "message" {
            send_error(&mut socket, &format!("unknown frame type '{}'", frame.kind)).await;
            continue;
        }
        if frame.content.trim().is_empty() {
            send_error(&mut socket, "content must not be empty").await;
            continue;
        }

        if let Err(e) = run_streaming_turn(&state, session_id, &frame.content, &mut socket).await {
            send_error(&mut socket, &e.to_string()).await;
        }
    }
}

async fn run_streaming_turn(
    state: &AppState,
    session_id: Uuid,
    content: &str,
    socket: &mut WebSocket,
) -> sw_domain::Result<()> {
    let catalog = state.catalog.get();
    let session = state
        .sessions
        .store()
        .get_session(session_id)
        .await?
        .ok_or_else(|| sw_domain::Error::Other(format!("session {session_id} not found")))?;
    if session.status.is_terminal() {
        return Err(sw_domain::Error::SessionClosed(session_id));
    }
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

    // History first, then the idempotent user append — same order the
    // pool uses, so the new message is not duplicated in the context.
    let history = state.store.list_messages(session_id).await?;
    state.sessions.append_user(session_id, content).await?;

    let defaults = &state.config.sessions;
    let messages = sw_sessions::compose_context(
        None,
        &sw_sessions::history_as_chat(&history),
        content,
        defaults.context_budget_tokens,
        defaults.keep_last_turns,
    );

    let deadline = Instant::now() + interactive_deadline(agent.timeout());
    let (spec, mut stream) = state
        .gateway
        .open_stream(
            &catalog,
            &agent,
            &messages,
            max_tokens,
            deadline,
            model_override.as_deref(),
        )
        .await?;

    let started = Instant::now();
    let mut assembled = String::new();
    let mut input_tokens = 0u32;
    let mut output_tokens = 0u32;
    let mut finish_reason = "stop".to_owned();

    while let Some(event) = stream.next().await {
        match event {
            Ok(StreamEvent::Delta { content }) => {
                assembled.push_str(&content);
                let frame = serde_json::json!({ "type": "token", "content": content });
                if socket
                    .send(Message::Text(frame.to_string()))
                    .await
                    .is_err()
                {
                    // Client went away: drop the stream; nothing partial
                    // is persisted.
                    return Ok(());
                }
            }
            Ok(StreamEvent::Done {
                input_tokens: it,
                output_tokens: ot,
                finish_reason: fr,
            }) => {
                input_tokens = it;
                output_tokens = ot;
                finish_reason = fr;
            }
            Err(e) => return Err(e),
        }
    }

    // Final delivery: commit the assembled message with its accounting.
    let cost_usd = spec.estimate_cost(input_tokens, output_tokens);
    let result = LlmResult {
        content: assembled,
        thinking: None,
        tool_calls: vec![],
        input_tokens,
        output_tokens,
        cost_usd,
        latency_ms: started.elapsed().as_millis() as u64,
        model_used: spec.id.clone(),
        finish_reason: finish_reason.clone(),
    };
    state.sessions.append_assistant(session_id, &result).await?;

    let done = serde_json::json!({
        "type": "done",
        "model": spec.id,
        "input_tokens": input_tokens,
        "output_tokens": output_tokens,
        "cost_usd": cost_usd,
        "latency_ms": result.latency_ms,
        "finish_reason": finish_reason,
    });
    let _ = socket.send(Message::Text(done.to_string())).await;
    Ok(())
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let frame = serde_json::json!({ "type": "error", "message": message });
    let _ = socket.send(Message::Text(frame.to_string())).await;
}
