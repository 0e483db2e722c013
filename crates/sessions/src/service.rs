//! Session service — the layer every dispatch path goes through to
//! touch chat state. Sits on the persistence gateway and owns the
//! append conventions (idempotent hashes, synthetic failure messages,
//! running totals come for free from the store).

use std::sync::Arc;

use uuid::Uuid;

use sw_domain::error::{Error, Result};
use sw_domain::llm::{ChatMessage, LlmResult, Role};
use sw_domain::session::{MessageRecord, SessionRecord, SessionStatus, SessionType};
use sw_store::{AppendMeta, Store};

/// One consistent (session, messages) read.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: SessionRecord,
    pub messages: Vec<MessageRecord>,
}

pub struct SessionService {
    store: Arc<Store>,
}

impl SessionService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn open(
        &self,
        agent_id: &str,
        session_type: SessionType,
        parent: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Result<Uuid> {
        let id = self
            .store
            .create_session(agent_id, session_type, parent, metadata)
            .await?;
        tracing::info!(
            session_id = %id,
            agent_id,
            session_type = session_type.as_str(),
            "session opened"
        );
        Ok(id)
    }

    pub async fn append_user(&self, session_id: Uuid, content: &str) -> Result<Uuid> {
        self.store
            .append_message(session_id, Role::User, content, None)
            .await
    }

    pub async fn append_system(&self, session_id: Uuid, content: &str) -> Result<Uuid> {
        self.store
            .append_message(session_id, Role::System, content, None)
            .await
    }

    /// Persist a successful model response with its accounting.
    pub async fn append_assistant(&self, session_id: Uuid, result: &LlmResult) -> Result<Uuid> {
        let meta = AppendMeta {
            model: result.model_used.clone(),
            input_tokens: result.input_tokens as i32,
            output_tokens: result.output_tokens as i32,
            cost_usd: result.cost_usd,
            latency_ms: result.latency_ms as i64,
            finish_reason: Some(result.finish_reason.clone()),
            tool_calls: if result.tool_calls.is_empty() {
                None
            } else {
                Some(serde_json::to_value(&result.tool_calls)?)
            },
        };
        self.store
            .append_message(session_id, Role::Assistant, &result.content, Some(&meta))
            .await
    }

    /// Persist a synthetic assistant message for a failed call. Token
    /// counts are a legal zero, never NULL, and `finish_reason` is
    /// `"error"` with a terse cause.
    pub async fn append_failed(
        &self,
        session_id: Uuid,
        model_hint: &str,
        cause: &str,
    ) -> Result<Uuid> {
        let meta = AppendMeta {
            model: model_hint.to_owned(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            finish_reason: Some("error".into()),
            tool_calls: None,
        };
        let content = format!("[error] {cause}");
        self.store
            .append_message(session_id, Role::Assistant, &content, Some(&meta))
            .await
    }

    pub async fn close(&self, session_id: Uuid, status: SessionStatus) -> Result<()> {
        self.store.end_session(session_id, status).await?;
        tracing::info!(session_id = %session_id, status = status.as_str(), "session closed");
        Ok(())
    }

    pub async fn fetch(&self, session_id: Uuid) -> Result<Option<SessionView>> {
        let Some(session) = self.store.get_session(session_id).await? else {
            return Ok(None);
        };
        let messages = self.store.list_messages(session_id).await?;
        Ok(Some(SessionView { session, messages }))
    }

    /// The session a pool task will run in: a passed-in session must
    /// exist, be active, and belong to the resolved agent.
    pub async fn validate_for_agent(
        &self,
        session_id: Uuid,
        agent_id: &str,
    ) -> Result<SessionRecord> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::PersistenceConflict(format!("session {session_id} not found")))?;
        if session.status.is_terminal() {
            return Err(Error::SessionClosed(session_id));
        }
        if session.agent_id != agent_id {
            return Err(Error::PersistenceConflict(format!(
                "session {session_id} belongs to agent '{}', not '{agent_id}'",
                session.agent_id
            )));
        }
        Ok(session)
    }
}

/// Project persisted messages into the wire shape for a model call.
pub fn history_as_chat(messages: &[MessageRecord]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| ChatMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            role,
            content: content.into(),
            content_hash: String::new(),
            model: None,
            input_tokens: None,
            output_tokens: None,
            cost_usd: None,
            latency_ms: None,
            finish_reason: None,
            tool_calls: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn history_projection_preserves_order_and_roles() {
        let records = vec![
            record(Role::System, "sys"),
            record(Role::User, "q"),
            record(Role::Assistant, "a"),
        ];
        let chat = history_as_chat(&records);
        assert_eq!(chat.len(), 3);
        assert_eq!(chat[0].role, Role::System);
        assert_eq!(chat[2].content, "a");
    }
}
