//! On-demand session export: JSONL (one JSON object per message) or a
//! human-readable transcript. Both are derived views over the store —
//! nothing on disk is owned by the exporter.

use sw_domain::session::{MessageRecord, SessionRecord};

/// One message per line, ordered as stored.
pub fn to_jsonl(messages: &[MessageRecord]) -> String {
    let mut out = String::new();
    for msg in messages {
        match serde_json::to_string(msg) {
            Ok(line) => {
                out.push_str(&line);
                out.push('\n');
            }
            Err(e) => {
                tracing::warn!(message_id = %msg.id, error = %e, "skipping unserializable message");
            }
        }
    }
    out
}

/// Human-readable transcript with a small session header.
pub fn to_transcript(session: &SessionRecord, messages: &[MessageRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# session {} — agent {} ({}, {})\n",
        session.id,
        session.agent_id,
        session.session_type.as_str(),
        session.status.as_str(),
    ));
    out.push_str(&format!(
        "# tokens: {} in / {} out, cost ${:.4}\n\n",
        session.input_tokens, session.output_tokens, session.cost_usd,
    ));

    for msg in messages {
        out.push_str(&format!(
            "[{}] {}: {}\n",
            msg.created_at.format("%Y-%m-%d %H:%M:%S"),
            msg.role.as_str(),
            msg.content,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sw_domain::llm::Role;
    use sw_domain::session::{SessionStatus, SessionType};
    use uuid::Uuid;

    fn session() -> SessionRecord {
        SessionRecord {
            id: Uuid::nil(),
            agent_id: "devops".into(),
            session_type: SessionType::Interactive,
            status: SessionStatus::Active,
            parent_session_id: None,
            external_session_id: None,
            metadata: serde_json::json!({}),
            input_tokens: 12,
            output_tokens: 8,
            cost_usd: 0.0123,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    fn message(role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            role,
            content: content.into(),
            content_hash: "abc".into(),
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
    fn jsonl_one_line_per_message() {
        let msgs = vec![message(Role::User, "hi"), message(Role::Assistant, "hello")];
        let out = to_jsonl(&msgs);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed["content"].is_string());
        }
    }

    #[test]
    fn transcript_includes_header_and_roles() {
        let out = to_transcript(&session(), &[message(Role::User, "ping")]);
        assert!(out.contains("agent devops"));
        assert!(out.contains("user: ping"));
        assert!(out.contains("12 in / 8 out"));
    }
}
