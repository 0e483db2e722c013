//! Context-window composition.
//!
//! The pool concatenates persisted history with the new user message,
//! then trims from the oldest non-system message until the estimate
//! fits the budget. The system prompt and the last N turns survive
//! trimming unconditionally.

use sw_domain::llm::{ChatMessage, Role};

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32).div_ceil(4)
}

fn estimate_message(msg: &ChatMessage) -> u32 {
    // Small per-message envelope overhead on top of the content.
    4 + estimate_tokens(&msg.content)
}

/// Compose the message list for one model call.
pub fn compose_context(
    system_prompt: Option<&str>,
    history: &[ChatMessage],
    new_user: &str,
    budget_tokens: u32,
    keep_last_turns: usize,
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 2);
    if let Some(system) = system_prompt {
        messages.push(ChatMessage::system(system));
    }
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(new_user));

    trim_to_budget(&mut messages, budget_tokens, keep_last_turns);
    messages
}

/// Drop oldest non-system messages until the total fits `budget_tokens`.
fn trim_to_budget(messages: &mut Vec<ChatMessage>, budget_tokens: u32, keep_last_turns: usize) {
    // A "turn" is a user+assistant pair; keep twice that many trailing
    // messages regardless of budget.
    let keep_tail = keep_last_turns.saturating_mul(2).max(1);

    loop {
        let total: u32 = messages.iter().map(estimate_message).sum();
        if total <= budget_tokens {
            return;
        }

        // First droppable message: oldest non-system, outside the
        // protected tail.
        let protected_from = messages.len().saturating_sub(keep_tail);
        let victim = messages
            .iter()
            .position(|m| m.role != Role::System)
            .filter(|&idx| idx < protected_from);

        match victim {
            Some(idx) => {
                messages.remove(idx);
            }
            None => return, // nothing left to drop
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> [ChatMessage; 2] {
        [
            ChatMessage::user(format!("question {i} {}", "x".repeat(100))),
            ChatMessage::assistant(format!("answer {i} {}", "y".repeat(100))),
        ]
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn fits_without_trimming() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let out = compose_context(Some("be brief"), &history, "next", 10_000, 4);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].role, Role::System);
        assert_eq!(out.last().unwrap().content, "next");
    }

    #[test]
    fn trims_oldest_non_system_first() {
        let mut history = Vec::new();
        for i in 0..20 {
            history.extend(turn(i));
        }
        // Budget forces trimming but the tail must survive.
        let out = compose_context(Some("sys"), &history, "latest", 400, 2);

        assert_eq!(out[0].role, Role::System, "system prompt survives");
        assert_eq!(out.last().unwrap().content, "latest");
        // Oldest turns were dropped.
        assert!(!out.iter().any(|m| m.content.starts_with("question 0 ")));
        // The last two turns of history are in the protected tail.
        assert!(out.iter().any(|m| m.content.starts_with("answer 19 ")));
    }

    #[test]
    fn protected_tail_survives_tiny_budget() {
        let mut history = Vec::new();
        for i in 0..5 {
            history.extend(turn(i));
        }
        let out = compose_context(Some("sys"), &history, "latest", 1, 2);
        // System + 2*2 protected tail (which now includes the new user
        // message at the end).
        assert_eq!(out[0].role, Role::System);
        assert!(out.len() <= 1 + 4);
        assert_eq!(out.last().unwrap().content, "latest");
    }

    #[test]
    fn no_system_prompt() {
        let out = compose_context(None, &[], "solo", 100, 4);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
    }
}
