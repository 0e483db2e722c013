//! Session store layer: chat sessions with ordered, hash-deduplicated
//! message histories, context-window composition, and export.

mod context;
mod export;
mod service;

pub use context::{compose_context, estimate_tokens};
pub use export::{to_jsonl, to_transcript};
pub use service::{history_as_chat, SessionService, SessionView};
