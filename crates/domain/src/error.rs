/// Shared error type used across all swarmgate crates.
///
/// The variants mirror the runtime's failure semantics: persistence
/// failures split into retryable vs caller-bug, LLM failures split into
/// transient (absorbed by the gateway), invariant (returned immediately,
/// no fallback) and exhausted (every candidate failed).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    ConfigInvalid(String),

    #[error("store unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("store conflict: {0}")]
    PersistenceConflict(String),

    #[error("session {0} is closed")]
    SessionClosed(uuid::Uuid),

    #[error("model {model}: {message}")]
    LlmTransient { model: String, message: String },

    #[error("model {model} rejected request: {message}")]
    LlmInvariant { model: String, message: String },

    #[error("all candidate models failed for agent {0}")]
    LlmExhausted(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("safety veto: {0}")]
    SafetyVeto(String),

    #[error("spawn budget exceeded: {0}")]
    SpawnBudgetExceeded(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the gateway should try the next candidate model after
    /// this error. Invariant errors (bad prompt, bad tool spec) would
    /// fail identically everywhere, so they short-circuit.
    pub fn is_llm_retriable(&self) -> bool {
        matches!(
            self,
            Error::LlmTransient { .. } | Error::Timeout(_) | Error::Http(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retriable() {
        let e = Error::LlmTransient {
            model: "m1".into(),
            message: "HTTP 503".into(),
        };
        assert!(e.is_llm_retriable());
        assert!(Error::Timeout("deadline".into()).is_llm_retriable());
    }

    #[test]
    fn invariant_is_not_retriable() {
        let e = Error::LlmInvariant {
            model: "m1".into(),
            message: "prompt too long".into(),
        };
        assert!(!e.is_llm_retriable());
        assert!(!Error::SafetyVeto("breakers open".into()).is_llm_retriable());
    }

    #[test]
    fn session_closed_formats_id() {
        let id = uuid::Uuid::nil();
        let e = Error::SessionClosed(id);
        assert!(e.to_string().contains(&id.to_string()));
    }
}
