//! LLM gateway: the single choke point for outbound model traffic.
//! Tiered failover over the agent's candidate list, per-endpoint
//! circuit breakers, token/cost accounting through a pluggable sink.

mod breaker;
mod gateway;
mod openai;
mod traits;

pub use breaker::{
    BreakerDecision, BreakerRegistry, BreakerSnapshot, BreakerState, DEFAULT_COOLDOWN,
    DEFAULT_THRESHOLD, MAX_COOLDOWN,
};
pub use gateway::{breaker_key, LlmGateway};
pub use openai::HttpChatBackend;
pub use traits::{
    BoxStream, ChatBackend, ChatRequest, NullUsageSink, RawChatResponse, StreamEvent, UsageSink,
};
