//! Provider-agnostic request/response types and the backend seam.

use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;

use sw_domain::error::Result;
use sw_domain::llm::{ChatMessage, ModelUsage, ToolCall, ToolDefinition};

pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;

/// A single chat completion request, already bound to a model.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// What a backend returns before the gateway attaches cost accounting.
#[derive(Debug, Clone)]
pub struct RawChatResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
}

/// Incremental output from a streaming completion. Partial deltas are
/// display-only; callers persist nothing until `Done`.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Delta { content: String },
    Done {
        input_tokens: u32,
        output_tokens: u32,
        finish_reason: String,
    },
}

/// The HTTP seam. One implementation talks to OpenAI-compatible
/// endpoints; tests inject fakes.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        endpoint: &str,
        req: &ChatRequest,
        timeout: Duration,
    ) -> Result<RawChatResponse>;

    async fn chat_stream(
        &self,
        endpoint: &str,
        req: &ChatRequest,
        timeout: Duration,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    async fn embeddings(
        &self,
        endpoint: &str,
        model: &str,
        input: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>>;
}

/// Where the gateway reports every call attempt, successful or not.
#[async_trait::async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, usage: ModelUsage);
}

/// Sink that drops everything (tests, dry runs).
pub struct NullUsageSink;

#[async_trait::async_trait]
impl UsageSink for NullUsageSink {
    async fn record(&self, _usage: ModelUsage) {}
}
