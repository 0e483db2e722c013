//! OpenAI-compatible HTTP backend.
//!
//! Works against LiteLLM, OpenAI, vLLM, Ollama and anything else that
//! speaks the `/v1/chat/completions` contract. The endpoint base URL
//! comes from the model spec per call, so a single backend serves every
//! configured provider.

use std::time::Duration;

use serde_json::Value;

use sw_domain::error::{Error, Result};
use sw_domain::llm::{ChatMessage, ToolCall, ToolDefinition};

use crate::traits::{BoxStream, ChatBackend, ChatRequest, RawChatResponse, StreamEvent};

pub struct HttpChatBackend {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl HttpChatBackend {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client, api_key })
    }

    fn post(&self, url: &str, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_chat_body(req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_wire).collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "stream": stream,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

#[async_trait::async_trait]
impl ChatBackend for HttpChatBackend {
    async fn chat(
        &self,
        endpoint: &str,
        req: &ChatRequest,
        timeout: Duration,
    ) -> Result<RawChatResponse> {
        let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));
        let body = Self::build_chat_body(req, false);

        let response = self
            .post(&url, timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(&req.model, e))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| classify_reqwest(&req.model, e))?;

        if !status.is_success() {
            return Err(classify_status(&req.model, status, &raw));
        }

        parse_chat_response(&req.model, &raw)
    }

    async fn chat_stream(
        &self,
        endpoint: &str,
        req: &ChatRequest,
        timeout: Duration,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/chat/completions", endpoint.trim_end_matches('/'));
        let body = Self::build_chat_body(req, true);
        let model = req.model.clone();

        let response = self
            .post(&url, timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(&model, e))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            return Err(classify_status(&model, status, &raw));
        }

        let stream = async_stream::stream! {
            let mut response = response;
            let mut buffer = String::new();
            let mut done_emitted = false;

            loop {
                match response.chunk().await {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in take_sse_payloads(&mut buffer) {
                            for event in parse_stream_data(&data) {
                                if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                    done_emitted = true;
                                }
                                yield event;
                            }
                        }
                    }
                    Ok(None) => {
                        if !buffer.trim().is_empty() {
                            buffer.push_str("\n\n");
                            for data in take_sse_payloads(&mut buffer) {
                                for event in parse_stream_data(&data) {
                                    if matches!(&event, Ok(StreamEvent::Done { .. })) {
                                        done_emitted = true;
                                    }
                                    yield event;
                                }
                            }
                        }
                        break;
                    }
                    Err(e) => {
                        yield Err(classify_reqwest(&model, e));
                        break;
                    }
                }
            }

            if !done_emitted {
                yield Ok(StreamEvent::Done {
                    input_tokens: 0,
                    output_tokens: 0,
                    finish_reason: "stop".into(),
                });
            }
        };

        Ok(Box::pin(stream))
    }

    async fn embeddings(
        &self,
        endpoint: &str,
        model: &str,
        input: &[String],
        timeout: Duration,
    ) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", endpoint.trim_end_matches('/'));
        let body = serde_json::json!({ "model": model, "input": input });

        let response = self
            .post(&url, timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(model, e))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| classify_reqwest(model, e))?;
        if !status.is_success() {
            return Err(classify_status(model, status, &raw));
        }

        parse_embeddings_response(model, &raw)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &ChatMessage) -> Value {
    serde_json::json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    })
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE framing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull complete SSE events out of the read buffer and return their
/// `data:` payloads. An event is a blank-line-terminated block; bytes
/// of a not-yet-complete trailing event stay in the buffer for the
/// next chunk.
fn take_sse_payloads(buffer: &mut String) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(end) = buffer.find("\n\n") {
        let event: String = buffer.drain(..end + 2).collect();
        payloads.extend(
            event
                .lines()
                .filter_map(|line| line.trim().strip_prefix("data:"))
                .map(|payload| payload.trim().to_owned())
                .filter(|payload| !payload.is_empty()),
        );
    }
    payloads
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(model: &str, raw: &str) -> Result<RawChatResponse> {
    let parsed: Value = serde_json::from_str(raw).map_err(|e| Error::LlmTransient {
        model: model.to_owned(),
        message: format!("malformed response body: {e}"),
    })?;

    let choice = parsed["choices"]
        .get(0)
        .ok_or_else(|| Error::LlmTransient {
            model: model.to_owned(),
            message: "response has no choices".into(),
        })?;
    let message = &choice["message"];

    let content = message["content"].as_str().unwrap_or_default().to_owned();
    let thinking = message["reasoning_content"].as_str().map(str::to_owned);

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let id = c["id"].as_str()?.to_owned();
                    let name = c["function"]["name"].as_str()?.to_owned();
                    let arguments = c["function"]["arguments"]
                        .as_str()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or(Value::Null);
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = &parsed["usage"];
    let input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
    let output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
    let finish_reason = choice["finish_reason"]
        .as_str()
        .unwrap_or("stop")
        .to_owned();

    Ok(RawChatResponse {
        content,
        thinking,
        tool_calls,
        input_tokens,
        output_tokens,
        finish_reason,
    })
}

fn parse_embeddings_response(model: &str, raw: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: Value = serde_json::from_str(raw).map_err(|e| Error::LlmTransient {
        model: model.to_owned(),
        message: format!("malformed embeddings response: {e}"),
    })?;
    let data = parsed["data"].as_array().ok_or_else(|| Error::LlmTransient {
        model: model.to_owned(),
        message: "embeddings response missing data array".into(),
    })?;

    let mut out = Vec::with_capacity(data.len());
    for item in data {
        let vector = item["embedding"]
            .as_array()
            .map(|v| v.iter().filter_map(|f| f.as_f64()).map(|f| f as f32).collect())
            .unwrap_or_default();
        out.push(vector);
    }
    Ok(out)
}

fn parse_stream_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data == "[DONE]" {
        return Vec::new();
    }
    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return Vec::new(), // tolerate keep-alive noise
    };

    let mut events = Vec::new();

    if let Some(delta) = parsed["choices"]
        .get(0)
        .and_then(|c| c["delta"]["content"].as_str())
    {
        if !delta.is_empty() {
            events.push(Ok(StreamEvent::Delta {
                content: delta.to_owned(),
            }));
        }
    }

    // The final usage frame (stream_options.include_usage) carries the
    // token counts; some proxies attach finish_reason on the same frame.
    if let Some(usage) = parsed["usage"].as_object() {
        let finish_reason = parsed["choices"]
            .get(0)
            .and_then(|c| c["finish_reason"].as_str())
            .unwrap_or("stop")
            .to_owned();
        events.push(Ok(StreamEvent::Done {
            input_tokens: usage
                .get("prompt_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            output_tokens: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            finish_reason,
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn classify_reqwest(model: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("model {model}: request timed out"))
    } else {
        Error::LlmTransient {
            model: model.to_owned(),
            message: e.to_string(),
        }
    }
}

/// 429 and every 5xx are transient (fallback-eligible); any other 4xx is
/// an invariant violation that would fail identically on every
/// candidate, so the gateway must not escalate it.
fn classify_status(model: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let message = extract_error_message(body).unwrap_or_else(|| format!("HTTP {status}"));

    if status.as_u16() == 429 || status.is_server_error() {
        Error::LlmTransient {
            model: model.to_owned(),
            message: format!("HTTP {}: {message}", status.as_u16()),
        }
    } else {
        Error::LlmInvariant {
            model: model.to_owned(),
            message: format!("HTTP {}: {message}", status.as_u16()),
        }
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed["error"]["message"]
        .as_str()
        .or_else(|| parsed["error"].as_str())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sw_domain::llm::Role;

    #[test]
    fn chat_body_shape() {
        let req = ChatRequest {
            model: "m1".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            tools: vec![],
            max_tokens: Some(256),
            temperature: Some(0.2),
        };
        let body = HttpChatBackend::build_chat_body(&req, false);
        assert_eq!(body["model"], "m1");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], false);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn chat_body_includes_tools_and_stream_usage() {
        let req = ChatRequest {
            model: "m1".into(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: "x".into(),
            }],
            tools: vec![ToolDefinition {
                name: "lookup".into(),
                description: "find things".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_tokens: None,
            temperature: None,
        };
        let body = HttpChatBackend::build_chat_body(&req, true);
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn parses_standard_response() {
        let raw = r#"{
            "choices": [{
                "message": {"content": "hello back"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3}
        }"#;
        let resp = parse_chat_response("m1", raw).unwrap();
        assert_eq!(resp.content, "hello back");
        assert_eq!(resp.input_tokens, 9);
        assert_eq!(resp.output_tokens, 3);
        assert_eq!(resp.finish_reason, "stop");
        assert!(resp.tool_calls.is_empty());
    }

    #[test]
    fn parses_tool_calls() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"x\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 2}
        }"#;
        let resp = parse_chat_response("m1", raw).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "lookup");
        assert_eq!(resp.tool_calls[0].arguments["q"], "x");
        assert_eq!(resp.finish_reason, "tool_calls");
    }

    #[test]
    fn missing_choices_is_transient() {
        let err = parse_chat_response("m1", "{}").unwrap_err();
        assert!(matches!(err, Error::LlmTransient { .. }));
    }

    #[test]
    fn malformed_body_is_transient() {
        let err = parse_chat_response("m1", "<html>gateway error</html>").unwrap_err();
        assert!(matches!(err, Error::LlmTransient { .. }));
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status("m", StatusCode::SERVICE_UNAVAILABLE, ""),
            Error::LlmTransient { .. }
        ));
        assert!(matches!(
            classify_status("m", StatusCode::TOO_MANY_REQUESTS, ""),
            Error::LlmTransient { .. }
        ));
        assert!(matches!(
            classify_status("m", StatusCode::BAD_REQUEST, ""),
            Error::LlmInvariant { .. }
        ));
        assert!(matches!(
            classify_status("m", StatusCode::UNPROCESSABLE_ENTITY, ""),
            Error::LlmInvariant { .. }
        ));
    }

    #[test]
    fn error_message_extracted_from_body() {
        let err = classify_status(
            "m",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "prompt too long"}}"#,
        );
        assert!(err.to_string().contains("prompt too long"));
    }

    #[test]
    fn stream_delta_and_usage_frames() {
        let events = parse_stream_data(r#"{"choices":[{"delta":{"content":"hel"}}]}"#);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Delta { ref content }) if content == "hel"
        ));

        let events = parse_stream_data(
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":5,"completion_tokens":7}}"#,
        );
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            Ok(StreamEvent::Done { input_tokens: 5, output_tokens: 7, .. })
        ));
    }

    #[test]
    fn stream_done_sentinel_yields_nothing() {
        assert!(parse_stream_data("[DONE]").is_empty());
    }

    #[test]
    fn sse_payloads_extracted_per_event() {
        let mut buf = String::from("event: chunk\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(take_sse_payloads(&mut buf), vec!["{\"a\":1}", "{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn sse_incomplete_event_stays_buffered() {
        let mut buf = String::from("data: whole\n\ndata: par");
        assert_eq!(take_sse_payloads(&mut buf), vec!["whole"]);
        assert_eq!(buf, "data: par");

        buf.push_str("tial\n\n");
        assert_eq!(take_sse_payloads(&mut buf), vec!["partial"]);
    }

    #[test]
    fn sse_ignores_non_data_fields_and_blanks() {
        let mut buf = String::from("event: ping\nid: 9\nretry: 3000\ndata: \n\ndata: kept\n\n");
        assert_eq!(take_sse_payloads(&mut buf), vec!["kept"]);
    }

    #[test]
    fn parses_embeddings_response() {
        let raw = r#"{"data": [
            {"embedding": [0.1, 0.2, 0.3]},
            {"embedding": [0.4, 0.5, 0.6]}
        ]}"#;
        let vectors = parse_embeddings_response("embed-1", raw).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 3);
        assert!((vectors[1][0] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn embeddings_missing_data_is_transient() {
        let err = parse_embeddings_response("embed-1", "{}").unwrap_err();
        assert!(matches!(err, Error::LlmTransient { .. }));
    }
}
