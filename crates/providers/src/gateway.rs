//! The single choke point for outbound model traffic.
//!
//! Builds the ordered candidate list for an agent (primary, declared
//! fallbacks, then the catalog tier escalation), walks it under the
//! circuit breakers, and records a `ModelUsage` row for every attempt.
//! Invariant errors (non-rate-limit 4xx) stop the walk immediately —
//! the same request would fail identically on every candidate.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use sw_domain::config::{AgentSpec, Catalog, ModelSpec};
use sw_domain::error::{Error, Result};
use sw_domain::llm::{ChatMessage, LlmResult, ModelUsage, ToolDefinition};

use crate::breaker::{BreakerDecision, BreakerRegistry};
use crate::traits::{BoxStream, ChatBackend, ChatRequest, StreamEvent, UsageSink};

/// Breaker key for a model endpoint.
pub fn breaker_key(spec: &ModelSpec) -> String {
    format!("{}/{}", spec.provider_id, spec.id)
}

pub struct LlmGateway {
    backend: Arc<dyn ChatBackend>,
    breakers: Arc<BreakerRegistry>,
    usage: Arc<dyn UsageSink>,
    /// Base URL used when a model spec leaves its endpoint empty
    /// (the common LiteLLM single-proxy deployment).
    default_endpoint: String,
}

impl LlmGateway {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        breakers: Arc<BreakerRegistry>,
        usage: Arc<dyn UsageSink>,
        default_endpoint: String,
    ) -> Self {
        Self {
            backend,
            breakers,
            usage,
            default_endpoint,
        }
    }

    fn endpoint_for<'a>(&'a self, spec: &'a ModelSpec) -> &'a str {
        if spec.endpoint.is_empty() {
            &self.default_endpoint
        } else {
            &spec.endpoint
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// True when every candidate endpoint for the agent is refusing
    /// calls. The safety layer vetoes submissions in this state rather
    /// than spawning work that cannot reach a model.
    pub fn all_candidates_blocked(&self, catalog: &Catalog, agent: &AgentSpec) -> bool {
        let candidates = catalog.candidate_models(agent);
        if candidates.is_empty() {
            return true;
        }
        candidates
            .iter()
            .all(|spec| self.breakers.is_blocked(&breaker_key(spec)))
    }

    /// The candidate walk order: an explicit per-call preference (when
    /// it names a catalog model) ahead of the agent's usual chain.
    fn candidates<'a>(
        catalog: &'a Catalog,
        agent: &AgentSpec,
        preferred: Option<&str>,
    ) -> Vec<&'a ModelSpec> {
        let mut candidates = catalog.candidate_models(agent);
        if let Some(pref) = preferred {
            if let Ok(spec) = catalog.model(pref) {
                candidates.retain(|s| s.id != pref);
                candidates.insert(0, spec);
            }
        }
        candidates
    }

    /// Run one completion with tiered failover.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        catalog: &Catalog,
        agent: &AgentSpec,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        max_tokens: Option<u32>,
        deadline: Instant,
        session_id: Option<Uuid>,
        preferred: Option<&str>,
    ) -> Result<LlmResult> {
        for spec in Self::candidates(catalog, agent, preferred) {
            let key = breaker_key(spec);
            match self.breakers.check(&key) {
                BreakerDecision::Skip => {
                    tracing::debug!(endpoint = %key, "breaker open, skipping candidate");
                    continue;
                }
                BreakerDecision::Allow | BreakerDecision::Probe => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("invocation deadline exhausted".into()));
            }
            let timeout = agent.timeout().min(deadline - now);

            let req = ChatRequest {
                model: spec.id.clone(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                max_tokens,
                temperature: None,
            };

            let start = Instant::now();
            let attempt = self.backend.chat(self.endpoint_for(spec), &req, timeout).await;
            let latency_ms = start.elapsed().as_millis() as u64;

            match attempt {
                Ok(raw) => {
                    self.breakers.on_success(&key);
                    let cost_usd = spec.estimate_cost(raw.input_tokens, raw.output_tokens);
                    self.usage
                        .record(ModelUsage {
                            model: spec.id.clone(),
                            provider: spec.provider_id.clone(),
                            input_tokens: raw.input_tokens,
                            output_tokens: raw.output_tokens,
                            cost_usd,
                            latency_ms,
                            success: true,
                            error_message: None,
                            session_id,
                        })
                        .await;

                    return Ok(LlmResult {
                        content: raw.content,
                        thinking: raw.thinking,
                        tool_calls: raw.tool_calls,
                        input_tokens: raw.input_tokens,
                        output_tokens: raw.output_tokens,
                        cost_usd,
                        latency_ms,
                        model_used: spec.id.clone(),
                        finish_reason: raw.finish_reason,
                    });
                }
                Err(e) => {
                    self.usage
                        .record(ModelUsage {
                            model: spec.id.clone(),
                            provider: spec.provider_id.clone(),
                            input_tokens: 0,
                            output_tokens: 0,
                            cost_usd: 0.0,
                            latency_ms,
                            success: false,
                            error_message: Some(e.to_string()),
                            session_id,
                        })
                        .await;

                    if e.is_llm_retriable() {
                        self.breakers.on_failure(&key);
                        tracing::warn!(
                            endpoint = %key,
                            error = %e,
                            "candidate failed, trying next"
                        );
                        continue;
                    }
                    // Invariant error: return it untouched, breaker stays
                    // closed — the endpoint is healthy, the request is not.
                    return Err(e);
                }
            }
        }

        Err(Error::LlmExhausted(agent.id.clone()))
    }

    /// Open a token stream on the first available candidate. Transient
    /// connect failures walk the chain exactly like [`complete`]; once
    /// a stream is open there is no mid-stream failover.
    pub async fn open_stream(
        &self,
        catalog: &Catalog,
        agent: &AgentSpec,
        messages: &[ChatMessage],
        max_tokens: Option<u32>,
        deadline: Instant,
        preferred: Option<&str>,
    ) -> Result<(ModelSpec, BoxStream<'static, Result<StreamEvent>>)> {
        for spec in Self::candidates(catalog, agent, preferred) {
            let key = breaker_key(spec);
            match self.breakers.check(&key) {
                BreakerDecision::Skip => continue,
                BreakerDecision::Allow | BreakerDecision::Probe => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout("invocation deadline exhausted".into()));
            }
            let timeout = agent.timeout().min(deadline - now);

            let req = ChatRequest {
                model: spec.id.clone(),
                messages: messages.to_vec(),
                tools: Vec::new(),
                max_tokens,
                temperature: None,
            };

            match self.backend.chat_stream(self.endpoint_for(spec), &req, timeout).await {
                Ok(stream) => {
                    self.breakers.on_success(&key);
                    return Ok((spec.clone(), stream));
                }
                Err(e) if e.is_llm_retriable() => {
                    self.breakers.on_failure(&key);
                    tracing::warn!(endpoint = %key, error = %e, "stream connect failed");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::LlmExhausted(agent.id.clone()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::RawChatResponse;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use sw_domain::config::{AgentRole, CatalogFile, RatePolicy, RosterFile, Tier};

    /// Scripted backend: per-model queues of canned outcomes plus a call log.
    struct FakeBackend {
        script: Mutex<HashMap<String, Vec<Result<RawChatResponse>>>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push_ok(&self, model: &str, content: &str) {
            self.script
                .lock()
                .entry(model.to_owned())
                .or_default()
                .push(Ok(RawChatResponse {
                    content: content.to_owned(),
                    thinking: None,
                    tool_calls: vec![],
                    input_tokens: 10,
                    output_tokens: 5,
                    finish_reason: "stop".into(),
                }));
        }

        fn push_transient(&self, model: &str) {
            self.script
                .lock()
                .entry(model.to_owned())
                .or_default()
                .push(Err(Error::LlmTransient {
                    model: model.to_owned(),
                    message: "HTTP 503: upstream down".into(),
                }));
        }

        fn push_invariant(&self, model: &str) {
            self.script
                .lock()
                .entry(model.to_owned())
                .or_default()
                .push(Err(Error::LlmInvariant {
                    model: model.to_owned(),
                    message: "HTTP 400: prompt too long".into(),
                }));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for FakeBackend {
        async fn chat(
            &self,
            _endpoint: &str,
            req: &ChatRequest,
            _timeout: Duration,
        ) -> Result<RawChatResponse> {
            self.calls.lock().push(req.model.clone());
            let mut script = self.script.lock();
            let queue = script.entry(req.model.clone()).or_default();
            if queue.is_empty() {
                return Err(Error::LlmTransient {
                    model: req.model.clone(),
                    message: "unscripted call".into(),
                });
            }
            queue.remove(0)
        }

        async fn chat_stream(
            &self,
            _endpoint: &str,
            _req: &ChatRequest,
            _timeout: Duration,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            Err(Error::Other("streaming not scripted".into()))
        }

        async fn embeddings(
            &self,
            _endpoint: &str,
            _model: &str,
            _input: &[String],
            _timeout: Duration,
        ) -> Result<Vec<Vec<f32>>> {
            Ok(vec![])
        }
    }

    struct CollectingSink(Mutex<Vec<ModelUsage>>);

    #[async_trait::async_trait]
    impl UsageSink for CollectingSink {
        async fn record(&self, usage: ModelUsage) {
            self.0.lock().push(usage);
        }
    }

    fn catalog() -> Catalog {
        let models = vec![
            model("m1", Tier::Paid),
            model("m2", Tier::Free),
            model("m3", Tier::Local),
        ];
        let agents = vec![AgentSpec {
            id: "devops".into(),
            model: "m1".into(),
            fallbacks: vec!["m2".into()],
            parent: None,
            role: AgentRole::Coordinator,
            mind_files: vec![],
            timeout_secs: 5,
            rate: RatePolicy::default(),
            tags: vec![],
        }];
        Catalog::build(
            CatalogFile {
                models,
                tier_order: vec![Tier::Local, Tier::Free, Tier::Paid],
            },
            RosterFile { agents },
        )
        .unwrap()
    }

    fn model(id: &str, tier: Tier) -> sw_domain::config::ModelSpec {
        sw_domain::config::ModelSpec {
            id: id.into(),
            provider_id: "litellm".into(),
            endpoint: "http://localhost:4000".into(),
            context_window: 32_768,
            input_cost_per_1k: 1.0,
            output_cost_per_1k: 2.0,
            tier,
            supports_tools: true,
        }
    }

    fn gateway(backend: Arc<FakeBackend>) -> (LlmGateway, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let gw = LlmGateway::new(
            backend,
            Arc::new(BreakerRegistry::new(5, Duration::from_secs(60))),
            sink.clone(),
            "http://localhost:4000".into(),
        );
        (gw, sink)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test]
    async fn primary_success_records_one_usage() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_ok("m1", "hello");
        let (gw, sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        let result = gw
            .complete(&cat, agent, &[ChatMessage::user("hi")], &[], None, deadline(), None, None)
            .await
            .unwrap();

        assert_eq!(result.model_used, "m1");
        assert_eq!(result.content, "hello");
        // 10 in @ 1.0/1k + 5 out @ 2.0/1k
        assert!((result.cost_usd - 0.02).abs() < 1e-9);

        let usages = sink.0.lock();
        assert_eq!(usages.len(), 1);
        assert!(usages[0].success);
    }

    #[tokio::test]
    async fn transient_failure_falls_back() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_transient("m1");
        backend.push_ok("m2", "from fallback");
        let (gw, sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        let result = gw
            .complete(&cat, agent, &[ChatMessage::user("hi")], &[], None, deadline(), None, None)
            .await
            .unwrap();

        assert_eq!(result.model_used, "m2");
        assert_eq!(backend.calls(), vec!["m1", "m2"]);

        let usages = sink.0.lock();
        assert_eq!(usages.len(), 2);
        assert!(!usages[0].success);
        assert!(usages[1].success);

        // The failed candidate's breaker recorded the failure.
        assert_eq!(gw.breakers().consecutive_failures("litellm/m1"), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_is_skipped() {
        let backend = Arc::new(FakeBackend::new());
        for _ in 0..5 {
            backend.push_transient("m1");
        }
        // m2 succeeds every round so each complete() returns Ok.
        for _ in 0..6 {
            backend.push_ok("m2", "ok");
        }
        let (gw, _sink) = gateway(backend.clone());
        let cat = catalog();
        let agent = cat.agent("devops").unwrap();

        for _ in 0..5 {
            let r = gw
                .complete(&cat, agent, &[ChatMessage::user("x")], &[], None, deadline(), None, None)
                .await
                .unwrap();
            assert_eq!(r.model_used, "m2");
        }
        assert!(gw.breakers().is_blocked("litellm/m1"));

        // Sixth call: m1 never attempted.
        backend.calls.lock().clear();
        gw.complete(&cat, agent, &[ChatMessage::user("x")], &[], None, deadline(), None, None)
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec!["m2"]);
    }

    #[tokio::test]
    async fn invariant_error_short_circuits() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_invariant("m1");
        backend.push_ok("m2", "never used");
        let (gw, sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        let err = gw
            .complete(&cat, agent, &[ChatMessage::user("hi")], &[], None, deadline(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LlmInvariant { .. }));
        assert_eq!(backend.calls(), vec!["m1"], "no fallback on invariant");
        assert_eq!(sink.0.lock().len(), 1);
        // Invariant failures never open the breaker.
        assert!(!gw.breakers().is_blocked("litellm/m1"));
    }

    #[tokio::test]
    async fn all_candidates_failing_is_exhausted() {
        let backend = Arc::new(FakeBackend::new());
        for m in ["m1", "m2", "m3"] {
            backend.push_transient(m);
        }
        let (gw, sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        let err = gw
            .complete(&cat, agent, &[ChatMessage::user("hi")], &[], None, deadline(), None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LlmExhausted(_)));
        // Tier order adds m3 after the declared chain.
        assert_eq!(backend.calls(), vec!["m1", "m2", "m3"]);
        assert_eq!(sink.0.lock().len(), 3);
    }

    #[tokio::test]
    async fn repeated_calls_hit_the_same_model() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_ok("m1", "a");
        backend.push_ok("m1", "b");
        let (gw, _sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        for _ in 0..2 {
            let r = gw
                .complete(&cat, agent, &[ChatMessage::user("same")], &[], None, deadline(), None, None)
                .await
                .unwrap();
            assert_eq!(r.model_used, "m1");
        }
    }

    #[tokio::test]
    async fn expired_deadline_times_out() {
        let backend = Arc::new(FakeBackend::new());
        backend.push_ok("m1", "unused");
        let (gw, _sink) = gateway(backend.clone());

        let cat = catalog();
        let agent = cat.agent("devops").unwrap();
        let past = Instant::now() - Duration::from_millis(1);
        let err = gw
            .complete(&cat, agent, &[ChatMessage::user("hi")], &[], None, past, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn veto_helper_reflects_breaker_state() {
        let backend = Arc::new(FakeBackend::new());
        let (gw, _sink) = gateway(backend);
        let cat = catalog();
        let agent = cat.agent("devops").unwrap();

        assert!(!gw.all_candidates_blocked(&cat, agent));
        for key in ["litellm/m1", "litellm/m2", "litellm/m3"] {
            gw.breakers().force_open(key);
        }
        assert!(gw.all_candidates_blocked(&cat, agent));
    }
}
