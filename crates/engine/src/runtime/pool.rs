//! Bounded agent pool.
//!
//! One global FIFO queue with at most `MAX_CONCURRENT` tasks in flight
//! across every dispatch path — cron fires, interactive chat, sub-agent
//! spawns, skill executions all pass through here. The semaphore is the
//! process-wide concurrency invariant; the scheduler additionally
//! defers instead of queueing when the pool is saturated.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use sw_domain::config::AgentSpec;
use sw_domain::error::{Error, Result};
use sw_domain::llm::LlmResult;
use sw_domain::session::{SessionStatus, SessionType};
use sw_sessions::{compose_context, history_as_chat};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a task entered the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Interactive,
    Cron { cron_id: String },
    SubAgent,
}

impl Invocation {
    pub fn session_type(&self, has_skill: bool) -> SessionType {
        match self {
            Invocation::Interactive if has_skill => SessionType::SkillExec,
            Invocation::Interactive => SessionType::Interactive,
            Invocation::Cron { .. } => SessionType::Cron,
            Invocation::SubAgent => SessionType::SubAgent,
        }
    }

    /// Pheromone task-type tag.
    pub fn task_type(&self) -> &'static str {
        match self {
            Invocation::Interactive => "interactive",
            Invocation::Cron { .. } => "cron",
            Invocation::SubAgent => "sub_agent",
        }
    }
}

/// A parsed `skill:` payload. Skill tasks bypass the LLM gateway and
/// invoke a registered [`crate::skills::Skill`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillCall {
    pub skill: String,
    pub function: String,
    pub args: serde_json::Value,
}

/// Parse a `skill:<name>.<function> [json-args]` payload. Returns
/// `None` for ordinary prompts.
pub fn parse_skill_payload(payload: &str) -> Option<SkillCall> {
    let rest = payload.strip_prefix("skill:")?;
    let (target, args_str) = match rest.split_once(char::is_whitespace) {
        Some((t, a)) => (t, a.trim()),
        None => (rest, ""),
    };
    let (skill, function) = target.split_once('.')?;
    if skill.is_empty() || function.is_empty() {
        return None;
    }
    let args = if args_str.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_str(args_str).ok()?
    };
    Some(SkillCall {
        skill: skill.to_owned(),
        function: function.to_owned(),
        args,
    })
}

#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub agent_id: String,
    /// The user message (or raw skill payload).
    pub prompt: String,
    /// Continue this session instead of opening one. Must be active and
    /// owned by `agent_id`.
    pub session_id: Option<Uuid>,
    pub parent_session_id: Option<Uuid>,
    pub invocation: Invocation,
    pub skill: Option<SkillCall>,
    pub spawn_depth: u32,
    pub model_override: Option<String>,
    pub max_tokens: Option<u32>,
    /// Hard wall-clock deadline for the whole task.
    pub deadline: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskOutcome {
    pub session_id: Option<Uuid>,
    pub status: TaskStatus,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// True when the failure was an invariant violation (non-rate-limit
    /// 4xx) — the API surfaces those as 422 instead of a degraded reply.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub invariant: bool,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TaskOutcome {
    fn failed(session_id: Option<Uuid>, error: &Error) -> Self {
        Self {
            session_id,
            status: TaskStatus::Failed,
            content: String::new(),
            error: Some(error.to_string()),
            invariant: matches!(error, Error::LlmInvariant { .. }),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            model: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentPool {
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    max_concurrent: usize,
}

/// A held pool slot: the permit plus the in-flight gauge bump. Dropping
/// it releases both.
pub(crate) struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AgentPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent: max,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Whether a new submission would start without waiting. The
    /// scheduler uses this to defer instead of queueing.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Wait (FIFO) for a slot. Returns `None` only if the semaphore was
    /// closed, which never happens in a running engine.
    pub(crate) async fn slot(&self) -> Option<PoolSlot> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(PoolSlot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Queue a task. The returned receiver resolves with the outcome;
    /// the task itself runs on the runtime under the global bound.
    pub fn submit(&self, state: AppState, spec: TaskSpec) -> oneshot::Receiver<TaskOutcome> {
        let (tx, rx) = oneshot::channel();

        let span = tracing::info_span!(
            "pool_task",
            agent_id = %spec.agent_id,
            task_type = spec.invocation.task_type(),
        );

        tokio::spawn(tracing::Instrument::instrument(
            async move {
                let Some(_slot) = state.pool.slot().await else {
                    let _ = tx.send(TaskOutcome::failed(
                        None,
                        &Error::Other("pool shut down".into()),
                    ));
                    return;
                };
                let outcome = run_task(&state, spec).await;
                let _ = tx.send(outcome);
            },
            span,
        ));

        rx
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_task(state: &AppState, spec: TaskSpec) -> TaskOutcome {
    let catalog = state.catalog.get();

    // 1. Resolve the agent — fail fast on unknown ids, before any
    //    session is created.
    let agent = match catalog.agent(&spec.agent_id) {
        Ok(a) => a.clone(),
        Err(e) => return TaskOutcome::failed(None, &e),
    };

    // Per-agent rate policy: reject up front, nothing queues.
    if !state
        .rates
        .try_acquire(&agent.id, agent.rate.max_calls_per_minute)
    {
        let err = Error::Other(format!(
            "agent '{}' over its rate limit ({}/min)",
            agent.id, agent.rate.max_calls_per_minute
        ));
        tracing::warn!(agent_id = %agent.id, "rate limit exceeded");
        return TaskOutcome::failed(None, &err);
    }

    // 2. Acquire a session.
    let session_id = match acquire_session(state, &spec, &agent).await {
        Ok(id) => id,
        Err(e) => return TaskOutcome::failed(None, &e),
    };

    let token = state.cancel_map.register(session_id);
    if let Some(parent) = spec.parent_session_id {
        state.cancel_map.add_to_group(parent, session_id);
    }

    let started = Instant::now();
    let outcome = execute(state, &catalog, &agent, &spec, session_id, &token).await;

    // Pheromone + agent state bookkeeping.
    let succeeded = outcome.status == TaskStatus::Succeeded;
    state.pheromones.record(
        &agent.id,
        spec.invocation.task_type(),
        succeeded,
        started.elapsed().as_millis() as u64,
        outcome.cost_usd,
    );
    if succeeded {
        if let Err(e) = state.store.touch_agent_state(&agent.id).await {
            tracing::warn!(agent_id = %agent.id, error = %e, "touch_agent_state failed");
        }
    }

    // 7. Cascade: any sub-agent children of this session get a cancel
    //    signal when the parent task completes.
    let cancelled_children = state.cancel_map.cancel_children(session_id);
    if cancelled_children > 0 {
        tracing::info!(
            session_id = %session_id,
            children = cancelled_children,
            "cancelled orphaned sub-agent tasks"
        );
    }
    state.cancel_map.remove(session_id);
    if let Some(parent) = spec.parent_session_id {
        state.cancel_map.remove_from_group(parent, session_id);
    }

    // Sub-agent sessions end with their task.
    if spec.invocation == Invocation::SubAgent {
        let status = if succeeded {
            SessionStatus::Ended
        } else {
            SessionStatus::Failed
        };
        if let Err(e) = state.sessions.close(session_id, status).await {
            // Already terminal (e.g. failure path closed it) is fine.
            tracing::debug!(session_id = %session_id, error = %e, "sub-agent session close");
        }
    }

    outcome
}

async fn acquire_session(state: &AppState, spec: &TaskSpec, agent: &AgentSpec) -> Result<Uuid> {
    match spec.session_id {
        Some(sid) => {
            state.sessions.validate_for_agent(sid, &agent.id).await?;
            Ok(sid)
        }
        None => {
            let mut metadata = serde_json::json!({});
            if let Invocation::Cron { cron_id } = &spec.invocation {
                metadata["cron_id"] = serde_json::json!(cron_id);
            }
            state
                .sessions
                .open(
                    &agent.id,
                    spec.invocation.session_type(spec.skill.is_some()),
                    spec.parent_session_id,
                    metadata,
                )
                .await
        }
    }
}

async fn execute(
    state: &AppState,
    catalog: &sw_domain::config::Catalog,
    agent: &AgentSpec,
    spec: &TaskSpec,
    session_id: Uuid,
    token: &tokio_util::sync::CancellationToken,
) -> TaskOutcome {
    if let Some(call) = &spec.skill {
        return run_skill(state, spec, call, session_id).await;
    }

    // 3. Compose the message list: persisted history + the new user
    //    message, trimmed to the context budget. History is read before
    //    the append so the new message isn't duplicated.
    let history = match state.store.list_messages(session_id).await {
        Ok(h) => h,
        Err(e) => return TaskOutcome::failed(Some(session_id), &e),
    };
    if let Err(e) = state.sessions.append_user(session_id, &spec.prompt).await {
        return TaskOutcome::failed(Some(session_id), &e);
    }

    let system_prompt = load_mind_prompt(agent);
    let defaults = &state.config.sessions;
    let messages = compose_context(
        system_prompt.as_deref(),
        &history_as_chat(&history),
        &spec.prompt,
        defaults.context_budget_tokens,
        defaults.keep_last_turns,
    );

    // 4. Call the gateway under the hard deadline and the cancel token.
    let deadline = Instant::now() + spec.deadline;
    let call = state.gateway.complete(
        catalog,
        agent,
        &messages,
        &[],
        spec.max_tokens,
        deadline,
        Some(session_id),
        spec.model_override.as_deref(),
    );

    tokio::select! {
        biased;

        _ = token.cancelled() => {
            // 6. Cancellation: close the session, no retries.
            tracing::info!(session_id = %session_id, "task cancelled");
            if let Err(e) = state.sessions.close(session_id, SessionStatus::Ended).await {
                tracing::debug!(session_id = %session_id, error = %e, "close after cancel");
            }
            TaskOutcome {
                session_id: Some(session_id),
                status: TaskStatus::Cancelled,
                content: String::new(),
                error: Some("cancelled".into()),
                invariant: false,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                model: None,
            }
        }

        _ = tokio::time::sleep(spec.deadline) => {
            // Hard deadline: the in-flight call future is dropped here.
            tracing::warn!(session_id = %session_id, "task deadline exceeded");
            fail_session(state, spec, session_id, "deadline exceeded").await;
            TaskOutcome {
                session_id: Some(session_id),
                status: TaskStatus::TimedOut,
                content: String::new(),
                error: Some("deadline exceeded".into()),
                invariant: false,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: spec.deadline.as_millis() as u64,
                model: None,
            }
        }

        result = call => match result {
            Ok(llm) => finish_success(state, session_id, llm).await,
            Err(err) => finish_failure(state, spec, session_id, err).await,
        },
    }
}

async fn finish_success(state: &AppState, session_id: Uuid, llm: LlmResult) -> TaskOutcome {
    // Idempotent on content hash: a retried identical response coalesces.
    if let Err(e) = state.sessions.append_assistant(session_id, &llm).await {
        return TaskOutcome::failed(Some(session_id), &e);
    }
    TaskOutcome {
        session_id: Some(session_id),
        status: TaskStatus::Succeeded,
        content: llm.content,
        error: None,
        invariant: false,
        input_tokens: llm.input_tokens,
        output_tokens: llm.output_tokens,
        cost_usd: llm.cost_usd,
        latency_ms: llm.latency_ms,
        model: Some(llm.model_used),
    }
}

async fn finish_failure(
    state: &AppState,
    spec: &TaskSpec,
    session_id: Uuid,
    err: Error,
) -> TaskOutcome {
    match &err {
        // 5. Exhausted / timed out: persist a synthetic failed message;
        //    cron sessions are marked failed, interactive sessions stay
        //    active with the error recorded.
        Error::LlmExhausted(_) | Error::Timeout(_) => {
            fail_session(state, spec, session_id, &err.to_string()).await;
            let status = if matches!(err, Error::Timeout(_)) {
                TaskStatus::TimedOut
            } else {
                TaskStatus::Failed
            };
            TaskOutcome {
                session_id: Some(session_id),
                status,
                content: String::new(),
                error: Some(err.to_string()),
                invariant: false,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: 0,
                model: None,
            }
        }
        // Everything else (invariant errors included) bubbles to the
        // caller untouched; the session stays active and nothing
        // cascades.
        _ => TaskOutcome::failed(Some(session_id), &err),
    }
}

/// Record the failure in the session: synthetic assistant message, and
/// a failed status for non-interactive sessions.
async fn fail_session(state: &AppState, spec: &TaskSpec, session_id: Uuid, cause: &str) {
    let model_hint = spec.model_override.as_deref().unwrap_or("none");
    if let Err(e) = state
        .sessions
        .append_failed(session_id, model_hint, cause)
        .await
    {
        tracing::warn!(session_id = %session_id, error = %e, "failed to append error message");
    }
    if !matches!(spec.invocation, Invocation::Interactive) {
        if let Err(e) = state.sessions.close(session_id, SessionStatus::Failed).await {
            tracing::debug!(session_id = %session_id, error = %e, "close after failure");
        }
    }
}

async fn run_skill(
    state: &AppState,
    spec: &TaskSpec,
    call: &SkillCall,
    session_id: Uuid,
) -> TaskOutcome {
    if let Err(e) = state.sessions.append_user(session_id, &spec.prompt).await {
        return TaskOutcome::failed(Some(session_id), &e);
    }

    let skill = match state.skills.get(&call.skill) {
        Ok(s) => s,
        Err(e) => {
            fail_session(state, spec, session_id, &e.to_string()).await;
            return TaskOutcome::failed(Some(session_id), &e);
        }
    };

    let started = Instant::now();
    let invocation = skill.invoke(&call.function, call.args.clone());
    let result = match tokio::time::timeout(spec.deadline, invocation).await {
        Ok(r) => r,
        Err(_) => {
            fail_session(state, spec, session_id, "skill deadline exceeded").await;
            return TaskOutcome {
                session_id: Some(session_id),
                status: TaskStatus::TimedOut,
                content: String::new(),
                error: Some("skill deadline exceeded".into()),
                invariant: false,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: spec.deadline.as_millis() as u64,
                model: None,
            };
        }
    };

    match result {
        Ok(value) => {
            let content = value.to_string();
            let llm = LlmResult {
                content: content.clone(),
                thinking: None,
                tool_calls: vec![],
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: started.elapsed().as_millis() as u64,
                model_used: format!("skill:{}", call.skill),
                finish_reason: "stop".into(),
            };
            if let Err(e) = state.sessions.append_assistant(session_id, &llm).await {
                return TaskOutcome::failed(Some(session_id), &e);
            }
            TaskOutcome {
                session_id: Some(session_id),
                status: TaskStatus::Succeeded,
                content,
                error: None,
                invariant: false,
                input_tokens: 0,
                output_tokens: 0,
                cost_usd: 0.0,
                latency_ms: llm.latency_ms,
                model: Some(llm.model_used),
            }
        }
        Err(e) => {
            fail_session(state, spec, session_id, &e.to_string()).await;
            TaskOutcome::failed(Some(session_id), &e)
        }
    }
}

/// Concatenate the agent's mind files into its system prompt. Missing
/// files are skipped with a warning rather than failing the task.
fn load_mind_prompt(agent: &AgentSpec) -> Option<String> {
    if agent.mind_files.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    for path in &agent.mind_files {
        match std::fs::read_to_string(path) {
            Ok(content) => parts.push(content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "mind file unreadable, skipping");
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sub-agent spawning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A running task's spawn budget: its own depth plus how many children
/// it has already spawned.
pub struct SpawnBudget {
    depth: u32,
    children: AtomicU32,
}

impl SpawnBudget {
    pub fn root() -> Self {
        Self::at_depth(0)
    }

    pub fn at_depth(depth: u32) -> Self {
        Self {
            depth,
            children: AtomicU32::new(0),
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn children_spawned(&self) -> u32 {
        self.children.load(Ordering::SeqCst)
    }
}

/// Spawn a sub-agent and wait for it. The child session's parent is the
/// spawning session; the child registers in the parent's cancel group
/// so cancelling the parent cascades.
///
/// Budget violations and safety vetoes are hard errors returned to the
/// caller — never a silent escalation and never a submission.
pub async fn spawn_sub_agent(
    state: &AppState,
    parent_session: Uuid,
    budget: &SpawnBudget,
    agent_id: &str,
    task: &str,
) -> Result<TaskOutcome> {
    state
        .safety
        .check_spawn(budget.depth, budget.children_spawned())?;

    let catalog = state.catalog.get();
    let agent = catalog.agent(agent_id)?;
    state.safety.admit_agent(&state.gateway, &catalog, agent)?;

    budget.children.fetch_add(1, Ordering::SeqCst);

    let spec = TaskSpec {
        agent_id: agent_id.to_owned(),
        prompt: task.to_owned(),
        session_id: None,
        parent_session_id: Some(parent_session),
        invocation: Invocation::SubAgent,
        skill: None,
        spawn_depth: budget.depth + 1,
        model_override: None,
        max_tokens: None,
        deadline: agent.timeout() * 2,
    };

    let rx = state.pool.submit(state.clone(), spec);
    rx.await
        .map_err(|_| Error::Cancelled("sub-agent task dropped".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
