//! Cron scheduler.
//!
//! One loop owns the schedule: it sleeps until the earliest
//! `next_run_at` (or an external wake — entry edited, manual trigger,
//! reload), fires due entries through the safety layer into the pool,
//! and records every outcome in the execution history. Fire times are
//! recomputed from the wall clock, so a restart never replays a tick
//! and downtime ticks are simply lost — the scheduler is real-time,
//! not catch-up.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use sw_domain::cron::{CronEntry, CronExecution, CronOutcome, CronSessionMode};
use sw_domain::session::{SessionStatus, SessionType};

use super::cron;
use super::pool::{Invocation, TaskSpec};
use crate::state::{AppState, RunningJob};

pub struct Scheduler {
    state: AppState,
}

/// What happened when an entry was evaluated for firing.
#[derive(Debug, Clone)]
pub enum FireDisposition {
    /// Recorded in history without submitting to the pool.
    Skipped(CronOutcome),
    /// Submitted; the collector records the final outcome.
    Submitted { session_id: Option<Uuid> },
    /// Could not even record (store down); retried next tick.
    Deferred,
}

impl Scheduler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Spawn the scheduler loop.
    pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let scheduler = Scheduler::new(state);
            scheduler.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!("cron scheduler started");
        loop {
            let sleep_for = self.pass().await;
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.state.scheduler.wait() => {
                    tracing::debug!("scheduler woken early");
                }
            }
        }
    }

    /// One wake: sweep stale sessions, fire due entries, return how
    /// long to sleep until the next one.
    async fn pass(&self) -> Duration {
        let now = Utc::now();
        let idle = Duration::from_secs(self.state.config.scheduler.idle_wake_secs.max(1));

        self.sweep_stale(now).await;

        let entries = match self.state.store.list_crons().await {
            Ok(entries) => entries,
            Err(e) => {
                // Store down: defer the whole schedule, nothing is lost
                // beyond what couldn't be written.
                tracing::warn!(error = %e, "cron list unavailable, deferring");
                return idle;
            }
        };

        let mut earliest: Option<DateTime<Utc>> = None;
        for entry in entries.iter().filter(|e| e.enabled) {
            match entry.next_run_at {
                Some(next) if next <= now => {
                    fire_entry(&self.state, entry, false).await;
                    // fire advanced next_run_at; fold the new value in.
                    if let Ok(Some(next)) = cron::next_after(&entry.schedule, &now) {
                        earliest = min_time(earliest, next);
                    }
                }
                Some(next) => earliest = min_time(earliest, next),
                None => {
                    // Fresh or re-enabled entry: schedule forward only,
                    // never retroactively.
                    match cron::next_after(&entry.schedule, &now) {
                        Ok(Some(next)) => {
                            if let Err(e) =
                                self.state.store.set_cron_next_run(&entry.id, next).await
                            {
                                tracing::warn!(cron_id = %entry.id, error = %e, "failed to stamp next run");
                            }
                            earliest = min_time(earliest, next);
                        }
                        Ok(None) => {
                            tracing::warn!(cron_id = %entry.id, "expression never fires");
                        }
                        Err(e) => {
                            tracing::error!(cron_id = %entry.id, error = %e, "unparseable schedule");
                        }
                    }
                }
            }
        }

        match earliest {
            Some(t) => {
                let until = (t - Utc::now()).num_milliseconds().max(0) as u64;
                Duration::from_millis(until).min(idle)
            }
            None => idle,
        }
    }

    /// Safety rule 5: force-end sessions that have been active past the
    /// stale threshold, cancelling any task still attached to them.
    async fn sweep_stale(&self, now: DateTime<Utc>) {
        let cutoff = self.state.safety.stale_cutoff(now);
        let stale = match self.state.store.list_stale_active_sessions(cutoff).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "stale sweep skipped, store unavailable");
                return;
            }
        };

        for session in stale {
            tracing::warn!(
                session_id = %session.id,
                agent_id = %session.agent_id,
                age_minutes = (now - session.created_at).num_minutes(),
                "force-ending stale session"
            );
            if let Err(e) = self
                .state
                .sessions
                .close(session.id, SessionStatus::Failed)
                .await
            {
                tracing::debug!(session_id = %session.id, error = %e, "stale close");
            }
            self.state.cancel_map.cancel(session.id);

            // Cron-produced sessions get a timeout row in their history.
            if let Some(cron_id) = session.metadata.get("cron_id").and_then(|v| v.as_str()) {
                let exec = CronExecution {
                    cron_id: cron_id.to_owned(),
                    started_at: session.created_at,
                    ended_at: Some(now),
                    outcome: CronOutcome::Timeout,
                    session_id: Some(session.id),
                };
                if let Err(e) = self.state.store.append_cron_history(&exec).await {
                    tracing::warn!(cron_id, error = %e, "failed to record stale timeout");
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fire procedure
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fire one entry. Shared by the scheduler loop (`manual = false`,
/// advances `next_run_at`) and the trigger API/CLI (`manual = true`,
/// leaves the schedule untouched).
pub async fn fire_entry(state: &AppState, entry: &CronEntry, manual: bool) -> FireDisposition {
    let now = Utc::now();

    if !manual {
        // At-most-once per tick: stamp last/next from the wall clock
        // before anything else, so a crash mid-fire cannot replay.
        let next = cron::next_after(&entry.schedule, &now).ok().flatten();
        if let Err(e) = state.store.record_cron_run(&entry.id, now, next).await {
            tracing::warn!(cron_id = %entry.id, error = %e, "failed to stamp run, deferring");
            return FireDisposition::Deferred;
        }
    }

    // Still-running guard: ephemeral jobs never overlap themselves.
    // Not recorded in history — a slow run would otherwise bury its own
    // history under skip rows, one per tick.
    if entry.session_mode == CronSessionMode::Ephemeral && state.scheduler.is_running(&entry.id) {
        tracing::info!(cron_id = %entry.id, "previous run still in flight, skipping");
        return FireDisposition::Skipped(CronOutcome::SkippedOverBudget);
    }

    // Safety layer: CB-open veto.
    let catalog = state.catalog.get();
    let agent = match catalog.agent(&entry.agent_id) {
        Ok(a) => a.clone(),
        Err(e) => {
            tracing::error!(cron_id = %entry.id, error = %e, "target agent unknown");
            return skip(state, entry, now, CronOutcome::Failure).await;
        }
    };
    if let Err(e) = state.safety.admit_agent(&state.gateway, &catalog, &agent) {
        tracing::warn!(cron_id = %entry.id, error = %e, "safety veto, degraded");
        return skip(state, entry, now, CronOutcome::SkippedCbOpen).await;
    }

    // Global concurrency: defer rather than queue unboundedly.
    if !state.pool.has_capacity() {
        tracing::info!(cron_id = %entry.id, "pool saturated, deferring to next tick");
        return skip(state, entry, now, CronOutcome::SkippedOverBudget).await;
    }

    // Bind a session per the entry's mode.
    let session_id = match resolve_session(state, entry, &agent.id).await {
        Ok(sid) => sid,
        Err(e) => {
            tracing::warn!(cron_id = %entry.id, error = %e, "session resolution failed");
            return skip(state, entry, now, CronOutcome::Failure).await;
        }
    };

    let spec = TaskSpec {
        agent_id: entry.agent_id.clone(),
        prompt: entry.payload.clone(),
        session_id,
        parent_session_id: None,
        invocation: Invocation::Cron {
            cron_id: entry.id.clone(),
        },
        skill: super::pool::parse_skill_payload(&entry.payload),
        spawn_depth: 0,
        model_override: None,
        max_tokens: None,
        deadline: Duration::from_secs(entry.max_duration_secs.max(1) as u64),
    };

    state.scheduler.mark_running(
        &entry.id,
        RunningJob {
            session_id,
            started_at: now,
        },
    );

    let rx = state.pool.submit(state.clone(), spec);

    // Collector: wait for the outcome off the scheduler loop.
    let collector_state = state.clone();
    let collector_entry = entry.clone();
    tokio::spawn(async move {
        let outcome = rx.await.ok();
        finish_run(&collector_state, &collector_entry, now, outcome).await;
    });

    FireDisposition::Submitted { session_id }
}

async fn resolve_session(
    state: &AppState,
    entry: &CronEntry,
    agent_id: &str,
) -> sw_domain::Result<Option<Uuid>> {
    match entry.session_mode {
        // Fresh session per run, opened here so the scheduler can
        // cancel the in-flight task by session id; the collector closes
        // it when the run completes.
        CronSessionMode::Ephemeral => {
            let sid = state
                .sessions
                .open(
                    agent_id,
                    SessionType::Cron,
                    None,
                    serde_json::json!({ "cron_id": entry.id }),
                )
                .await?;
            Ok(Some(sid))
        }
        CronSessionMode::SharedByJob => {
            if let Some(existing) = state.store.find_shared_cron_session(&entry.id).await? {
                return Ok(Some(existing.id));
            }
            let sid = state
                .sessions
                .open(
                    agent_id,
                    SessionType::Cron,
                    None,
                    serde_json::json!({ "cron_id": entry.id }),
                )
                .await?;
            Ok(Some(sid))
        }
        CronSessionMode::ParentOfAgent => {
            if let Some(existing) = state.store.find_agent_root_session(agent_id).await? {
                return Ok(Some(existing.id));
            }
            let sid = state
                .sessions
                .open(
                    agent_id,
                    SessionType::Cron,
                    None,
                    serde_json::json!({ "cron_id": entry.id, "agent_root": agent_id }),
                )
                .await?;
            Ok(Some(sid))
        }
    }
}

async fn finish_run(
    state: &AppState,
    entry: &CronEntry,
    started_at: DateTime<Utc>,
    outcome: Option<super::pool::TaskOutcome>,
) {
    state.scheduler.clear_running(&entry.id);

    let (cron_outcome, session_id) = match &outcome {
        Some(o) => (outcome_for(o.status), o.session_id),
        // The pool dropped the channel — treat as failure.
        None => (CronOutcome::Failure, None),
    };

    // Ephemeral sessions end with the run (failure paths already closed
    // them as failed inside the pool).
    if entry.session_mode == CronSessionMode::Ephemeral {
        if let Some(sid) = session_id {
            if cron_outcome == CronOutcome::Success {
                if let Err(e) = state.sessions.close(sid, SessionStatus::Ended).await {
                    tracing::debug!(session_id = %sid, error = %e, "ephemeral close");
                }
            }
        }
    }

    let exec = CronExecution {
        cron_id: entry.id.clone(),
        started_at,
        ended_at: Some(Utc::now()),
        outcome: cron_outcome,
        session_id,
    };
    if let Err(e) = state.store.append_cron_history(&exec).await {
        tracing::warn!(cron_id = %entry.id, error = %e, "failed to record execution");
    }
    if let Err(e) = state
        .store
        .trim_cron_history(&entry.id, state.config.scheduler.history_keep)
        .await
    {
        tracing::warn!(cron_id = %entry.id, error = %e, "history trim failed");
    }

    tracing::info!(
        cron_id = %entry.id,
        outcome = cron_outcome.as_str(),
        "cron run finished"
    );
    state.scheduler.wake();
}

async fn skip(
    state: &AppState,
    entry: &CronEntry,
    now: DateTime<Utc>,
    outcome: CronOutcome,
) -> FireDisposition {
    let exec = CronExecution {
        cron_id: entry.id.clone(),
        started_at: now,
        ended_at: Some(now),
        outcome,
        session_id: None,
    };
    if let Err(e) = state.store.append_cron_history(&exec).await {
        tracing::warn!(cron_id = %entry.id, error = %e, "failed to record skip");
        return FireDisposition::Deferred;
    }
    FireDisposition::Skipped(outcome)
}

/// Map a pool outcome onto the execution-history taxonomy.
fn outcome_for(status: super::pool::TaskStatus) -> CronOutcome {
    use super::pool::TaskStatus;
    match status {
        TaskStatus::Succeeded => CronOutcome::Success,
        TaskStatus::Failed => CronOutcome::Failure,
        TaskStatus::TimedOut | TaskStatus::Cancelled => CronOutcome::Timeout,
    }
}

fn min_time(a: Option<DateTime<Utc>>, b: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(match a {
        Some(a) if a <= b => a,
        _ => b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::pool::TaskStatus;
    use chrono::TimeZone;

    #[test]
    fn outcome_mapping() {
        assert_eq!(outcome_for(TaskStatus::Succeeded), CronOutcome::Success);
        assert_eq!(outcome_for(TaskStatus::Failed), CronOutcome::Failure);
        assert_eq!(outcome_for(TaskStatus::TimedOut), CronOutcome::Timeout);
        assert_eq!(outcome_for(TaskStatus::Cancelled), CronOutcome::Timeout);
    }

    #[test]
    fn min_time_prefers_earlier() {
        let a = Utc.with_ymd_and_hms(2024, 6, 15, 10, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 6, 15, 11, 0, 0).unwrap();
        assert_eq!(min_time(None, a), Some(a));
        assert_eq!(min_time(Some(a), b), Some(a));
        assert_eq!(min_time(Some(b), a), Some(a));
    }
}
