//! Cron entry and execution-history entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;

/// How the scheduler binds sessions to a job's runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronSessionMode {
    /// Fresh session per run, ended when the run completes.
    Ephemeral,
    /// One long-lived session shared by every run of this job.
    SharedByJob,
    /// Runs inside the target agent's long-lived root session.
    ParentOfAgent,
}

impl CronSessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CronSessionMode::Ephemeral => "ephemeral",
            CronSessionMode::SharedByJob => "shared_by_job",
            CronSessionMode::ParentOfAgent => "parent_of_agent",
        }
    }
}

impl std::str::FromStr for CronSessionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ephemeral" => Ok(Self::Ephemeral),
            "shared_by_job" => Ok(Self::SharedByJob),
            "parent_of_agent" => Ok(Self::ParentOfAgent),
            other => Err(Error::Other(format!("unknown session mode '{other}'"))),
        }
    }
}

/// Outcome of one scheduled tick for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronOutcome {
    Success,
    Failure,
    Timeout,
    /// The safety layer refused the submission (breakers open).
    SkippedCbOpen,
    /// The job was over its concurrency budget (previous run still
    /// in flight, or the pool had no capacity to defer into).
    SkippedOverBudget,
}

impl CronOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CronOutcome::Success => "success",
            CronOutcome::Failure => "failure",
            CronOutcome::Timeout => "timeout",
            CronOutcome::SkippedCbOpen => "skipped_cb_open",
            CronOutcome::SkippedOverBudget => "skipped_over_budget",
        }
    }
}

impl std::str::FromStr for CronOutcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "timeout" => Ok(Self::Timeout),
            "skipped_cb_open" => Ok(Self::SkippedCbOpen),
            "skipped_over_budget" => Ok(Self::SkippedOverBudget),
            other => Err(Error::Other(format!("unknown cron outcome '{other}'"))),
        }
    }
}

/// A persisted cron entry. `schedule` accepts the 5-field form
/// (`min hour dom month dow`) or the 6-field seconds-prefixed form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronEntry {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    /// The prompt (or skill invocation) fired at the target agent.
    pub payload: String,
    pub agent_id: String,
    pub session_mode: CronSessionMode,
    /// Hard deadline per run, in seconds.
    pub max_duration_secs: i64,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a job's execution history (append-only, trimmed to the
/// most recent N).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronExecution {
    pub cron_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: CronOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_roundtrip() {
        for o in [
            CronOutcome::Success,
            CronOutcome::Failure,
            CronOutcome::Timeout,
            CronOutcome::SkippedCbOpen,
            CronOutcome::SkippedOverBudget,
        ] {
            let parsed: CronOutcome = o.as_str().parse().unwrap();
            assert_eq!(parsed, o);
        }
    }

    #[test]
    fn session_mode_roundtrip() {
        for m in [
            CronSessionMode::Ephemeral,
            CronSessionMode::SharedByJob,
            CronSessionMode::ParentOfAgent,
        ] {
            let parsed: CronSessionMode = m.as_str().parse().unwrap();
            assert_eq!(parsed, m);
        }
        assert!("per_tick".parse::<CronSessionMode>().is_err());
    }

    #[test]
    fn outcome_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&CronOutcome::SkippedCbOpen).unwrap(),
            "\"skipped_cb_open\""
        );
    }
}
