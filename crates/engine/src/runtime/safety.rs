//! Cascade prevention.
//!
//! Process-wide rules applied before any pool submission or sub-agent
//! spawn. The failure mode these guard against: a dead upstream makes a
//! cron fire spawn fallback sub-agents against the same dead endpoint,
//! tick after tick, until hundreds of sessions and millions of tokens
//! have accumulated. Under a fully-down upstream the runtime must drop
//! to doing nothing.

use chrono::{DateTime, Duration, Utc};

use sw_domain::config::{AgentSpec, Catalog, SafetyConfig};
use sw_domain::error::{Error, Result};
use sw_providers::LlmGateway;

pub struct SafetyGate {
    limits: SafetyConfig,
}

impl SafetyGate {
    pub fn new(limits: SafetyConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SafetyConfig {
        &self.limits
    }

    /// Rule 1 — CB-open veto: refuse a submission when every candidate
    /// model for the agent is behind an open breaker. Nothing is
    /// spawned, nothing retries within this tick; the next scheduled
    /// tick re-evaluates.
    pub fn admit_agent(
        &self,
        gateway: &LlmGateway,
        catalog: &Catalog,
        agent: &AgentSpec,
    ) -> Result<()> {
        if gateway.all_candidates_blocked(catalog, agent) {
            return Err(Error::SafetyVeto(format!(
                "all candidate models for agent '{}' have open breakers",
                agent.id
            )));
        }
        Ok(())
    }

    /// Rule 2 — spawn budgets. `parent_depth` is the spawning task's
    /// depth (cron/interactive roots are 0); `children_spawned` is how
    /// many sub-agents that task has already spawned.
    pub fn check_spawn(&self, parent_depth: u32, children_spawned: u32) -> Result<()> {
        if parent_depth + 1 >= self.limits.max_depth {
            return Err(Error::SpawnBudgetExceeded(format!(
                "depth {} would exceed max_depth {}",
                parent_depth + 1,
                self.limits.max_depth
            )));
        }
        if children_spawned >= self.limits.max_children {
            return Err(Error::SpawnBudgetExceeded(format!(
                "task already spawned {} of max {} children",
                children_spawned, self.limits.max_children
            )));
        }
        Ok(())
    }

    /// Rule 5 — sessions active since before this instant get
    /// force-ended on the next scheduler wake.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.limits.stale_timeout_minutes)
    }

    pub fn max_concurrent(&self) -> usize {
        self.limits.max_concurrent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SafetyGate {
        SafetyGate::new(SafetyConfig::default())
    }

    #[test]
    fn root_may_spawn_one_level() {
        // Defaults: max_depth 2, max_children 3.
        let gate = gate();
        assert!(gate.check_spawn(0, 0).is_ok());
        assert!(gate.check_spawn(0, 2).is_ok());
    }

    #[test]
    fn depth_one_may_not_spawn_deeper() {
        let gate = gate();
        let err = gate.check_spawn(1, 0).unwrap_err();
        assert!(matches!(err, Error::SpawnBudgetExceeded(_)));
    }

    #[test]
    fn fourth_child_is_refused() {
        let gate = gate();
        let err = gate.check_spawn(0, 3).unwrap_err();
        assert!(matches!(err, Error::SpawnBudgetExceeded(_)));
    }

    #[test]
    fn stale_cutoff_is_threshold_in_the_past() {
        let gate = gate();
        let now = Utc::now();
        let cutoff = gate.stale_cutoff(now);
        assert_eq!(now - cutoff, Duration::minutes(60));
    }
}
