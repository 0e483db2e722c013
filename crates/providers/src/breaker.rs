//! Per-endpoint circuit breakers.
//!
//! One breaker per (provider, model) endpoint. Closed endpoints pass
//! traffic; after `threshold` consecutive failures the breaker opens
//! for a cooldown that doubles on every reopen (capped), then admits a
//! single half-open probe. State is process-wide and in-memory only.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);
pub const MAX_COOLDOWN: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// What the gateway may do with a candidate endpoint right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Closed — call freely.
    Allow,
    /// Half-open — this caller holds the single probe slot.
    Probe,
    /// Open (or a probe is already in flight) — do not call.
    Skip,
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    /// Opens since the last success; drives the cooldown doubling.
    reopen_count: u32,
    probe_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: DEFAULT_COOLDOWN,
            reopen_count: 0,
            probe_in_flight: false,
        }
    }
}

/// Read-only view of one breaker, for status endpoints.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub endpoint: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

pub struct BreakerRegistry {
    threshold: u32,
    base_cooldown: Duration,
    entries: Mutex<HashMap<String, BreakerEntry>>,
}

impl BreakerRegistry {
    pub fn new(threshold: u32, base_cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            base_cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a call to `endpoint` may proceed. Transitions an
    /// open breaker to half-open once its cooldown has elapsed and hands
    /// the probe slot to the caller.
    pub fn check(&self, endpoint: &str) -> BreakerDecision {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(endpoint.to_owned())
            .or_insert_with(BreakerEntry::new);

        match entry.state {
            BreakerState::Closed => BreakerDecision::Allow,
            BreakerState::Open => {
                let elapsed = entry
                    .opened_at
                    .map(|t| t.elapsed() >= entry.cooldown)
                    .unwrap_or(true);
                if elapsed {
                    entry.state = BreakerState::HalfOpen;
                    entry.probe_in_flight = true;
                    tracing::info!(endpoint, "breaker half-open, admitting probe");
                    BreakerDecision::Probe
                } else {
                    BreakerDecision::Skip
                }
            }
            BreakerState::HalfOpen => {
                if entry.probe_in_flight {
                    BreakerDecision::Skip
                } else {
                    entry.probe_in_flight = true;
                    BreakerDecision::Probe
                }
            }
        }
    }

    /// Whether the endpoint is currently refusing calls (open and still
    /// cooling down). Used by the safety layer's veto without consuming
    /// the probe slot.
    pub fn is_blocked(&self, endpoint: &str) -> bool {
        let entries = self.entries.lock();
        match entries.get(endpoint) {
            Some(entry) => match entry.state {
                BreakerState::Closed => false,
                BreakerState::HalfOpen => entry.probe_in_flight,
                BreakerState::Open => entry
                    .opened_at
                    .map(|t| t.elapsed() < entry.cooldown)
                    .unwrap_or(false),
            },
            None => false,
        }
    }

    pub fn on_success(&self, endpoint: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(endpoint.to_owned())
            .or_insert_with(BreakerEntry::new);
        if entry.state != BreakerState::Closed {
            tracing::info!(endpoint, "breaker closed after success");
        }
        entry.state = BreakerState::Closed;
        entry.consecutive_failures = 0;
        entry.opened_at = None;
        entry.cooldown = self.base_cooldown;
        entry.reopen_count = 0;
        entry.probe_in_flight = false;
    }

    pub fn on_failure(&self, endpoint: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(endpoint.to_owned())
            .or_insert_with(BreakerEntry::new);
        entry.consecutive_failures += 1;
        entry.probe_in_flight = false;

        let should_open = match entry.state {
            // A failed probe reopens immediately.
            BreakerState::HalfOpen => true,
            BreakerState::Closed => entry.consecutive_failures >= self.threshold,
            BreakerState::Open => false,
        };

        if should_open {
            let shift = entry.reopen_count.min(16);
            let cooldown = self
                .base_cooldown
                .checked_mul(1u32 << shift)
                .unwrap_or(MAX_COOLDOWN)
                .min(MAX_COOLDOWN);
            entry.state = BreakerState::Open;
            entry.opened_at = Some(Instant::now());
            entry.cooldown = cooldown;
            entry.reopen_count += 1;
            tracing::warn!(
                endpoint,
                failures = entry.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "breaker opened"
            );
        }
    }

    pub fn consecutive_failures(&self, endpoint: &str) -> u32 {
        self.entries
            .lock()
            .get(endpoint)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let entries = self.entries.lock();
        let mut out: Vec<BreakerSnapshot> = entries
            .iter()
            .map(|(endpoint, e)| BreakerSnapshot {
                endpoint: endpoint.clone(),
                state: e.state,
                consecutive_failures: e.consecutive_failures,
            })
            .collect();
        out.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        out
    }

    /// Force a breaker open (tests and incident drills).
    pub fn force_open(&self, endpoint: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(endpoint.to_owned())
            .or_insert_with(BreakerEntry::new);
        entry.state = BreakerState::Open;
        entry.opened_at = Some(Instant::now());
        entry.cooldown = MAX_COOLDOWN;
        entry.consecutive_failures = entry.consecutive_failures.max(self.threshold);
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
    }
}
