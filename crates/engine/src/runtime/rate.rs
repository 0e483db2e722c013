//! Per-agent call rate limiting.
//!
//! Sliding one-minute window per agent. A limit of 0 means unlimited.
//! Exceeding the limit rejects the task up front — the next tick (or
//! the caller) retries; nothing queues.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

pub struct RateWindows {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateWindows {
    fn default() -> Self {
        Self::new()
    }
}

impl RateWindows {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to admit one call for the agent under its per-minute limit.
    pub fn try_acquire(&self, agent_id: &str, max_calls_per_minute: u32) -> bool {
        if max_calls_per_minute == 0 {
            return true;
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(agent_id.to_owned()).or_default();
        while window
            .front()
            .map(|t| now.duration_since(*t) >= WINDOW)
            .unwrap_or(false)
        {
            window.pop_front();
        }

        if window.len() >= max_calls_per_minute as usize {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop windows with no recent calls (periodic cleanup).
    pub fn prune_idle(&self) {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        windows.retain(|_, w| {
            w.back()
                .map(|t| now.duration_since(*t) < WINDOW)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_is_unlimited() {
        let rates = RateWindows::new();
        for _ in 0..1000 {
            assert!(rates.try_acquire("a", 0));
        }
    }

    #[test]
    fn limit_enforced_within_window() {
        let rates = RateWindows::new();
        assert!(rates.try_acquire("a", 2));
        assert!(rates.try_acquire("a", 2));
        assert!(!rates.try_acquire("a", 2));
    }

    #[test]
    fn agents_have_independent_windows() {
        let rates = RateWindows::new();
        assert!(rates.try_acquire("a", 1));
        assert!(!rates.try_acquire("a", 1));
        assert!(rates.try_acquire("b", 1));
    }

    #[test]
    fn prune_drops_idle_windows() {
        let rates = RateWindows::new();
        rates.try_acquire("a", 5);
        rates.prune_idle();
        // The window is recent, so it survives.
        assert_eq!(rates.windows.lock().len(), 1);
    }
}
