//! Pheromone scores — rolling per-(agent, task-type) outcome aggregates.
//!
//! Used only as a tie-breaker when several agents are equally eligible
//! for a routing decision; an explicit request is never blocked by a
//! low score. Windows are bounded at 200 samples per agent and decay by
//! 0.95 per day of age. An agent with no history scores a neutral 0.5.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

const MAX_SAMPLES_PER_AGENT: usize = 200;
const DAILY_DECAY: f64 = 0.95;

pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone)]
struct Sample {
    task_type: String,
    success: bool,
    latency_ms: u64,
    cost_usd: f64,
    at: DateTime<Utc>,
}

impl Sample {
    fn weight(&self, now: DateTime<Utc>) -> f64 {
        let age_days = (now - self.at).num_seconds().max(0) as f64 / 86_400.0;
        DAILY_DECAY.powf(age_days)
    }

    /// Latency folded into (0, 1]: instant = 1.0, 30 s halves it.
    fn speed_score(&self) -> f64 {
        1.0 / (1.0 + self.latency_ms as f64 / 30_000.0)
    }

    /// Cost folded into (0, 1]: free = 1.0, one cent halves it.
    fn cost_score(&self) -> f64 {
        1.0 / (1.0 + self.cost_usd * 100.0)
    }
}

pub struct PheromoneBoard {
    windows: Mutex<HashMap<String, VecDeque<Sample>>>,
}

impl Default for PheromoneBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl PheromoneBoard {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(
        &self,
        agent_id: &str,
        task_type: &str,
        success: bool,
        latency_ms: u64,
        cost_usd: f64,
    ) {
        let mut windows = self.windows.lock();
        let window = windows.entry(agent_id.to_owned()).or_default();
        window.push_back(Sample {
            task_type: task_type.to_owned(),
            success,
            latency_ms,
            cost_usd,
            at: Utc::now(),
        });
        while window.len() > MAX_SAMPLES_PER_AGENT {
            window.pop_front();
        }
    }

    /// `0.6 * success_rate + 0.3 * speed + 0.1 * cost`, decay-weighted.
    pub fn score(&self, agent_id: &str, task_type: &str) -> f64 {
        let windows = self.windows.lock();
        let Some(window) = windows.get(agent_id) else {
            return NEUTRAL_SCORE;
        };

        let now = Utc::now();
        let mut weight_sum = 0.0;
        let mut success_acc = 0.0;
        let mut speed_acc = 0.0;
        let mut cost_acc = 0.0;

        for sample in window.iter().filter(|s| s.task_type == task_type) {
            let w = sample.weight(now);
            weight_sum += w;
            if sample.success {
                success_acc += w;
            }
            speed_acc += w * sample.speed_score();
            cost_acc += w * sample.cost_score();
        }

        if weight_sum <= f64::EPSILON {
            return NEUTRAL_SCORE;
        }

        0.6 * (success_acc / weight_sum)
            + 0.3 * (speed_acc / weight_sum)
            + 0.1 * (cost_acc / weight_sum)
    }

    /// Tie-break: the highest-scoring candidate for a task type. Ties
    /// fall back to the first candidate so the choice is deterministic.
    pub fn preferred_agent<'a>(&self, candidates: &'a [String], task_type: &str) -> Option<&'a str> {
        candidates
            .iter()
            .map(|id| (id, self.score(id, task_type)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(id, _)| id.as_str())
    }

    pub fn sample_count(&self, agent_id: &str) -> usize {
        self.windows
            .lock()
            .get(agent_id)
            .map(|w| w.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_is_neutral() {
        let board = PheromoneBoard::new();
        assert_eq!(board.score("nobody", "cron"), NEUTRAL_SCORE);
    }

    #[test]
    fn successes_score_above_failures() {
        let board = PheromoneBoard::new();
        for _ in 0..10 {
            board.record("good", "cron", true, 1_000, 0.001);
            board.record("bad", "cron", false, 1_000, 0.001);
        }
        assert!(board.score("good", "cron") > board.score("bad", "cron"));
        assert!(board.score("good", "cron") > NEUTRAL_SCORE);
        assert!(board.score("bad", "cron") < NEUTRAL_SCORE);
    }

    #[test]
    fn faster_and_cheaper_scores_higher() {
        let board = PheromoneBoard::new();
        for _ in 0..5 {
            board.record("fast", "cron", true, 500, 0.0001);
            board.record("slow", "cron", true, 60_000, 0.05);
        }
        assert!(board.score("fast", "cron") > board.score("slow", "cron"));
    }

    #[test]
    fn window_bounded_at_200_per_agent() {
        let board = PheromoneBoard::new();
        for _ in 0..250 {
            board.record("a", "cron", true, 100, 0.0);
        }
        assert_eq!(board.sample_count("a"), 200);
    }

    #[test]
    fn task_types_are_isolated() {
        let board = PheromoneBoard::new();
        for _ in 0..10 {
            board.record("a", "cron", false, 100, 0.0);
        }
        // No interactive samples -> neutral, despite cron failures.
        assert_eq!(board.score("a", "interactive"), NEUTRAL_SCORE);
    }

    #[test]
    fn preferred_agent_picks_highest() {
        let board = PheromoneBoard::new();
        board.record("a", "cron", false, 100, 0.0);
        board.record("b", "cron", true, 100, 0.0);
        let candidates = vec!["a".to_string(), "b".to_string()];
        assert_eq!(board.preferred_agent(&candidates, "cron"), Some("b"));
    }

    #[test]
    fn preferred_agent_empty_candidates() {
        let board = PheromoneBoard::new();
        assert_eq!(board.preferred_agent(&[], "cron"), None);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let board = PheromoneBoard::new();
        for _ in 0..50 {
            board.record("a", "t", true, 0, 0.0);
        }
        let s = board.score("a", "t");
        assert!(s > 0.0 && s <= 1.0);
    }
}
