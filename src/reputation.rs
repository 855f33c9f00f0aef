//! The reputation subsystem: a bounded `[0, 100]` score per witness, updated
//! asymmetrically (failures cost twice what successes earn at equal
//! importance) and capped history, used to weight the quorum lottery.

use serde::{Deserialize, Serialize};

const MAX_SCORE: f64 = 100.0;
const MIN_SCORE: f64 = 0.0;
const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub delta: f64,
    pub importance: f64,
    pub success: bool,
    pub score_after: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    pub score: f64,
    pub successful: u64,
    pub failed: u64,
    pub last_updated: i64,
    pub history: Vec<ReputationEvent>,
}

impl Default for Reputation {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Reputation {
    pub fn new(initial_score: f64) -> Self {
        Self {
            score: initial_score.clamp(MIN_SCORE, MAX_SCORE),
            successful: 0,
            failed: 0,
            last_updated: 0,
            history: Vec::new(),
        }
    }

    /// Seeds a plausible synthetic history for a non-control agent, per
    /// spec §4.4 `initialize` (`successful ≈ 50·(score/100)`,
    /// `failed ≈ 50·(1 − score/100)`).
    pub fn with_synthetic_history(score: f64, now: i64) -> Self {
        let mut rep = Self::new(score);
        rep.successful = (50.0 * (score / 100.0)).round() as u64;
        rep.failed = (50.0 * (1.0 - score / 100.0)).round() as u64;
        rep.last_updated = now;
        rep
    }

    fn push_history(&mut self, event: ReputationEvent) {
        self.history.push(event);
        if self.history.len() > MAX_HISTORY {
            let overflow = self.history.len() - MAX_HISTORY;
            self.history.drain(0..overflow);
        }
    }

    /// A successful validation. Onboarding slope: new (low-scoring) agents
    /// gain more per success than already-trusted ones.
    pub fn record_success(&mut self, importance: f64, now: i64) {
        let delta = importance * (0.5 + (MAX_SCORE - self.score) / 200.0);
        self.score = (self.score + delta).min(MAX_SCORE);
        self.successful += 1;
        self.last_updated = now;
        self.push_history(ReputationEvent {
            delta,
            importance,
            success: true,
            score_after: self.score,
            timestamp: now,
        });
    }

    /// A caught failure (fraud, double-spend, etc). Penalties are twice as
    /// steep as the equivalent success at the same importance, and steeper
    /// still for already high-scoring agents — misbehaving witnesses with
    /// good standing have more to lose.
    pub fn record_failure(&mut self, importance: f64, now: i64) {
        let delta = importance * (0.5 + self.score / 200.0);
        self.score = (self.score - 2.0 * delta).max(MIN_SCORE);
        self.failed += 1;
        self.last_updated = now;
        self.push_history(ReputationEvent {
            delta,
            importance,
            success: false,
            score_after: self.score,
            timestamp: now,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn score_stays_within_bounds_under_repeated_failure() {
        let mut rep = Reputation::new(100.0);
        for i in 0..200 {
            rep.record_failure(2.0, i);
            assert!(rep.score >= 0.0 && rep.score <= 100.0);
        }
        assert_eq!(rep.score, 0.0);
    }

    #[test]
    fn score_stays_within_bounds_under_repeated_success() {
        let mut rep = Reputation::new(0.0);
        for i in 0..200 {
            rep.record_success(1.0, i);
            assert!(rep.score >= 0.0 && rep.score <= 100.0);
        }
        assert_eq!(rep.score, 100.0);
    }

    #[test]
    fn failure_penalty_is_twice_success_gain_at_equal_importance_and_score() {
        let mut a = Reputation::new(50.0);
        let mut b = Reputation::new(50.0);
        a.record_success(1.0, 0);
        b.record_failure(1.0, 0);
        let gain = a.score - 50.0;
        let loss = 50.0 - b.score;
        assert!((loss - 2.0 * gain).abs() < 1e-9);
    }

    #[test]
    fn history_is_capped_at_100_entries() {
        let mut rep = Reputation::new(50.0);
        for i in 0..150 {
            rep.record_success(1.0, i);
        }
        assert_eq!(rep.history.len(), 100);
    }

    #[test]
    fn synthetic_history_matches_formula() {
        let rep = Reputation::with_synthetic_history(80.0, 0);
        assert_eq!(rep.successful, 40);
        assert_eq!(rep.failed, 10);
    }
}
