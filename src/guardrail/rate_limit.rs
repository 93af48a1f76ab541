//! Sliding-window rate limiter keyed per (actor, tool) (§4.3 policy 4, §9)

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Deterministic sliding-window counter. Eviction happens at query time
/// rather than via a background timer, so behavior is the same under replay.
pub struct RateLimiter {
    counters: HashMap<String, VecDeque<Instant>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            counters: HashMap::new(),
            limit,
            window,
        }
    }

    fn key(actor: &str, tool: &str) -> String {
        format!("{actor}:{tool}")
    }

    /// Record one call attempt; returns `true` if it is within the limit.
    pub fn check_and_record(&mut self, actor: &str, tool: &str) -> bool {
        let now = Instant::now();
        let counter = self.counters.entry(Self::key(actor, tool)).or_default();
        while let Some(&front) = counter.front() {
            if now.duration_since(front) > self.window {
                counter.pop_front();
            } else {
                break;
            }
        }
        if counter.len() < self.limit {
            counter.push_back(now);
            true
        } else {
            false
        }
    }

    /// Seconds until the oldest call in the window expires.
    pub fn reset_after(&self, actor: &str, tool: &str) -> Duration {
        let Some(counter) = self.counters.get(&Self::key(actor, tool)) else {
            return Duration::ZERO;
        };
        let Some(&oldest) = counter.front() else {
            return Duration::ZERO;
        };
        self.window.saturating_sub(Instant::now().duration_since(oldest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let mut limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_and_record("user", "read_file"));
        assert!(limiter.check_and_record("user", "read_file"));
        assert!(!limiter.check_and_record("user", "read_file"));
    }

    #[test]
    fn limits_are_independent_per_tool() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check_and_record("user", "read_file"));
        assert!(limiter.check_and_record("user", "write_file"));
    }

    #[test]
    fn exactly_min_r_l_succeed() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let results: Vec<bool> = (0..5).map(|_| limiter.check_and_record("a", "t")).collect();
        assert_eq!(results.iter().filter(|r| **r).count(), 3);
    }
}
