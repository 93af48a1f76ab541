//! Scheduler tick configuration, assembled from the ambient [`crate::config::Config`]
//! sections each sub-component already owns (C8, §4.8).

use std::time::Duration;

use crate::config::Config;

/// How many learnings to attach to a task's prompt context on dispatch (§4.8 step 5).
const DEFAULT_LEARNING_TOP_K: usize = 5;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Retry cap shared with the pool's own crash-retry cap (§4.8 retry policy, §5).
    pub max_attempts: u32,
    pub stale_goal_days: i64,
    pub blocked_task_hours: i64,
    pub min_confidence: f64,
    pub learning_top_k: usize,
}

impl From<&Config> for SchedulerConfig {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.loop_.interval_ms),
            max_attempts: config.pool.max_attempts,
            stale_goal_days: config.triggers.stale_goal_days,
            blocked_task_hours: config.triggers.blocked_task_hours,
            min_confidence: config.learning.min_confidence,
            learning_top_k: DEFAULT_LEARNING_TOP_K,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_from_ambient_config_sections() {
        let config = Config::default();
        let sched: SchedulerConfig = (&config).into();
        assert_eq!(sched.tick_interval, Duration::from_millis(10_000));
        assert_eq!(sched.max_attempts, 3);
        assert_eq!(sched.stale_goal_days, 3);
        assert_eq!(sched.blocked_task_hours, 24);
        assert_eq!(sched.min_confidence, 0.6);
    }
}
