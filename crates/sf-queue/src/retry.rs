use std::time::Duration;

use sf_config::QueueConfig;

/// Attempt budget and backoff schedule shared by both queue backends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_retries, config.retry_delays())
    }

    /// Total attempts per job, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next attempt after attempt `attempt` (1-based) failed.
    /// Attempts past the end of the schedule reuse its last entry.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        self.delays
            .get(index)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule_clamps_to_last_entry() {
        let policy = RetryPolicy::new(
            5,
            vec![Duration::from_secs(5), Duration::from_secs(15), Duration::from_secs(30)],
        );
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(2), Duration::from_secs(15));
        assert_eq!(policy.delay_after(3), Duration::from_secs(30));
        assert_eq!(policy.delay_after(4), Duration::from_secs(30));
        assert_eq!(policy.delay_after(0), Duration::from_secs(5));
    }

    #[test]
    fn test_defaults_follow_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
    }

    #[test]
    fn test_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0, vec![]).max_attempts(), 1);
        assert_eq!(RetryPolicy::new(0, vec![]).delay_after(1), Duration::ZERO);
    }
}
