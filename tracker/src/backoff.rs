use std::time::Duration;

/// Shape of an exponential backoff: `base`, `base * multiplier`, ... capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

/// Bounded retry state for a single operation within a single cycle.
///
/// `max_attempts` counts every attempt including the first one.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    max_attempts: u32,
    attempt: u32,
    next_delay: Duration,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy, max_attempts: u32) -> Self {
        Self {
            policy,
            max_attempts,
            attempt: 0,
            next_delay: policy.base.min(policy.max),
        }
    }

    /// Starts another attempt. Returns `false` once the ceiling is reached.
    pub fn begin_attempt(&mut self) -> bool {
        if self.attempt >= self.max_attempts {
            return false;
        }
        self.attempt += 1;
        true
    }

    /// Delay to wait before the next attempt, or `None` when no attempts remain.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let delay = self.next_delay;
        self.next_delay = delay
            .saturating_mul(self.policy.multiplier)
            .min(self.policy.max);
        Some(delay)
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
