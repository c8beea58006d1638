//! Retry policy with exponential backoff and jitter.
//!
//! The policy is a pure decision function over `(attempt, error)`: transient
//! errors get a capped exponential delay plus uniform jitter, permanent
//! errors always give up. Attempt budgets are enforced by the queue, not
//! here, so the policy stays independently testable.

use std::time::Duration;

use rand::RngExt;

use crate::error::TaskError;

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting the given delay.
    Retry { after: Duration },
    /// Do not retry; mark the item failed.
    GiveUp,
}

/// Exponential backoff retry policy.
///
/// Delay for attempt `n` (1-based) is
/// `min(base * multiplier^(n-1), max_delay)` plus jitter drawn uniformly
/// from `[0, jitter_fraction * delay)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay for the first retry.
    pub base: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Fraction of the delay used as the jitter range (0.0 disables jitter).
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base delay.
    pub fn with_base(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    /// Sets the growth multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the jitter fraction.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Returns the backoff delay for a 1-based attempt number, without
    /// jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.base.as_secs_f64() * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Decides whether a failed attempt should be retried.
    ///
    /// `attempt` is the 1-based number of the attempt that just failed.
    pub fn decide(&self, attempt: u32, error: &TaskError) -> RetryDecision {
        if !error.is_transient() {
            return RetryDecision::GiveUp;
        }

        let delay = self.delay_for(attempt);
        let jittered = if self.jitter_fraction > 0.0 {
            let range = delay.as_secs_f64() * self.jitter_fraction;
            let jitter = if range > 0.0 {
                rand::rng().random_range(0.0..range)
            } else {
                0.0
            };
            delay + Duration::from_secs_f64(jitter)
        } else {
            delay
        };

        RetryDecision::Retry { after: jittered }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy::new()
            .with_base(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(1))
            .with_jitter_fraction(0.0)
    }

    #[test]
    fn test_permanent_errors_give_up() {
        let policy = policy_without_jitter();
        let err = TaskError::permanent("bad credentials");

        assert_eq!(policy.decide(1, &err), RetryDecision::GiveUp);
        assert_eq!(policy.decide(10, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn test_exponential_growth() {
        let policy = policy_without_jitter();

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy_without_jitter();

        // 100ms * 2^9 = 51.2s, well over the 1s cap.
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_errors_retry() {
        let policy = policy_without_jitter();
        let err = TaskError::transient("503 service unavailable");

        match policy.decide(2, &err) {
            RetryDecision::Retry { after } => assert_eq!(after, Duration::from_millis(200)),
            RetryDecision::GiveUp => panic!("transient error should retry"),
        }
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::new()
            .with_base(Duration::from_millis(100))
            .with_multiplier(1.0)
            .with_max_delay(Duration::from_secs(1))
            .with_jitter_fraction(0.5);
        let err = TaskError::transient("timeout");

        for _ in 0..100 {
            match policy.decide(1, &err) {
                RetryDecision::Retry { after } => {
                    assert!(after >= Duration::from_millis(100));
                    assert!(after < Duration::from_millis(150));
                }
                RetryDecision::GiveUp => panic!("transient error should retry"),
            }
        }
    }

    #[test]
    fn test_jitter_fraction_clamped() {
        let policy = RetryPolicy::new().with_jitter_fraction(3.0);
        assert!((policy.jitter_fraction - 1.0).abs() < f64::EPSILON);
    }
}
