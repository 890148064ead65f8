//! Retry policy for failed publish attempts
//!
//! Delays grow as `base_delay * 2^retry_count`, capped at `max_delay`, plus up to
//! `jitter_ratio` of the capped delay so posts that fail together don't retry together.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use crate::error::{ErrorClassification, PublishError};

/// Source of the jitter fraction added to a backoff delay.
pub trait JitterSource: Send {
    /// A value in `[0, max_fraction]`
    fn sample(&mut self, max_fraction: f64) -> f64;
}

/// Always zero; gives exact delays in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZeroJitter;

impl JitterSource for ZeroJitter {
    fn sample(&mut self, _max_fraction: f64) -> f64 {
        0.0
    }
}

#[derive(Debug)]
pub struct RandomJitter {
    rng: StdRng,
}

impl RandomJitter {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl JitterSource for RandomJitter {
    fn sample(&mut self, max_fraction: f64) -> f64 {
        if max_fraction <= 0.0 {
            return 0.0;
        }
        self.rng.gen_range(0.0..=max_fraction)
    }
}

/// Backoff delay for a post that has already failed `retry_count` times.
///
/// `jitter_fraction` is applied on top of the capped delay.
pub fn backoff_delay(
    retry_count: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
) -> Duration {
    let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
    let capped = base_delay.saturating_mul(factor).min(max_delay);
    capped + capped.mul_f64(jitter_fraction.max(0.0))
}

/// Timestamp (Unix seconds) of the next attempt.
pub fn compute_next_retry(
    retry_count: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    now: i64,
) -> i64 {
    now + ceil_secs(backoff_delay(retry_count, base_delay, max_delay, jitter_fraction))
}

fn ceil_secs(delay: Duration) -> i64 {
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts allowed before the post is marked failed
    pub max_attempts: u32,
    pub jitter_ratio: f64,
    /// Floor for rate-limited retries when the provider gives no hint
    pub rate_limit_min_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
            max_attempts: 5,
            jitter_ratio: 0.2,
            rate_limit_min_delay: Duration::from_secs(900),
        }
    }
}

/// What to do with a post after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { retry_count: u32, next_retry_at: i64 },
    /// Budget consumed
    Exhausted { retry_count: u32 },
    /// Error is not retryable; `retry_count` is left untouched
    GiveUp,
}

impl RetryPolicy {
    /// Decide the outcome of a failure for a post that had failed `retry_count` times before.
    pub fn decide(
        &self,
        retry_count: u32,
        error: &PublishError,
        now: i64,
        jitter: &mut dyn JitterSource,
    ) -> RetryDecision {
        if !error.classification.is_retryable() {
            return RetryDecision::GiveUp;
        }

        let attempts = retry_count.saturating_add(1).min(self.max_attempts);
        if attempts >= self.max_attempts {
            return RetryDecision::Exhausted {
                retry_count: attempts,
            };
        }

        let mut next_retry_at = compute_next_retry(
            retry_count,
            self.base_delay,
            self.max_delay,
            jitter.sample(self.jitter_ratio),
            now,
        );
        if error.classification == ErrorClassification::RateLimited {
            let floor = error.retry_after.unwrap_or(self.rate_limit_min_delay);
            next_retry_at = next_retry_at.max(now + ceil_secs(floor));
        }

        RetryDecision::Retry {
            retry_count: attempts,
            next_retry_at: next_retry_at.max(now + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(60);
    const MAX: Duration = Duration::from_secs(3600);
    const NOW: i64 = 1_700_000_000;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..Default::default()
        }
    }

    #[test]
    fn test_first_retry_is_base_delay() {
        assert_eq!(compute_next_retry(0, BASE, MAX, 0.0, NOW), NOW + 60);
    }

    #[test]
    fn test_doubling_and_cap() {
        assert_eq!(compute_next_retry(1, BASE, MAX, 0.0, NOW), NOW + 120);
        assert_eq!(compute_next_retry(5, BASE, MAX, 0.0, NOW), NOW + 1920);
        assert_eq!(compute_next_retry(6, BASE, MAX, 0.0, NOW), NOW + 3600);
        assert_eq!(compute_next_retry(40, BASE, MAX, 0.0, NOW), NOW + 3600);
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut jitter = RandomJitter::seeded(7);
        for retry_count in 0..10 {
            let fraction = jitter.sample(0.2);
            assert!((0.0..=0.2).contains(&fraction));

            let delay = backoff_delay(retry_count, BASE, MAX, fraction);
            let plain = backoff_delay(retry_count, BASE, MAX, 0.0);
            assert!(delay >= plain);
            assert!(delay <= plain.mul_f64(1.2));
        }
    }

    #[test]
    fn test_seeded_jitter_is_deterministic() {
        let mut a = RandomJitter::seeded(42);
        let mut b = RandomJitter::seeded(42);
        for _ in 0..5 {
            assert_eq!(a.sample(0.2), b.sample(0.2));
        }
    }

    #[test]
    fn test_transient_failure_under_budget_retries() {
        let error = PublishError::transient("timeout");
        let decision = policy(3).decide(0, &error, NOW, &mut ZeroJitter);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 1,
                next_retry_at: NOW + 60
            }
        );
    }

    #[test]
    fn test_last_attempt_exhausts() {
        let error = PublishError::transient("timeout");
        let decision = policy(3).decide(2, &error, NOW, &mut ZeroJitter);
        assert_eq!(decision, RetryDecision::Exhausted { retry_count: 3 });
    }

    #[test]
    fn test_budget_already_spent_exhausts_for_any_classification() {
        for error in [
            PublishError::transient("t"),
            PublishError::rate_limited("r", None),
        ] {
            let decision = policy(3).decide(3, &error, NOW, &mut ZeroJitter);
            assert_eq!(decision, RetryDecision::Exhausted { retry_count: 3 });
        }
        assert_eq!(
            policy(3).decide(3, &PublishError::permanent("p"), NOW, &mut ZeroJitter),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_permanent_and_not_implemented_give_up() {
        let p = policy(3);
        assert_eq!(
            p.decide(0, &PublishError::permanent("bad media"), NOW, &mut ZeroJitter),
            RetryDecision::GiveUp
        );
        assert_eq!(
            p.decide(0, &PublishError::not_implemented("pinterest"), NOW, &mut ZeroJitter),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_rate_limited_respects_hint() {
        let error = PublishError::rate_limited("429", Some(Duration::from_secs(600)));
        let decision = policy(5).decide(0, &error, NOW, &mut ZeroJitter);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 1,
                next_retry_at: NOW + 600
            }
        );
    }

    #[test]
    fn test_rate_limited_without_hint_uses_floor() {
        let error = PublishError::rate_limited("429", None);
        let decision = policy(5).decide(0, &error, NOW, &mut ZeroJitter);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 1,
                next_retry_at: NOW + 900
            }
        );
    }

    #[test]
    fn test_rate_limited_never_shorter_than_backoff() {
        let error = PublishError::rate_limited("429", Some(Duration::from_secs(5)));
        let decision = policy(10).decide(4, &error, NOW, &mut ZeroJitter);
        assert_eq!(
            decision,
            RetryDecision::Retry {
                retry_count: 5,
                next_retry_at: NOW + 960
            }
        );
    }
}
