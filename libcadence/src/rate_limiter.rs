//! Shared per-platform rate limiting for outbound publish calls
//!
//! Two mechanisms, both keyed by target platform:
//! - a posts-per-hour ceiling over fixed hour windows, from configuration
//! - a cooldown recorded whenever the provider answers 429
//!
//! One gate is owned by the publisher client, so every post on a platform
//! shares the same view of the provider's limits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::types::TargetPlatform;

const WINDOW_SECS: i64 = 3600;

#[derive(Debug, Default)]
struct GateState {
    /// (platform, window start) -> posts recorded
    windows: HashMap<(TargetPlatform, i64), u32>,
    /// platform -> unix second the cooldown ends
    cooldowns: HashMap<TargetPlatform, i64>,
}

#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Posts per hour
    limits: BTreeMap<TargetPlatform, u32>,
    state: Mutex<GateState>,
}

impl RateLimiter {
    pub fn new(limits: BTreeMap<TargetPlatform, u32>) -> Self {
        Self {
            limits,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Reserve a slot for one publish call at `now`.
    ///
    /// Returns `Err(wait)` with the time until a slot frees up when the
    /// platform is cooling down or its hourly budget is spent.
    pub fn check_and_record(&self, platform: TargetPlatform, now: i64) -> Result<(), Duration> {
        let mut state = self.lock();

        if let Some(&until) = state.cooldowns.get(&platform) {
            if until > now {
                return Err(secs(until - now));
            }
            state.cooldowns.remove(&platform);
        }

        let window = window_start(now);
        if let Some(&limit) = self.limits.get(&platform) {
            let used = state.windows.get(&(platform, window)).copied().unwrap_or(0);
            if used >= limit {
                return Err(secs(window + WINDOW_SECS - now));
            }
        }

        *state.windows.entry((platform, window)).or_insert(0) += 1;
        state.windows.retain(|(_, start), _| *start >= window);
        Ok(())
    }

    /// Block `platform` until `now + wait`; extends but never shortens an existing cooldown
    pub fn note_rate_limited(&self, platform: TargetPlatform, now: i64, wait: Duration) {
        let until = now + i64::try_from(wait.as_secs()).unwrap_or(i64::MAX / 2);
        let mut state = self.lock();
        let entry = state.cooldowns.entry(platform).or_insert(until);
        if *entry < until {
            *entry = until;
        }
    }

    /// Remaining cooldown for `platform`, if any
    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        // state stays consistent across a panic in another holder
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn window_start(timestamp: i64) -> i64 {
    timestamp.div_euclid(WINDOW_SECS) * WINDOW_SECS
}

fn secs(value: i64) -> Duration {
    Duration::from_secs(u64::try_from(value.max(1)).unwrap_or(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_800; // 1000800 = 278 * 3600, start of a window

    fn limiter(limit: u32) -> RateLimiter {
        let mut limits = BTreeMap::new();
        limits.insert(TargetPlatform::Tiktok, limit);
        RateLimiter::new(limits)
    }

    #[test]
    fn test_allows_posts_under_limit() {
        let limiter = limiter(3);
        for _ in 0..3 {
            assert!(limiter.check_and_record(TargetPlatform::Tiktok, NOW).is_ok());
        }
    }

    #[test]
    fn test_blocks_over_limit_until_window_ends() {
        let limiter = limiter(2);
        limiter.check_and_record(TargetPlatform::Tiktok, NOW).unwrap();
        limiter.check_and_record(TargetPlatform::Tiktok, NOW).unwrap();

        let wait = limiter
            .check_and_record(TargetPlatform::Tiktok, NOW + 600)
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(3000));

        assert!(limiter
            .check_and_record(TargetPlatform::Tiktok, NOW + 3600)
            .is_ok());
    }

    #[test]
    fn test_platforms_are_independent() {
        let limiter = limiter(1);
        limiter.check_and_record(TargetPlatform::Tiktok, NOW).unwrap();
        assert!(limiter.check_and_record(TargetPlatform::Tiktok, NOW).is_err());
        // no limit configured for instagram
        for _ in 0..10 {
            assert!(limiter.check_and_record(TargetPlatform::Instagram, NOW).is_ok());
        }
    }

    #[test]
    fn test_cooldown_blocks_then_expires() {
        let limiter = RateLimiter::default();
        limiter.note_rate_limited(TargetPlatform::Youtube, NOW, Duration::from_secs(120));

        let wait = limiter
            .check_and_record(TargetPlatform::Youtube, NOW + 20)
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(100));

        assert!(limiter
            .check_and_record(TargetPlatform::Youtube, NOW + 120)
            .is_ok());
    }

    #[test]
    fn test_cooldown_is_never_shortened() {
        let limiter = RateLimiter::default();
        limiter.note_rate_limited(TargetPlatform::Tiktok, NOW, Duration::from_secs(600));
        limiter.note_rate_limited(TargetPlatform::Tiktok, NOW, Duration::from_secs(60));
        assert_eq!(
            limiter.check_and_record(TargetPlatform::Tiktok, NOW),
            Err(Duration::from_secs(600))
        );
    }
}
