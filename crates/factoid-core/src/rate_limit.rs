//! Sliding-window rate limiter for trigger fires.
//!
//! Keeps, per factoid and per user, a bounded queue of recent fire
//! timestamps. A factoid with limit `count` per `window` may fire for a user
//! again once the oldest of its last `count` fires is at least `window` old.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use crate::factoid::RateLimit;

/// Fire history keyed by factoid key, then user identity.
#[derive(Debug, Default)]
pub struct RateLimiter {
    histories: HashMap<String, HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create an empty rate limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `user` is currently blocked from firing `factoid`.
    pub fn is_limited(&self, factoid: &str, user: &str, limit: RateLimit, now: Instant) -> bool {
        if !limit.is_enabled() {
            return false;
        }
        self.histories
            .get(factoid)
            .and_then(|users| users.get(user))
            .is_some_and(|hits| at_capacity(hits, limit, now))
    }

    /// Check the limit and, if allowed, record a fire at `now`.
    ///
    /// Returns `true` if the fire is allowed. Check and record happen under
    /// the same `&mut self`, so callers holding the limiter's lock cannot
    /// race two fires past the limit.
    pub fn try_acquire(&mut self, factoid: &str, user: &str, limit: RateLimit, now: Instant) -> bool {
        if !limit.is_enabled() {
            return true;
        }
        let hits = self
            .histories
            .entry(factoid.to_string())
            .or_default()
            .entry(user.to_string())
            .or_default();

        if at_capacity(hits, limit, now) {
            return false;
        }
        let capacity = limit.count as usize;
        while hits.len() >= capacity {
            hits.pop_front();
        }
        hits.push_back(now);
        true
    }

    /// Number of fires recorded for `user` on `factoid`.
    pub fn recorded(&self, factoid: &str, user: &str) -> usize {
        self.histories
            .get(factoid)
            .and_then(|users| users.get(user))
            .map_or(0, VecDeque::len)
    }

    /// Drop all history for a factoid (after it is deleted).
    pub fn forget_factoid(&mut self, factoid: &str) {
        self.histories.remove(factoid);
    }

    /// Remove queues whose newest fire is older than the factoid's window.
    ///
    /// `limit_of` returns the current limit for a factoid key, or `None` if
    /// the factoid no longer exists; unknown or unlimited factoids are
    /// dropped entirely.
    pub fn sweep(&mut self, now: Instant, limit_of: impl Fn(&str) -> Option<RateLimit>) {
        self.histories.retain(|key, users| {
            let Some(limit) = limit_of(key).filter(RateLimit::is_enabled) else {
                return false;
            };
            users.retain(|_, hits| {
                hits.back()
                    .is_some_and(|&newest| now.duration_since(newest) < limit.window)
            });
            !users.is_empty()
        });
    }

    /// Number of (factoid, user) queues held.
    pub fn len(&self) -> usize {
        self.histories.values().map(HashMap::len).sum()
    }

    /// Whether no history is held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The queue may hold more than `count` fires after the limit was lowered,
/// so only the last `count` of them are considered.
fn at_capacity(hits: &VecDeque<Instant>, limit: RateLimit, now: Instant) -> bool {
    let count = limit.count as usize;
    if hits.len() < count {
        return false;
    }
    hits.get(hits.len() - count)
        .is_some_and(|&oldest| now.duration_since(oldest) < limit.window)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    const USER: &str = "freenode/alice";

    fn after(start: Instant, secs: u64) -> Instant {
        start + Duration::from_secs(secs)
    }

    #[test]
    fn test_one_per_minute() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();

        assert!(limiter.try_acquire("faq", USER, limit, t0));
        assert!(limiter.is_limited("faq", USER, limit, after(t0, 30)));
        assert!(!limiter.try_acquire("faq", USER, limit, after(t0, 59)));
        assert!(!limiter.is_limited("faq", USER, limit, after(t0, 61)));
        assert!(limiter.try_acquire("faq", USER, limit, after(t0, 61)));
        assert_eq!(limiter.recorded("faq", USER), 1);
    }

    #[test]
    fn test_window_boundary_is_inclusive_of_expiry() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();

        assert!(limiter.try_acquire("faq", USER, limit, t0));
        assert!(limiter.try_acquire("faq", USER, limit, after(t0, 60)));
    }

    #[test]
    fn test_count_above_one() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(3, 60);
        let t0 = Instant::now();

        assert!(limiter.try_acquire("faq", USER, limit, t0));
        assert!(limiter.try_acquire("faq", USER, limit, after(t0, 10)));
        assert!(limiter.try_acquire("faq", USER, limit, after(t0, 20)));
        assert!(!limiter.try_acquire("faq", USER, limit, after(t0, 30)));
        // The first fire has aged out; the queue stays bounded at 3.
        assert!(limiter.try_acquire("faq", USER, limit, after(t0, 61)));
        assert_eq!(limiter.recorded("faq", USER), 3);
        assert!(!limiter.try_acquire("faq", USER, limit, after(t0, 65)));
    }

    #[test]
    fn test_disabled_limits_never_block() {
        let mut limiter = RateLimiter::new();
        let t0 = Instant::now();
        for limit in [RateLimit::new(0, 60), RateLimit::new(5, 0)] {
            for _ in 0..100 {
                assert!(limiter.try_acquire("faq", USER, limit, t0));
            }
            assert!(!limiter.is_limited("faq", USER, limit, t0));
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_independent_users_and_factoids() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();

        assert!(limiter.try_acquire("faq", USER, limit, t0));
        assert!(limiter.try_acquire("faq", "freenode/bob", limit, t0));
        assert!(limiter.try_acquire("rules", USER, limit, t0));
        assert!(!limiter.try_acquire("faq", USER, limit, t0));
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn test_shrinking_count_trims_queue() {
        let mut limiter = RateLimiter::new();
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(limiter.try_acquire("faq", USER, RateLimit::new(5, 60), after(t0, i)));
        }
        assert_eq!(limiter.recorded("faq", USER), 5);
        assert!(limiter.try_acquire("faq", USER, RateLimit::new(2, 3), after(t0, 100)));
        assert_eq!(limiter.recorded("faq", USER), 2);
    }

    #[test]
    fn test_lowered_count_checks_most_recent_fires() {
        let mut limiter = RateLimiter::new();
        let wide = RateLimit::new(3, 60);
        let t0 = Instant::now();
        assert!(limiter.try_acquire("faq", USER, wide, t0));
        assert!(limiter.try_acquire("faq", USER, wide, after(t0, 50)));
        assert!(limiter.try_acquire("faq", USER, wide, after(t0, 55)));

        // The last fire was 10s ago, so a 1-per-60s limit still blocks.
        let narrow = RateLimit::new(1, 60);
        assert!(limiter.is_limited("faq", USER, narrow, after(t0, 65)));
        assert!(!limiter.try_acquire("faq", USER, narrow, after(t0, 65)));
        assert_eq!(limiter.recorded("faq", USER), 3);

        assert!(limiter.try_acquire("faq", USER, narrow, after(t0, 115)));
        assert_eq!(limiter.recorded("faq", USER), 1);
    }

    #[test]
    fn test_forget_factoid() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();
        limiter.try_acquire("faq", USER, limit, t0);
        limiter.forget_factoid("faq");
        assert!(limiter.try_acquire("faq", USER, limit, t0));
    }

    #[test]
    fn test_sweep_removes_stale_entries() {
        let mut limiter = RateLimiter::new();
        let limit = RateLimit::new(1, 60);
        let t0 = Instant::now();
        limiter.try_acquire("faq", USER, limit, t0);
        limiter.try_acquire("faq", "freenode/bob", limit, after(t0, 50));
        limiter.try_acquire("gone", USER, limit, t0);

        limiter.sweep(after(t0, 70), |key| (key == "faq").then_some(limit));
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.recorded("faq", "freenode/bob"), 1);
        assert_eq!(limiter.recorded("faq", USER), 0);

        limiter.sweep(after(t0, 200), |_| Some(limit));
        assert!(limiter.is_empty());
    }
}
