use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Entries idle longer than this are dropped on the next check.
const EVICT_AFTER: Duration = Duration::from_secs(60 * 60);

/// Outcome of a cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub limited: bool,
    /// Whole seconds until the cooldown expires; zero when not limited.
    pub retry_after: u64,
}

impl Decision {
    fn allowed() -> Self {
        Self {
            limited: false,
            retry_after: 0,
        }
    }
}

/// Per-(requester, operation) cooldown tracker.
///
/// State lives only in this process; a restart resets all cooldowns, which
/// is acceptable because these are soft UX throttles rather than security
/// controls. The map is swept lazily on every check so it stays bounded
/// without a background task.
pub struct RateLimiter {
    stamps: Mutex<HashMap<(u64, String), Instant>>,
    evict_after: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self {
            stamps: Mutex::new(HashMap::new()),
            evict_after: EVICT_AFTER,
        }
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_eviction(evict_after: Duration) -> Self {
        Self {
            stamps: Mutex::new(HashMap::new()),
            evict_after,
        }
    }

    /// Checks whether `requester` may run `operation` and, if so, records
    /// the use. A limited call does NOT advance the stored stamp, so
    /// hammering a limited operation never extends the cooldown.
    pub fn check_and_stamp(&self, requester: u64, operation: &str, cooldown: Duration) -> Decision {
        let now = Instant::now();
        let mut stamps = self.stamps.lock().unwrap_or_else(|e| e.into_inner());
        stamps.retain(|_, last| now.saturating_duration_since(*last) < self.evict_after);

        let key = (requester, operation.to_string());
        if let Some(last) = stamps.get(&key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                let remaining = cooldown - elapsed;
                let mut retry_after = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    retry_after += 1;
                }
                return Decision {
                    limited: true,
                    retry_after,
                };
            }
        }
        stamps.insert(key, now);
        Decision::allowed()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.stamps.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_use_is_allowed() {
        let limiter = RateLimiter::new();
        let decision = limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        assert!(!decision.limited);
        assert_eq!(decision.retry_after, 0);
    }

    #[test]
    fn second_use_within_cooldown_is_limited() {
        let limiter = RateLimiter::new();
        limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        let decision = limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        assert!(decision.limited);
        assert!(decision.retry_after > 0 && decision.retry_after <= 30);
    }

    #[test]
    fn repeated_limited_calls_do_not_extend_the_window() {
        let limiter = RateLimiter::new();
        limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        let first = limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        std::thread::sleep(Duration::from_millis(20));
        let second = limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        assert!(first.limited && second.limited);
        assert!(second.retry_after <= first.retry_after);
    }

    #[test]
    fn cooldown_elapses_then_resets() {
        let limiter = RateLimiter::new();
        limiter.check_and_stamp(1, "list", Duration::from_millis(30));
        std::thread::sleep(Duration::from_millis(40));
        let decision = limiter.check_and_stamp(1, "list", Duration::from_millis(30));
        assert!(!decision.limited);
        // The allowed call stamped a fresh window.
        let again = limiter.check_and_stamp(1, "list", Duration::from_millis(30));
        assert!(again.limited);
    }

    #[test]
    fn operations_and_requesters_are_independent() {
        let limiter = RateLimiter::new();
        limiter.check_and_stamp(1, "host", Duration::from_secs(30));
        assert!(!limiter.check_and_stamp(1, "list", Duration::from_secs(10)).limited);
        assert!(!limiter.check_and_stamp(2, "host", Duration::from_secs(30)).limited);
    }

    #[test]
    fn idle_entries_are_evicted() {
        let limiter = RateLimiter::with_eviction(Duration::from_millis(30));
        limiter.check_and_stamp(1, "host", Duration::from_secs(3600));
        std::thread::sleep(Duration::from_millis(40));
        // Any check sweeps the map before consulting it.
        limiter.check_and_stamp(2, "list", Duration::from_secs(10));
        assert_eq!(limiter.len(), 1);
        // The evicted requester starts a fresh window despite the long
        // cooldown that would otherwise still apply.
        assert!(!limiter
            .check_and_stamp(1, "host", Duration::from_secs(3600))
            .limited);
    }
}
