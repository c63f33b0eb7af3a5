use crate::error::RateLimitExceeded;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by caller.
#[derive(Debug, Default)]
pub struct RateLimiter {
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one action for `key`, or reject it when `max` actions already
    /// happened within `window`.
    pub fn performed(&self, key: &str, max: u32, window: Duration) -> Result<(), RateLimitExceeded> {
        self.performed_at(key, max, window, Instant::now())
    }

    fn performed_at(
        &self,
        key: &str,
        max: u32,
        window: Duration,
        now: Instant,
    ) -> Result<(), RateLimitExceeded> {
        // A poisoned map only loses history; keep limiting with what is there.
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());

        // drop callers whose windows have fully expired
        if hits.len() > 1024 {
            hits.retain(|_, times| times.back().is_some_and(|t| now.duration_since(*t) < window));
        }

        let times = hits.entry(key.to_string()).or_default();
        while times
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            times.pop_front();
        }

        if times.len() >= max as usize {
            let retry_after = times
                .front()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or(window);
            return Err(RateLimitExceeded {
                key: key.to_string(),
                max,
                window_secs: window.as_secs(),
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        times.push_back(now);
        Ok(())
    }
}
