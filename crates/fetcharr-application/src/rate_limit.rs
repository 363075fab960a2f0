// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Minimum-interval limiter keyed by provider name. `acquire` waits until
/// the key's interval has passed since the previous acquisition, so callers
/// never exceed the provider's request rate no matter how many tasks share
/// the limiter.
pub struct RateLimiter {
    interval: Duration,
    last: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter for `requests_per_minute`, with zero meaning unlimited.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let interval = if requests_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / requests_per_minute as f64)
        };
        Self::new(interval)
    }

    pub async fn acquire(&self, key: &str) {
        if self.interval.is_zero() {
            return;
        }
        // The slot is reserved under the lock; the wait happens outside it
        // so other keys are not blocked.
        let wait_until = {
            let mut last = self.last.lock().await;
            let now = Instant::now();
            let ready_at = match last.get(key) {
                Some(prev) => (*prev + self.interval).max(now),
                None => now,
            };
            last.insert(key.to_string(), ready_at);
            ready_at
        };
        sleep_until(wait_until).await;
    }
}
