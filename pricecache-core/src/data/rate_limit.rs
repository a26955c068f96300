//! Minimum spacing between provider calls.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Blocks callers so consecutive requests are at least `poll_frequency`
/// apart. One limiter per provider instance.
#[derive(Debug)]
pub struct RateLimiter {
    poll_frequency: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(poll_frequency: Duration) -> Self {
        Self {
            poll_frequency,
            last_request: Mutex::new(None),
        }
    }

    pub fn poll_frequency(&self) -> Duration {
        self.poll_frequency
    }

    /// Sleep until a request is allowed, then mark it as sent. Returns how
    /// long the caller was held back.
    pub fn wait(&self) -> Duration {
        let mut last = self.last_request.lock().unwrap_or_else(PoisonError::into_inner);
        let waited = match *last {
            Some(at) => self.poll_frequency.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        };
        if !waited.is_zero() {
            std::thread::sleep(waited);
        }
        *last = Some(Instant::now());
        waited
    }
}
