//! Retry with exponential backoff for transient store failures.

use crate::config::StoreSettings;
use crate::error::Result;
use log::{debug, warn};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base: Duration::from_millis(100), cap: Duration::from_secs(2), jitter: 0.1 }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            max_attempts: settings.retry_attempts,
            base: settings.retry_base,
            cap: settings.retry_cap,
            ..Self::default()
        }
    }

    /// Delay before retrying after the 0-based `attempt`, jitter excluded.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.cap)
    }

    fn delay(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let spread = backoff.as_secs_f64() * self.jitter;
        let extra = if spread > 0.0 { rand::thread_rng().gen_range(0.0..spread) } else { 0.0 };
        backoff + Duration::from_secs_f64(extra)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or runs
/// out of attempts. The last error is returned untouched.
pub fn with_retry<T>(policy: &RetryPolicy, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", what, attempt);
                }
                return Ok(v);
            }
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = policy.delay(attempt);
                debug!("{} hit transient error ({}), retry {} in {:?}", what, e, attempt + 1, delay);
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!("{} failed after {} attempts: {}", what, attempts, e);
                }
                return Err(e);
            }
        }
    }
}
