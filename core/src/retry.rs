use crate::config::{RETRY_DELAY, RETRY_MAX_ATTEMPTS};
use crate::error::AdapterError;
use std::time::Duration;

/// Bounded retry for rate-limited adapter calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { max_attempts: RETRY_MAX_ATTEMPTS, delay: RETRY_DELAY } }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self { Self { max_attempts, delay } }

    /// Run `op`, sleeping `delay` and trying again while it reports a rate
    /// limit. Other errors, and the last rate-limit error, are returned as is.
    pub fn run<T, F>(&self, mut op: F) -> Result<T, AdapterError>
    where
        F: FnMut() -> Result<T, AdapterError>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_rate_limited() && attempt < attempts => {
                    tracing::warn!(attempt, max_attempts = attempts, delay_ms = self.delay.as_millis() as u64, "rate limited, retrying");
                    std::thread::sleep(self.delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn stops_after_max_attempts() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);
        let res: Result<(), _> = policy.run(|| {
            calls.set(calls.get() + 1);
            Err(AdapterError::RateLimited("slow down".into()))
        });
        assert_eq!(calls.get(), 3);
        assert!(matches!(res, Err(AdapterError::RateLimited(_))));
    }

    #[test]
    fn server_errors_are_not_retried() {
        let calls = Cell::new(0);
        let res: Result<(), _> = RetryPolicy::new(3, Duration::ZERO).run(|| {
            calls.set(calls.get() + 1);
            Err(AdapterError::Server("boom".into()))
        });
        assert_eq!(calls.get(), 1);
        assert!(res.is_err());
    }

    #[test]
    fn recovers_after_rate_limit() {
        let calls = Cell::new(0);
        let res = RetryPolicy::new(3, Duration::ZERO).run(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 2 { Err(AdapterError::RateLimited("wait".into())) } else { Ok(42) }
        });
        assert_eq!(res, Ok(42));
        assert_eq!(calls.get(), 2);
    }
}
