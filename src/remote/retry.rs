//! Retry with exponential backoff for transient remote failures.

use crate::Result;
use std::time::Duration;

/// Retry policy for pipeline round trips.
///
/// Only errors the transport layer marked transient (rate limiting,
/// unavailability, TLS/connect failures, timeouts) are retried;
/// everything else propagates on first failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit settings.
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(0),
        }
    }

    /// Runs `op`, retrying transient failures with exponential backoff.
    pub fn run<T, F>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient remote failure, backing off"
                    );
                    std::thread::sleep(delay);
                },
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::cell::Cell;

    #[test]
    fn test_success_passes_through() {
        let policy = RetryPolicy::default();
        let result = policy.run("test", || Ok(42));
        assert_eq!(result.ok(), Some(42));
    }

    #[test]
    fn test_transient_errors_are_retried() {
        let policy = RetryPolicy::new(3, Duration::from_millis(0));
        let calls = Cell::new(0u32);
        let result: Result<u32> = policy.run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(Error::Connectivity {
                    cause: "HTTP 503".to_string(),
                    transient: true,
                })
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.ok(), Some(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_errors_propagate_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(0));
        let calls = Cell::new(0u32);
        let result: Result<u32> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(Error::Remote {
                code: "SQLITE_ERROR".to_string(),
                message: "syntax error".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_retries_exhausted_surfaces_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(0));
        let calls = Cell::new(0u32);
        let result: Result<u32> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(Error::Connectivity {
                cause: "timeout".to_string(),
                transient: true,
            })
        });
        assert!(matches!(
            result,
            Err(Error::Connectivity { transient: true, .. })
        ));
        assert_eq!(calls.get(), 3); // initial + 2 retries
    }
}
