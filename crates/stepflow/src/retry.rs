//! Retry logic with exponential backoff for eventually-consistent operations.

use crate::types::RetryConfig;
use std::fmt::Display;
use std::thread;

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is about to be retried.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_secs` - Seconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay_secs: u64);
}

/// No-op callback that does nothing.
pub struct NoCallback;

impl RetryCallback for NoCallback {
    fn on_retry(&self, _attempt: u32, _max_attempts: u32, _error: &dyn Display, _delay_secs: u64) {
    }
}

/// Callback that logs retries as warnings.
pub struct LogCallback<'a> {
    /// What is being retried, e.g. "waiting for the API server"
    pub operation: &'a str,
}

impl RetryCallback for LogCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay_secs: u64) {
        log::warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {}s...",
            self.operation,
            attempt,
            max_attempts,
            error,
            delay_secs
        );
    }
}

/// Execute an operation with retry logic.
///
/// Every error is treated as retryable; after `max_attempts` the last error
/// is returned and the caller decides whether it is fatal.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `callback` - Optional callback for retry notifications
/// * `operation` - The operation to execute
pub fn with_retry<T, E, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 >= max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, max_attempts, &e, delay.as_secs());
                }

                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

/// Execute an operation with retry using default config and no callback.
pub fn with_retry_simple<T, E, F>(operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    with_retry(&RetryConfig::default(), None, operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let result: Result<i32, String> = with_retry(&RetryConfig::no_retry(), None, || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let attempts = Cell::new(0);

        let result = with_retry(&fast(3), None, || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 {
                Err("machines still terminating".to_string())
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_with_retry_returns_last_error() {
        let attempts = Cell::new(0);

        let result: Result<(), String> = with_retry(&fast(3), None, || {
            attempts.set(attempts.get() + 1);
            Err(format!("attempt {}", attempts.get()))
        });

        assert_eq!(result.unwrap_err(), "attempt 3");
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_callback_invoked_between_attempts() {
        struct CountingCallback(Cell<u32>);
        impl RetryCallback for CountingCallback {
            fn on_retry(&self, _: u32, _: u32, _: &dyn Display, _: u64) {
                self.0.set(self.0.get() + 1);
            }
        }

        let callback = CountingCallback(Cell::new(0));
        let _: Result<(), &str> = with_retry(&fast(3), Some(&callback), || Err("timeout"));

        // Not after the last attempt
        assert_eq!(callback.0.get(), 2);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let attempts = Cell::new(0);
        let _: Result<(), &str> = with_retry(&fast(0), None, || {
            attempts.set(attempts.get() + 1);
            Err("nope")
        });
        assert_eq!(attempts.get(), 1);
    }
}
