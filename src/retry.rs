//! Retry classification and the generic retry driver
//!
//! Delivery loops are owned by the dispatch engine; this module provides the
//! shared pieces: the [`IsRetryable`] classification trait, jitter, and a
//! generic fixed-delay retry driver used for item-level enrichment.
//!
//! # Example
//!
//! ```no_run
//! use crosspost::retry::{IsRetryable, retry_with_policy};
//! use crosspost::config::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), crosspost::Error> {
//! let policy = RetryPolicy::bounded(3, Duration::from_secs(1));
//! let result = retry_with_policy(&policy, || async {
//!     // Your operation here
//!     Ok::<_, crosspost::Error>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryPolicy;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server busy, connection reset) should return `true`.
/// Permanent failures (bad credentials, malformed responses, contract violations) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // The source being down is the canonical transient failure
            Error::SourceUnavailable(_) => true,
            // Enrichment and publish errors carry their own classification
            Error::Enrichment { retryable, .. } => *retryable,
            Error::Publish { retryable, .. } => *retryable,
            // Network errors: timeouts, connection failures and server-side
            // errors are worth retrying
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            // I/O errors can be retryable in some cases
            Error::Staging(e) | Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A contract violation will not fix itself
            Error::SourceContract(_) => false,
            // Losing the resume point must stop the cycle, not loop on it
            Error::Watermark(_) => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Serialization errors are permanent
            Error::Serialization(_) => false,
            // Shutdown in progress - not retryable
            Error::ShuttingDown => false,
            // Unknown errors - be conservative and don't retry
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with fixed-delay retry per a [`RetryPolicy`]
///
/// Non-retryable errors are returned immediately. Retryable errors are retried
/// until the policy's `max_attempts` bound or `max_elapsed` wall-clock cap is
/// reached, sleeping `backoff_delay` (optionally jittered) between attempts.
///
/// # Arguments
///
/// * `policy` - Retry policy (attempt bound, fixed delay, wall-clock cap, jitter)
/// * `operation` - Async closure that returns Result<T, E> where E implements IsRetryable
///
/// # Returns
///
/// Returns the successful result or the last error once the policy is exhausted.
pub async fn retry_with_policy<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                let attempts_left = policy.max_attempts.is_none_or(|max| attempt < max);
                let within_deadline = policy
                    .max_elapsed
                    .is_none_or(|cap| started.elapsed() < cap);

                if !e.is_retryable() {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                    return Err(e);
                }
                if !attempts_left {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(e);
                }
                if !within_deadline {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        elapsed = ?started.elapsed(),
                        "Operation failed and exceeded the wall-clock cap"
                    );
                    return Err(e);
                }

                let delay = backoff_delay(policy);
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Resolve the delay to sleep between two attempts of a policy
pub(crate) fn backoff_delay(policy: &RetryPolicy) -> Duration {
    if policy.jitter {
        add_jitter(policy.backoff_delay)
    } else {
        policy.backoff_delay
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::bounded(max_attempts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn success_without_retry_calls_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&fast_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn transient_errors_are_retried_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&fast_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should retry twice before success"
        );
    }

    #[tokio::test]
    async fn bounded_policy_stops_after_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&fast_policy(3), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "max_attempts bounds the total attempt count"
        );
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_policy(&fast_policy(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn delay_between_attempts_is_fixed() {
        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let policy = RetryPolicy::bounded(3, Duration::from_millis(50));
        let _result = retry_with_policy(&policy, || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 3, "three attempts for max_attempts=3");

        for i in 1..ts.len() {
            let gap = ts[i].duration_since(ts[i - 1]);
            assert!(
                gap >= Duration::from_millis(40),
                "delay between attempt {} and {} was {:?}, expected ~50ms",
                i,
                i + 1,
                gap
            );
            assert!(
                gap < Duration::from_millis(500),
                "fixed delay should not grow, gap was {:?}",
                gap
            );
        }
    }

    #[tokio::test]
    async fn wall_clock_cap_stops_an_unbounded_policy() {
        let policy = RetryPolicy {
            max_elapsed: Some(Duration::from_millis(100)),
            ..RetryPolicy::unbounded(Duration::from_millis(20))
        };

        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let start = Instant::now();

        let result = retry_with_policy(&policy, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err(), "cap expiry surfaces the last error");
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "unbounded policy must stop once the cap expires, ran {:?}",
            start.elapsed()
        );
        assert!(
            counter.load(Ordering::SeqCst) >= 2,
            "should have retried at least once before the cap"
        );
    }

    #[tokio::test]
    async fn jitter_keeps_delay_within_double_the_base() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::bounded(2, Duration::from_millis(50))
        };

        let start = Instant::now();
        let _result =
            retry_with_policy(&policy, || async { Err::<i32, _>(TestError::Transient) }).await;
        let elapsed = start.elapsed();

        // One sleep between the two attempts: between 50ms and 100ms plus
        // scheduling overhead
        assert!(
            elapsed >= Duration::from_millis(40),
            "should wait at least the base delay, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait longer than expected, waited {:?}",
            elapsed
        );
    }

    #[test]
    fn add_jitter_stays_within_bounds_over_many_iterations() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay,
                "iteration {i}: jittered {jittered:?} < base delay {delay:?}"
            );
            assert!(
                jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} > 2x base delay {:?}",
                delay * 2
            );
        }
    }

    // -----------------------------------------------------------------------
    // IsRetryable classification for the library error type
    // -----------------------------------------------------------------------

    #[test]
    fn source_unavailable_is_retryable() {
        assert!(Error::SourceUnavailable("upstream 502".into()).is_retryable());
    }

    #[test]
    fn source_contract_violation_is_not_retryable() {
        assert!(!Error::SourceContract("missing sequence key".into()).is_retryable());
    }

    #[test]
    fn publish_error_follows_its_flag() {
        let transient = Error::Publish {
            target: "chat".into(),
            message: "timeout".into(),
            retryable: true,
        };
        assert!(transient.is_retryable());

        let rejected = Error::Publish {
            target: "chat".into(),
            message: "caption too long".into(),
            retryable: false,
        };
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn enrichment_error_follows_its_flag() {
        let transient = Error::Enrichment {
            message: "tagging timeout".into(),
            retryable: true,
        };
        assert!(transient.is_retryable());

        let malformed = Error::Enrichment {
            message: "malformed tag response".into(),
            retryable: false,
        };
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn staging_io_timeout_is_retryable() {
        let err = Error::Staging(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert!(err.is_retryable());

        let not_found = Error::Staging(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "not found",
        ));
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn watermark_failure_is_not_retryable() {
        let err = Error::Watermark(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(
            !err.is_retryable(),
            "losing the resume point must stop the cycle, not loop"
        );
    }

    #[test]
    fn shutdown_and_config_errors_are_not_retryable() {
        assert!(!Error::ShuttingDown.is_retryable());
        assert!(
            !Error::Config {
                message: "bad staging root".into(),
                key: Some("staging.root".into()),
            }
            .is_retryable()
        );
    }

    #[test]
    fn serialization_error_is_not_retryable() {
        let err = Error::Serialization(serde_json::from_str::<String>("bad json").unwrap_err());
        assert!(!err.is_retryable());
    }
}
