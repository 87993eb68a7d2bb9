//! Retry engine: runs an action up to `attempts` times under one deadline.
//!
//! Attempts are strictly sequential. Which failures may be retried is
//! decided by [`RetryConfig::classify`]; this module only sleeps, counts
//! and enforces the deadline.

use clusterdrive_core::{Classification, Classify, RetryConfig};
use std::future::Future;
use std::time::Duration;

/// Why a retry sequence ended without success.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The failure was classified as not retryable.
    #[error("gave up on attempt {attempt} ({reason}): {last}")]
    Aborted {
        /// Attempt that produced the failure (1-based).
        attempt: u32,
        /// Classification that stopped the sequence.
        reason: Classification,
        /// The failure itself.
        last: E,
    },

    /// Every attempt failed.
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last: E,
    },

    /// The overall deadline elapsed first.
    #[error("timed out after {deadline:?} ({attempts} attempts started)")]
    TimedOut {
        /// The bound that was exceeded.
        deadline: Duration,
        /// Attempts started before the deadline.
        attempts: u32,
        /// Failure of the last completed attempt, if any.
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Most recent failure, if one was observed.
    pub fn last(&self) -> Option<&E> {
        match self {
            RetryError::Aborted { last, .. } | RetryError::Exhausted { last, .. } => Some(last),
            RetryError::TimedOut { last, .. } => last.as_ref(),
        }
    }

    /// Number of attempts made or started.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempt, .. } => *attempt,
            RetryError::Exhausted { attempts, .. } | RetryError::TimedOut { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Whether the deadline ended the sequence.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::TimedOut { .. })
    }
}

/// Run `action` until it succeeds, a failure is not retryable, attempts run
/// out, or [`RetryConfig::deadline`] elapses.
///
/// Before every attempt after the first, waits the current delay and then
/// multiplies it by `delay_multiplier`.
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, mut action: F) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = config.deadline();
    let mut started = 0u32;
    let mut last = None;

    let outcome = tokio::time::timeout(
        deadline,
        run_attempts(config, &mut action, &mut started, &mut last),
    )
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                "Retry deadline of {:?} exceeded after {} attempts",
                deadline,
                started
            );
            Err(RetryError::TimedOut {
                deadline,
                attempts: started,
                last,
            })
        }
    }
}

async fn run_attempts<T, E, F, Fut>(
    config: &RetryConfig,
    action: &mut F,
    started: &mut u32,
    last: &mut Option<E>,
) -> Result<T, RetryError<E>>
where
    E: Classify,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max = config.max_attempts();
    let mut delays = config.delays().into_iter();

    loop {
        *started += 1;
        let attempt = *started;

        let err = match action().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!("Succeeded on attempt {}/{}", attempt, max);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let class = config.classify(&err);
        if !class.is_retryable() {
            return Err(RetryError::Aborted {
                attempt,
                reason: class,
                last: err,
            });
        }
        if attempt >= max {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = delays.next().unwrap_or(config.delay);
        tracing::warn!(
            "Attempt {}/{} failed ({}): {}; retrying in {:?}",
            attempt,
            max,
            class,
            err,
            delay
        );
        *last = Some(err);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        text: String,
        exit: Option<i32>,
    }

    impl TestError {
        fn new(text: &str, exit: Option<i32>) -> Self {
            Self {
                text: text.to_string(),
                exit,
            }
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.text)
        }
    }

    impl Classify for TestError {
        fn exit_status(&self) -> Option<i32> {
            self.exit
        }
    }

    fn config(attempts: u32) -> RetryConfig {
        RetryConfig {
            retryable_error_substrings: vec!["try again".into()],
            non_retryable_error_substrings: vec!["forbidden".into()],
            retryable_exit_codes: vec![255],
            ..RetryConfig::fixed(attempts, Duration::from_secs(1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let result: Result<&str, RetryError<TestError>> = with_retry(&config(5), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TestError::new("try again", None))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_text_runs_once() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::new("403 forbidden; try again", Some(255)))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Aborted { attempt: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_runs_exactly_n_times() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config(4), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::new("please try again", None))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 4);
        assert!(err.to_string().contains("4 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn exit_status_not_listed_stops() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&config(4), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::new("exit", Some(3)))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result.unwrap_err(),
            RetryError::Aborted {
                reason: Classification::NonRetryableExit(3),
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn listed_exit_status_retries() {
        let calls = &AtomicU32::new(0);
        let _: Result<(), _> = with_retry(&config(3), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::new("exit", Some(255)))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_grow_with_multiplier() {
        let start = tokio::time::Instant::now();
        let cfg = config(4).with_multiplier(2.0);
        let _: Result<(), _> = with_retry(&cfg, || async {
            Err(TestError::new("unclassified", None))
        })
        .await;
        // 1s + 2s + 4s
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_distinct_timeout() {
        let cfg = config(10).with_timeout(Duration::from_millis(2500));
        let result: Result<(), _> = with_retry(&cfg, || async {
            Err(TestError::new("try again", None))
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.last().map(|e| e.text.as_str()), Some("try again"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_a_hung_attempt() {
        let cfg = config(2).with_timeout(Duration::from_secs(5));
        let result: Result<(), RetryError<TestError>> = with_retry(&cfg, || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        let err = result.unwrap_err();
        assert!(err.is_timeout());
        assert!(err.last().is_none());
    }
}
