//! Retry configuration and failure classification.
//!
//! This module decides *whether* a failure may be retried and *how long* to
//! wait between attempts. Executing attempts and sleeping is left to the
//! async driver in `clusterdrive-remote`.

use std::time::Duration;

/// Default number of attempts for callers that do not specialize.
pub const DEFAULT_ATTEMPTS: u32 = 5;

/// Default delay before the second attempt.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

/// Default multiplier applied to the delay after each attempt.
pub const DEFAULT_DELAY_MULTIPLIER: f64 = 1.5;

/// Time budgeted for each attempt on top of the backoff delays when no
/// explicit timeout is configured.
pub const DEFAULT_ATTEMPT_ALLOWANCE: Duration = Duration::from_secs(30);

/// Exit status reported by `ssh` itself when the connection breaks.
pub const SSH_CONNECTION_EXIT: i32 = 255;

/// Anything that can be classified by the retry engine.
///
/// [`Classify::error_text`] is matched against the configured substrings;
/// the exit status, when present, is matched against the retryable codes.
pub trait Classify: std::fmt::Display {
    /// Text the substring rules are matched against. Defaults to `Display`.
    ///
    /// Errors that embed their own context (the command line, the host)
    /// override this to return only what the failure reported.
    fn error_text(&self) -> String {
        self.to_string()
    }

    /// Exit status reported by the remote command, if the failure carries one.
    fn exit_status(&self) -> Option<i32> {
        None
    }

    /// Whether the failure can never succeed on a later attempt
    /// (validation errors, unreadable key material).
    fn is_fatal(&self) -> bool {
        false
    }
}

/// Bounded-retry configuration. Immutable once handed to an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (at least one is always made).
    pub attempts: u32,
    /// Wait before the second attempt.
    pub delay: Duration,
    /// Factor applied to the delay after every wait. `1.0` keeps it fixed.
    pub delay_multiplier: f64,
    /// Exit statuses that may succeed on a later attempt.
    pub retryable_exit_codes: Vec<i32>,
    /// Error text fragments that mark a failure as transient.
    pub retryable_error_substrings: Vec<String>,
    /// Error text fragments that stop the sequence immediately.
    pub non_retryable_error_substrings: Vec<String>,
    /// Overall bound for the whole sequence. When unset, see [`RetryConfig::deadline`].
    pub timeout: Option<Duration>,
    /// Per-attempt budget used to derive the default deadline.
    pub attempt_allowance: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
            delay_multiplier: DEFAULT_DELAY_MULTIPLIER,
            retryable_exit_codes: vec![SSH_CONNECTION_EXIT],
            retryable_error_substrings: [
                "connection reset",
                "connection refused",
                "broken pipe",
                "i/o timeout",
                "timed out",
                "temporarily unavailable",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            non_retryable_error_substrings: [
                "permission denied",
                "not found",
                "no such file or directory",
                "invalid argument",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            timeout: None,
            attempt_allowance: DEFAULT_ATTEMPT_ALLOWANCE,
        }
    }
}

impl RetryConfig {
    /// A configuration with a fixed delay and no text or exit-code rules.
    ///
    /// Every failure that is not fatal is retried until attempts run out.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            delay,
            delay_multiplier: 1.0,
            retryable_exit_codes: Vec::new(),
            retryable_error_substrings: Vec::new(),
            non_retryable_error_substrings: Vec::new(),
            timeout: None,
            attempt_allowance: DEFAULT_ATTEMPT_ALLOWANCE,
        }
    }

    /// Builder: set the overall timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builder: set the delay multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.delay_multiplier = multiplier;
        self
    }

    /// Number of attempts actually made, never zero.
    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Multiplier actually applied. Non-finite or non-positive values fall
    /// back to a fixed delay.
    fn effective_multiplier(&self) -> f64 {
        if self.delay_multiplier.is_finite() && self.delay_multiplier > 0.0 {
            self.delay_multiplier
        } else {
            1.0
        }
    }

    /// The waits between attempts: `attempts - 1` entries, each the previous
    /// one times the multiplier. Growth saturates at [`Duration::MAX`].
    pub fn delays(&self) -> Delays {
        Delays {
            upcoming: self.delay,
            multiplier: self.effective_multiplier(),
            remaining: self.max_attempts() - 1,
        }
    }

    /// Bound on the whole sequence.
    ///
    /// An explicit `timeout` wins. Otherwise the bound is the sum of the real
    /// backoff delays (multiplier growth included) plus `attempt_allowance`
    /// per attempt.
    pub fn deadline(&self) -> Duration {
        if let Some(timeout) = self.timeout {
            return timeout;
        }
        let allowance = self
            .attempt_allowance
            .checked_mul(self.max_attempts())
            .unwrap_or(Duration::MAX);
        let mut total = allowance;
        let mut delays = self.delays();
        while let Some(delay) = delays.next() {
            total = total.saturating_add(delay);
            if total == Duration::MAX {
                break;
            }
            if delays.upcoming == delay {
                // Fixed from here on.
                let rest = delay.checked_mul(delays.remaining).unwrap_or(Duration::MAX);
                total = total.saturating_add(rest);
                break;
            }
        }
        total
    }

    /// Classify a failure. Order: fatal, non-retryable text, retryable text,
    /// exit status, unclassified.
    pub fn classify<E: Classify + ?Sized>(&self, error: &E) -> Classification {
        if error.is_fatal() {
            return Classification::Fatal;
        }

        let text = error.error_text().to_lowercase();
        if let Some(hit) = find_fragment(&text, &self.non_retryable_error_substrings) {
            return Classification::NonRetryableText(hit);
        }
        if let Some(hit) = find_fragment(&text, &self.retryable_error_substrings) {
            return Classification::RetryableText(hit);
        }

        match error.exit_status() {
            Some(code) if self.retryable_exit_codes.contains(&code) => {
                Classification::RetryableExit(code)
            }
            Some(code) => Classification::NonRetryableExit(code),
            None => Classification::Unclassified,
        }
    }
}

/// Backoff schedule produced by [`RetryConfig::delays`].
#[derive(Debug, Clone)]
pub struct Delays {
    upcoming: Duration,
    multiplier: f64,
    remaining: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.upcoming;
        if self.multiplier != 1.0 {
            self.upcoming =
                Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
                    .unwrap_or(Duration::MAX);
        }
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

fn find_fragment(text: &str, fragments: &[String]) -> Option<String> {
    fragments
        .iter()
        .find(|f| !f.is_empty() && text.contains(&f.to_lowercase()))
        .cloned()
}

/// Outcome of classifying one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The error reports itself as fatal.
    Fatal,
    /// Matched a non-retryable fragment.
    NonRetryableText(String),
    /// Matched a retryable fragment.
    RetryableText(String),
    /// Exit status listed as retryable.
    RetryableExit(i32),
    /// Exit status not listed as retryable.
    NonRetryableExit(i32),
    /// Nothing matched; retried while attempts remain.
    Unclassified,
}

impl Classification {
    /// Whether another attempt may be made.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RetryableText(_) | Self::RetryableExit(_) | Self::Unclassified
        )
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::NonRetryableText(s) => write!(f, "non-retryable match '{}'", s),
            Self::RetryableText(s) => write!(f, "retryable match '{}'", s),
            Self::RetryableExit(c) => write!(f, "retryable exit status {}", c),
            Self::NonRetryableExit(c) => write!(f, "non-retryable exit status {}", c),
            Self::Unclassified => write!(f, "unclassified"),
        }
    }
}
