//! Retry policy with exponential backoff and jitter.
//!
//! An attempt is retried when:
//! - the response status is one of the configured retry statuses, or
//! - the transport failed (connection, TLS, timeout),
//!
//! and the request method is one of the configured retry methods.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use rampart_core::{Error, Method, Response, Result};

use crate::ClientConfig;

/// Relative jitter applied to computed backoff delays.
const JITTER: f64 = 0.1;

/// Retry policy for HTTP requests.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use rampart::{ClientConfig, RetryPolicy};
///
/// let config = ClientConfig::builder()
///     .retry_backoff_factor(Duration::from_millis(100))
///     .retry_max_delay(Duration::from_secs(1))
///     .build();
/// let policy = RetryPolicy::from_config(&config);
///
/// assert_eq!(policy.backoff(0), Duration::from_millis(100));
/// assert_eq!(policy.backoff(2), Duration::from_millis(400));
/// assert_eq!(policy.backoff(10), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_factor: Duration,
    max_delay: Duration,
    statuses: BTreeSet<u16>,
    methods: BTreeSet<Method>,
}

impl RetryPolicy {
    /// Build the policy from the retry options of `config`.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.retry_attempts.max(1),
            backoff_factor: config.retry_backoff_factor,
            max_delay: config.retry_max_delay,
            statuses: config.retry_statuses.clone(),
            methods: config.retry_methods.clone(),
        }
    }

    /// Total attempts per call, including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound for any delay.
    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Returns `true` if `method` may be retried at all.
    #[must_use]
    pub fn allows_method(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    /// Returns `true` if a response with `status` to a `method` request should be retried.
    #[must_use]
    pub fn should_retry_status(&self, method: Method, status: u16) -> bool {
        self.allows_method(method) && self.statuses.contains(&status)
    }

    /// Returns `true` if a transport error on a `method` request should be retried.
    #[must_use]
    pub fn should_retry_error(&self, method: Method, error: &Error) -> bool {
        self.allows_method(method) && error.is_retryable_transport()
    }

    /// Exponential delay before retry number `attempt + 1`, without jitter.
    ///
    /// `backoff_factor * 2^attempt`, clamped to the maximum delay.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let seconds = self.backoff_factor.as_secs_f64() * 2f64.powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay to sleep after failed attempt number `attempt` (zero-based).
    ///
    /// The exponential backoff gets a symmetric jitter of 10%. A larger
    /// server-provided `Retry-After` replaces it as is; only the computed
    /// backoff is bounded by the maximum delay.
    #[must_use]
    pub fn delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = rand::thread_rng().gen_range(-JITTER..=JITTER);
        let computed = self.jittered(self.backoff(attempt), factor);
        match retry_after {
            Some(server) if server > computed => server,
            _ => computed,
        }
    }

    fn jittered(&self, base: Duration, factor: f64) -> Duration {
        let seconds = base.as_secs_f64() * (1.0 + factor);
        Duration::try_from_secs_f64(seconds.max(0.0))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Classify the result of one attempt.
    pub(crate) fn classify(&self, method: Method, result: Result<Response>) -> AttemptOutcome {
        match result {
            Ok(response) if self.should_retry_status(method, response.status()) => {
                AttemptOutcome::Retryable(Ok(response))
            }
            Ok(response) => AttemptOutcome::Success(response),
            Err(error) if self.should_retry_error(method, &error) => {
                AttemptOutcome::Retryable(Err(error))
            }
            Err(error) => AttemptOutcome::Terminal(error),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Outcome of a single transport attempt.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// A response that must not be retried, whatever its status.
    Success(Response),
    /// A failed attempt that may be retried while attempts remain.
    Retryable(Result<Response>),
    /// A failure that must not be retried.
    Terminal(Error),
}

impl AttemptOutcome {
    /// Server-requested delay carried by a retryable response.
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Retryable(Ok(response)) => response.retry_after(),
            _ => None,
        }
    }
}
