//! Client configuration types.

use std::collections::BTreeSet;
use std::time::Duration;

use rampart_core::{Error, Method, Result};

/// Configuration for the HTTP client.
///
/// An immutable snapshot of every tunable. Built once, validated when the
/// client is built, then shared read-only across concurrent calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum number of in-flight requests on the default transport.
    pub max_connections: usize,
    /// Maximum idle connections kept per host.
    pub max_keepalive_connections: usize,
    /// Idle connection expiry.
    pub keepalive_expiry: Duration,
    /// Whether the default transport follows redirects.
    pub follow_redirects: bool,
    /// Whether server certificates are verified.
    pub verify_ssl: bool,

    /// Total attempts per call, including the first one.
    pub retry_attempts: u32,
    /// Base delay of the exponential backoff.
    pub retry_backoff_factor: Duration,
    /// Upper bound for any single backoff delay.
    pub retry_max_delay: Duration,
    /// Response statuses that trigger a retry.
    pub retry_statuses: BTreeSet<u16>,
    /// Methods eligible for retry.
    pub retry_methods: BTreeSet<Method>,

    /// Whether outbound calls go through the token bucket.
    pub enable_rate_limiting: bool,
    /// Token refill rate, in tokens per second.
    pub rate_limit_rate: f64,
    /// Token bucket capacity.
    pub rate_limit_burst: u32,

    /// Whether outbound calls go through the circuit breaker.
    pub enable_circuit_breaker: bool,
    /// Consecutive failures that open the circuit.
    pub circuit_breaker_failure_threshold: u32,
    /// Time the circuit stays open before admitting a trial call.
    pub circuit_breaker_recovery_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_connections: 100,
            max_keepalive_connections: 20,
            keepalive_expiry: Duration::from_secs(30),
            follow_redirects: false,
            verify_ssl: true,
            retry_attempts: 3,
            retry_backoff_factor: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(60),
            retry_statuses: BTreeSet::from([408, 429, 500, 502, 503, 504]),
            retry_methods: BTreeSet::from([
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]),
            enable_rate_limiting: false,
            rate_limit_rate: 10.0,
            rate_limit_burst: 1,
            enable_circuit_breaker: false,
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Checks option ranges.
    ///
    /// Rate limiter and breaker options are only checked when the feature
    /// is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid option.
    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts < 1 {
            return Err(Error::config("retry_attempts", "must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(Error::config("max_connections", "must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout", "must be greater than 0"));
        }
        if self.enable_rate_limiting {
            if !(self.rate_limit_rate.is_finite() && self.rate_limit_rate > 0.0) {
                return Err(Error::config(
                    "rate_limit_rate",
                    "must be a positive number of tokens per second",
                ));
            }
            if self.rate_limit_burst == 0 {
                return Err(Error::config("rate_limit_burst", "must be greater than 0"));
            }
        }
        if self.enable_circuit_breaker {
            if self.circuit_breaker_failure_threshold == 0 {
                return Err(Error::config(
                    "circuit_breaker_failure_threshold",
                    "must be greater than 0",
                ));
            }
            if self.circuit_breaker_recovery_timeout.is_zero() {
                return Err(Error::config(
                    "circuit_breaker_recovery_timeout",
                    "must be greater than 0",
                ));
            }
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    max_connections: Option<usize>,
    max_keepalive_connections: Option<usize>,
    keepalive_expiry: Option<Duration>,
    follow_redirects: Option<bool>,
    verify_ssl: Option<bool>,
    retry_attempts: Option<u32>,
    retry_backoff_factor: Option<Duration>,
    retry_max_delay: Option<Duration>,
    retry_statuses: Option<BTreeSet<u16>>,
    retry_methods: Option<BTreeSet<Method>>,
    enable_rate_limiting: Option<bool>,
    rate_limit_rate: Option<f64>,
    rate_limit_burst: Option<u32>,
    enable_circuit_breaker: Option<bool>,
    circuit_breaker_failure_threshold: Option<u32>,
    circuit_breaker_recovery_timeout: Option<Duration>,
}

impl ClientConfigBuilder {
    /// Set the per-attempt request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set the maximum number of in-flight requests.
    #[must_use]
    pub const fn max_connections(mut self, count: usize) -> Self {
        self.max_connections = Some(count);
        self
    }

    /// Set the maximum idle connections per host.
    #[must_use]
    pub const fn max_keepalive_connections(mut self, count: usize) -> Self {
        self.max_keepalive_connections = Some(count);
        self
    }

    /// Set the idle connection expiry.
    #[must_use]
    pub const fn keepalive_expiry(mut self, expiry: Duration) -> Self {
        self.keepalive_expiry = Some(expiry);
        self
    }

    /// Set whether redirects are followed.
    #[must_use]
    pub const fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    /// Set whether server certificates are verified.
    #[must_use]
    pub const fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = Some(verify);
        self
    }

    /// Set the total number of attempts per call.
    #[must_use]
    pub const fn retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Set the base backoff delay.
    #[must_use]
    pub const fn retry_backoff_factor(mut self, factor: Duration) -> Self {
        self.retry_backoff_factor = Some(factor);
        self
    }

    /// Set the maximum backoff delay.
    #[must_use]
    pub const fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Set the response statuses that trigger a retry.
    #[must_use]
    pub fn retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Set the methods eligible for retry.
    #[must_use]
    pub fn retry_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retry_methods = Some(methods.into_iter().collect());
        self
    }

    /// Enable or disable client-side rate limiting.
    #[must_use]
    pub const fn enable_rate_limiting(mut self, enable: bool) -> Self {
        self.enable_rate_limiting = Some(enable);
        self
    }

    /// Set the token refill rate, in tokens per second.
    #[must_use]
    pub const fn rate_limit_rate(mut self, rate: f64) -> Self {
        self.rate_limit_rate = Some(rate);
        self
    }

    /// Set the token bucket capacity.
    #[must_use]
    pub const fn rate_limit_burst(mut self, burst: u32) -> Self {
        self.rate_limit_burst = Some(burst);
        self
    }

    /// Enable or disable the circuit breaker.
    #[must_use]
    pub const fn enable_circuit_breaker(mut self, enable: bool) -> Self {
        self.enable_circuit_breaker = Some(enable);
        self
    }

    /// Set the consecutive failures that open the circuit.
    #[must_use]
    pub const fn circuit_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_failure_threshold = Some(threshold);
        self
    }

    /// Set how long the circuit stays open.
    #[must_use]
    pub const fn circuit_breaker_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_breaker_recovery_timeout = Some(timeout);
        self
    }

    /// Build the configuration.
    ///
    /// Values are not checked here; see [`ClientConfig::validate`].
    #[must_use]
    pub fn build(self) -> ClientConfig {
        let defaults = ClientConfig::default();
        ClientConfig {
            timeout: self.timeout.unwrap_or(defaults.timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            max_connections: self.max_connections.unwrap_or(defaults.max_connections),
            max_keepalive_connections: self
                .max_keepalive_connections
                .unwrap_or(defaults.max_keepalive_connections),
            keepalive_expiry: self.keepalive_expiry.unwrap_or(defaults.keepalive_expiry),
            follow_redirects: self.follow_redirects.unwrap_or(defaults.follow_redirects),
            verify_ssl: self.verify_ssl.unwrap_or(defaults.verify_ssl),
            retry_attempts: self.retry_attempts.unwrap_or(defaults.retry_attempts),
            retry_backoff_factor: self
                .retry_backoff_factor
                .unwrap_or(defaults.retry_backoff_factor),
            retry_max_delay: self.retry_max_delay.unwrap_or(defaults.retry_max_delay),
            retry_statuses: self.retry_statuses.unwrap_or(defaults.retry_statuses),
            retry_methods: self.retry_methods.unwrap_or(defaults.retry_methods),
            enable_rate_limiting: self
                .enable_rate_limiting
                .unwrap_or(defaults.enable_rate_limiting),
            rate_limit_rate: self.rate_limit_rate.unwrap_or(defaults.rate_limit_rate),
            rate_limit_burst: self.rate_limit_burst.unwrap_or(defaults.rate_limit_burst),
            enable_circuit_breaker: self
                .enable_circuit_breaker
                .unwrap_or(defaults.enable_circuit_breaker),
            circuit_breaker_failure_threshold: self
                .circuit_breaker_failure_threshold
                .unwrap_or(defaults.circuit_breaker_failure_threshold),
            circuit_breaker_recovery_timeout: self
                .circuit_breaker_recovery_timeout
                .unwrap_or(defaults.circuit_breaker_recovery_timeout),
        }
    }
}
