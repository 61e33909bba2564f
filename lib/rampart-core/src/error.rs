//! Error types for rampart.
//!
//! Every failure of the client surfaces as one [`Error`] value. The variants
//! form a small taxonomy:
//!
//! - [`Error::Request`]: the transport could not produce a response
//!   (connection, TLS, timeout, cancellation).
//! - [`Error::Response`] and [`Error::RateLimited`]: the server answered
//!   with a 4xx/5xx status.
//! - [`Error::RetryExhausted`]: retries ran out; wraps the last failure.
//! - [`Error::CircuitOpen`]: the circuit breaker rejected the call.
//! - [`Error::Auth`]: credentials could not be applied or fetched.
//! - [`Error::Config`]: invalid configuration, detected at construction.

use std::time::Duration;

use bytes::Bytes;
use derive_more::{Display, Error, From};

use crate::Headers;

/// Kind of transport failure behind an [`Error::Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RequestErrorKind {
    /// Connection could not be established or was reset.
    #[display("connection")]
    Connect,
    /// The attempt did not complete within the request timeout.
    #[display("timeout")]
    Timeout,
    /// TLS handshake or certificate failure.
    #[display("TLS")]
    Tls,
    /// The call was cancelled before completion.
    #[display("cancelled")]
    Cancelled,
    /// Any other transport failure.
    #[display("transport")]
    Other,
}

/// Main error type for rampart operations.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    /// The transport failed to produce a response.
    #[display("{kind} error: {message}")]
    #[from(skip)]
    Request {
        /// Failure category.
        kind: RequestErrorKind,
        /// Error message.
        #[error(not(source))]
        message: String,
    },

    /// The server answered with a 4xx or 5xx status.
    #[display("HTTP error {status}")]
    #[from(skip)]
    Response {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        #[error(not(source))]
        headers: Headers,
        /// Response body.
        #[error(not(source))]
        body: Bytes,
    },

    /// The server answered 429 Too Many Requests.
    #[display("rate limited by server (HTTP 429)")]
    #[from(skip)]
    RateLimited {
        /// Parsed `Retry-After` delay, if the server sent one.
        #[error(not(source))]
        retry_after: Option<Duration>,
        /// Response headers.
        #[error(not(source))]
        headers: Headers,
        /// Response body.
        #[error(not(source))]
        body: Bytes,
    },

    /// Every retry attempt failed.
    #[display("retries exhausted after {attempts} attempts: {last}")]
    #[from(skip)]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Delay computed before the last attempt.
        #[error(not(source))]
        last_delay: Duration,
        /// The failure of the last attempt.
        #[error(source)]
        last: Box<Error>,
    },

    /// The circuit breaker is open and the call was not attempted.
    #[display("circuit breaker is open (retry in {}ms)", remaining.as_millis())]
    #[from(skip)]
    CircuitOpen {
        /// Time until the breaker admits a trial call.
        #[error(not(source))]
        remaining: Duration,
    },

    /// Authentication failure.
    #[display("{scheme} authentication failed: {message}")]
    #[from(skip)]
    Auth {
        /// Auth scheme name (e.g. `bearer`, `oauth2`).
        #[error(not(source))]
        scheme: &'static str,
        /// Error message.
        #[error(not(source))]
        message: String,
    },

    /// Invalid configuration.
    #[display("invalid configuration for '{field}': {message}")]
    #[from(skip)]
    Config {
        /// Offending field or option.
        #[error(not(source))]
        field: &'static str,
        /// Error message.
        #[error(not(source))]
        message: String,
    },

    /// A middleware hook aborted the pipeline.
    #[display("middleware '{name}' failed: {message}")]
    #[from(skip)]
    Middleware {
        /// Middleware name.
        #[error(not(source))]
        name: String,
        /// Error message.
        #[error(not(source))]
        message: String,
    },

    /// JSON serialization error.
    #[display("JSON serialization error: {_0}")]
    #[from]
    Json(serde_json::Error),

    /// JSON deserialization error with path context.
    #[display("JSON deserialization error at '{path}': {message}")]
    #[from(skip)]
    JsonDeserialization {
        /// JSON path to the error (e.g., "user.address.city").
        path: String,
        /// Error message.
        message: String,
    },

    /// Form URL-encoded serialization error.
    #[display("form serialization error: {_0}")]
    #[from]
    Form(serde_html_form::ser::Error),

    /// URL parsing error.
    #[display("invalid URL: {_0}")]
    #[from]
    InvalidUrl(url::ParseError),

    /// Too many redirects.
    #[display("too many redirects ({count} exceeded max of {max})")]
    #[from(skip)]
    TooManyRedirects {
        /// Number of redirects followed.
        count: usize,
        /// Maximum allowed redirects.
        max: usize,
    },

    /// Invalid redirect response.
    #[display("invalid redirect: {_0}")]
    #[from(skip)]
    InvalidRedirect(#[error(not(source))] String),
}

/// Result type alias using [`crate::Error`].
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a transport error.
    #[must_use]
    pub fn request(kind: RequestErrorKind, message: impl Into<String>) -> Self {
        Self::Request {
            kind,
            message: message.into(),
        }
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::request(RequestErrorKind::Connect, message)
    }

    /// Create a TLS error.
    #[must_use]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::request(RequestErrorKind::Tls, message)
    }

    /// Create a timeout error for an attempt bounded by `timeout`.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::request(
            RequestErrorKind::Timeout,
            format!("no response within {}ms", timeout.as_millis()),
        )
    }

    /// Create an error for a 4xx/5xx response.
    ///
    /// A 429 status becomes [`Error::RateLimited`].
    #[must_use]
    pub fn from_status(status: u16, headers: Headers, body: Bytes) -> Self {
        if status == 429 {
            let retry_after = headers.get("retry-after").and_then(parse_retry_after);
            Self::RateLimited {
                retry_after,
                headers,
                body,
            }
        } else {
            Self::Response {
                status,
                headers,
                body,
            }
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn auth(scheme: &'static str, message: impl Into<String>) -> Self {
        Self::Auth {
            scheme,
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(field: &'static str, message: impl Into<String>) -> Self {
        Self::Config {
            field,
            message: message.into(),
        }
    }

    /// Create a middleware error.
    #[must_use]
    pub fn middleware(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a JSON deserialization error with path context.
    #[must_use]
    pub fn json_deserialization(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::JsonDeserialization {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Transport failure kind, if this is a request error.
    #[must_use]
    pub const fn request_kind(&self) -> Option<RequestErrorKind> {
        match self {
            Self::Request { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` if this is a transport error.
    #[must_use]
    pub const fn is_request_error(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// Returns `true` if this is a timeout error.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Request {
                kind: RequestErrorKind::Timeout,
                ..
            }
        )
    }

    /// Returns `true` if this is a connection error.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(
            self,
            Self::Request {
                kind: RequestErrorKind::Connect,
                ..
            }
        )
    }

    /// Returns `true` for transport failures that a retry may cure.
    ///
    /// Cancellation is excluded.
    #[must_use]
    pub const fn is_retryable_transport(&self) -> bool {
        matches!(
            self,
            Self::Request { kind, .. } if !matches!(kind, RequestErrorKind::Cancelled)
        )
    }

    /// Returns `true` if the server answered with an error status.
    ///
    /// This covers both [`Error::Response`] and [`Error::RateLimited`].
    #[must_use]
    pub const fn is_response_error(&self) -> bool {
        matches!(self, Self::Response { .. } | Self::RateLimited { .. })
    }

    /// Returns `true` if this is a 429 error.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Returns `true` if retries were exhausted.
    #[must_use]
    pub const fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    /// Returns `true` if the circuit breaker rejected the call.
    #[must_use]
    pub const fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` if this is an authentication error.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Returns `true` if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }

    /// Returns the HTTP status code if the server answered.
    ///
    /// Looks through [`Error::RetryExhausted`] to the last failure.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Response { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::RetryExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Returns `true` if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| (400..500).contains(&s))
    }

    /// Returns `true` if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| (500..600).contains(&s))
    }

    /// Number of attempts made, if retries were exhausted.
    #[must_use]
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetryExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Server-requested delay of a 429 response.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            Self::RetryExhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }

    /// Time until an open breaker admits a trial call.
    #[must_use]
    pub const fn remaining(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { remaining } => Some(*remaining),
            _ => None,
        }
    }

    /// Response headers, if the server answered.
    #[must_use]
    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Self::Response { headers, .. } | Self::RateLimited { headers, .. } => Some(headers),
            Self::RetryExhausted { last, .. } => last.headers(),
            _ => None,
        }
    }

    /// Response body, if the server answered.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Response { body, .. } | Self::RateLimited { body, .. } => Some(body),
            Self::RetryExhausted { last, .. } => last.body(),
            _ => None,
        }
    }

    /// Try to decode the error body as JSON.
    ///
    /// Returns `Some(Ok(value))` if the error has a body and it deserializes successfully,
    /// `Some(Err(error))` if the body exists but deserialization fails,
    /// or `None` if the server did not answer.
    ///
    /// # Example
    ///
    /// ```
    /// use rampart_core::{Error, Headers};
    ///
    /// #[derive(Debug, serde::Deserialize)]
    /// struct ApiError {
    ///     code: String,
    /// }
    ///
    /// let err = Error::from_status(400, Headers::new(), r#"{"code":"bad_input"}"#.into());
    /// let api_error: ApiError = err.decode_body().expect("has body").expect("decodes");
    /// assert_eq!(api_error.code, "bad_input");
    /// ```
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> Option<Result<T>> {
        self.body().map(|body| crate::from_json(body))
    }
}

/// Parses a `Retry-After` header value given in delta-seconds.
///
/// Integer and decimal values are accepted. HTTP-date values, negative and
/// non-finite numbers yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Duration::try_from_secs_f64(seconds).ok()
    } else {
        None
    }
}
