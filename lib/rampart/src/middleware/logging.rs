//! Request/response logging middleware.
//!
//! Logs calls with `tracing`, masking sensitive headers.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use rampart_core::{Clock, Error, Headers, Request, Response, Result, SystemClock};
use tracing::{debug, info, warn};

use super::Middleware;

/// Headers masked unless configured otherwise.
pub const DEFAULT_REDACTED_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

/// Replacement for redacted header values.
pub const REDACTION_MASK: &str = "***";

const DEFAULT_MAX_BODY_LEN: usize = 1024;

/// Instant the request hook saw the request.
#[derive(Debug, Clone, Copy)]
struct LoggedAt(Instant);

/// Middleware logging requests and responses using `tracing`.
///
/// # Example
///
/// ```
/// use rampart::middleware::LoggingMiddleware;
///
/// let logging = LoggingMiddleware::new()
///     .redact_header("X-Session")
///     .log_bodies(true)
///     .max_body_len(256);
/// ```
#[derive(Clone)]
pub struct LoggingMiddleware {
    redacted: BTreeSet<String>,
    log_bodies: bool,
    max_body_len: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LoggingMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingMiddleware")
            .field("redacted", &self.redacted)
            .field("log_bodies", &self.log_bodies)
            .field("max_body_len", &self.max_body_len)
            .finish_non_exhaustive()
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingMiddleware {
    /// Create a logging middleware redacting the default header set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            redacted: DEFAULT_REDACTED_HEADERS
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            log_bodies: false,
            max_body_len: DEFAULT_MAX_BODY_LEN,
            clock: Arc::new(SystemClock),
        }
    }

    /// Also redact `name`.
    #[must_use]
    pub fn redact_header(mut self, name: impl AsRef<str>) -> Self {
        self.redacted.insert(name.as_ref().to_ascii_lowercase());
        self
    }

    /// Replace the redacted header set.
    #[must_use]
    pub fn redacted_headers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.redacted = names
            .into_iter()
            .map(|name| name.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Log request and response bodies at debug level.
    #[must_use]
    pub const fn log_bodies(mut self, enabled: bool) -> Self {
        self.log_bodies = enabled;
        self
    }

    /// Bytes of body kept in logs (default 1024).
    #[must_use]
    pub const fn max_body_len(mut self, len: usize) -> Self {
        self.max_body_len = len;
        self
    }

    /// Clock used to time calls.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn redact(&self, headers: &Headers) -> Headers {
        headers.redacted(self.redacted.iter().map(String::as_str), REDACTION_MASK)
    }

    fn elapsed(&self, request: &Request) -> Option<Duration> {
        request
            .extensions()
            .get::<LoggedAt>()
            .map(|LoggedAt(at)| self.clock.now().saturating_duration_since(*at))
    }

    fn body_preview(&self, body: &[u8]) -> String {
        truncate_body(body, self.max_body_len)
    }
}

/// Lossy UTF-8 rendering of at most `max` bytes of `body`.
fn truncate_body(body: &[u8], max: usize) -> String {
    match body.get(..max) {
        Some(head) if head.len() < body.len() => format!(
            "{}... ({} bytes total)",
            String::from_utf8_lossy(head),
            body.len()
        ),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

fn millis(elapsed: Option<Duration>) -> u64 {
    elapsed.map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            request
                .extensions_mut()
                .insert(LoggedAt(self.clock.now()));

            let method = request.method();
            let url = request.url();
            info!(%method, %url, "sending request");
            debug!(headers = ?self.redact(request.headers()), "request headers");
            if self.log_bodies
                && let Some(body) = request.body()
            {
                debug!(body = %self.body_preview(body), "request body");
            }
            Ok(())
        })
    }

    fn on_response<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            let status = response.status();
            let elapsed_ms = millis(self.elapsed(request));
            if response.is_success() || response.is_redirection() {
                info!(status, elapsed_ms, "request completed");
            } else {
                warn!(status, elapsed_ms, "request failed with HTTP error");
            }
            debug!(headers = ?self.redact(response.headers()), "response headers");
            if self.log_bodies && !response.body().is_empty() {
                debug!(body = %self.body_preview(response.body()), "response body");
            }
            Ok(response)
        })
    }

    fn on_error(&self, request: &Request, error: &Error) {
        let elapsed_ms = millis(self.elapsed(request));
        warn!(method = %request.method(), error = %error, elapsed_ms, "request failed");
    }
}
