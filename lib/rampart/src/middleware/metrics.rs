//! Metrics middleware using the metrics crate facade.
//!
//! Records call metrics through the `metrics` crate, which allows integration
//! with various backends (Prometheus, `StatsD`, etc.).

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use rampart_core::{Clock, Error, Request, Response, Result, SystemClock};

use super::Middleware;

/// Labels used for metrics.
const LABEL_METHOD: &str = "method";
const LABEL_STATUS: &str = "status";

/// Metric names.
const METRIC_REQUESTS_TOTAL: &str = "http_client_requests_total";
const METRIC_REQUEST_DURATION: &str = "http_client_request_duration_seconds";
const METRIC_REQUEST_SIZE: &str = "http_client_request_size_bytes";
const METRIC_RESPONSE_SIZE: &str = "http_client_response_size_bytes";

/// Instant the request hook saw the request.
#[derive(Debug, Clone, Copy)]
struct StartedAt(Instant);

/// Middleware recording call metrics.
///
/// Records the following metrics:
/// - `http_client_requests_total` (counter): calls, labeled by method and
///   status (`error` when no response was received)
/// - `http_client_request_duration_seconds` (histogram): call duration,
///   labeled by method
/// - `http_client_request_size_bytes` (histogram): request body size
/// - `http_client_response_size_bytes` (histogram): response body size
///
/// # Example
///
/// ```
/// use rampart::middleware::MetricsMiddleware;
///
/// let metrics = MetricsMiddleware::new();
/// ```
#[derive(Clone)]
pub struct MetricsMiddleware {
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MetricsMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsMiddleware").finish_non_exhaustive()
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsMiddleware {
    /// Create a new metrics middleware.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
        }
    }

    /// Clock used to time calls.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn record(&self, request: &Request, status: String) {
        let method = request.method().to_string();

        if let Some(StartedAt(at)) = request.extensions().get::<StartedAt>() {
            let duration = self.clock.now().saturating_duration_since(*at);
            metrics::histogram!(METRIC_REQUEST_DURATION, LABEL_METHOD => method.clone())
                .record(duration.as_secs_f64());
        }

        metrics::counter!(
            METRIC_REQUESTS_TOTAL,
            LABEL_METHOD => method,
            LABEL_STATUS => status
        )
        .increment(1);
    }
}

#[allow(clippy::cast_precision_loss)]
fn size(len: usize) -> f64 {
    len as f64
}

impl Middleware for MetricsMiddleware {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            request
                .extensions_mut()
                .insert(StartedAt(self.clock.now()));
            let len = request.body().map_or(0, bytes::Bytes::len);
            metrics::histogram!(METRIC_REQUEST_SIZE, LABEL_METHOD => request.method().to_string())
                .record(size(len));
            Ok(())
        })
    }

    fn on_response<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<Response>> {
        Box::pin(async move {
            self.record(request, response.status().to_string());
            metrics::histogram!(METRIC_RESPONSE_SIZE, LABEL_METHOD => request.method().to_string())
                .record(size(response.body().len()));
            Ok(response)
        })
    }

    fn on_error(&self, request: &Request, error: &Error) {
        let status = error
            .status()
            .map_or_else(|| "error".to_string(), |status| status.to_string());
        self.record(request, status);
    }
}
