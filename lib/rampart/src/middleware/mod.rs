//! Middleware hooks run around every client call.
//!
//! A [`Middleware`] sees the request before it is dispatched and the final
//! outcome after retries are done. The chain is an explicit ordered list
//! given to [`ClientBuilder`](crate::ClientBuilder):
//!
//! - request hooks run in registration order,
//! - response hooks run in registration order too,
//! - any hook returning `Err` aborts the call with that error.
//!
//! # Available Middleware
//!
//! | Middleware | Feature | Description |
//! |------------|---------|-------------|
//! | [`LoggingMiddleware`] | always | `tracing` events with header redaction |
//! | `MetricsMiddleware` | `middleware-metrics` | `metrics` counters and histograms |
//!
//! # Example: a custom middleware
//!
//! ```
//! use futures_util::future::BoxFuture;
//! use rampart::middleware::Middleware;
//! use rampart::{Request, Result};
//!
//! struct RequestId;
//!
//! impl Middleware for RequestId {
//!     fn name(&self) -> &'static str {
//!         "request-id"
//!     }
//!
//!     fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
//!         Box::pin(async move {
//!             request.headers_mut().insert("X-Request-Id", "42");
//!             Ok(())
//!         })
//!     }
//! }
//! ```

mod logging;
#[cfg(feature = "middleware-metrics")]
mod metrics;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rampart_core::{Error, Request, Response, Result};

pub use logging::{DEFAULT_REDACTED_HEADERS, LoggingMiddleware, REDACTION_MASK};
#[cfg(feature = "middleware-metrics")]
pub use metrics::MetricsMiddleware;

/// Hooks observing and transforming client calls.
///
/// Every hook has a pass-through default, so implementations only override
/// what they need.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and in [`Error::Middleware`].
    fn name(&self) -> &'static str;

    /// Inspect or modify the request before it is dispatched.
    fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        let _ = request;
        Box::pin(async { Ok(()) })
    }

    /// Inspect or replace the final response.
    ///
    /// Called for every response that ends the call, including 4xx/5xx ones;
    /// those are turned into errors after the chain has run.
    fn on_response<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<Response>> {
        let _ = request;
        Box::pin(async move { Ok(response) })
    }

    /// Observe a call that ended with an error.
    fn on_error(&self, request: &Request, error: &Error) {
        let _ = (request, error);
    }
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
        (**self).on_request(request)
    }

    fn on_response<'a>(
        &'a self,
        request: &'a Request,
        response: Response,
    ) -> BoxFuture<'a, Result<Response>> {
        (**self).on_response(request, response)
    }

    fn on_error(&self, request: &Request, error: &Error) {
        (**self).on_error(request, error);
    }
}

/// Ordered middleware list.
#[derive(Clone, Default)]
pub(crate) struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.middleware.iter().map(|m| m.name()))
            .finish()
    }
}

impl MiddlewareChain {
    pub(crate) fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.push(middleware);
    }

    pub(crate) async fn on_request(&self, request: &mut Request) -> Result<()> {
        for middleware in &self.middleware {
            middleware.on_request(request).await?;
        }
        Ok(())
    }

    pub(crate) async fn on_response(&self, request: &Request, response: Response) -> Result<Response> {
        let mut response = response;
        for middleware in &self.middleware {
            response = middleware.on_response(request, response).await?;
        }
        Ok(response)
    }

    pub(crate) fn on_error(&self, request: &Request, error: &Error) {
        for middleware in &self.middleware {
            middleware.on_error(request, error);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use rampart_core::{Headers, Method};

    use super::*;

    /// Appends its tag to a shared journal on every hook.
    struct Recorder {
        tag: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
    }

    impl Middleware for Recorder {
        fn name(&self) -> &'static str {
            self.tag
        }

        fn on_request<'a>(&'a self, request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.journal
                    .lock()
                    .expect("lock")
                    .push(format!("request:{}", self.tag));
                request.headers_mut().insert("x-seen", self.tag);
                Ok(())
            })
        }

        fn on_response<'a>(
            &'a self,
            _request: &'a Request,
            response: Response,
        ) -> BoxFuture<'a, Result<Response>> {
            Box::pin(async move {
                self.journal
                    .lock()
                    .expect("lock")
                    .push(format!("response:{}", self.tag));
                Ok(response)
            })
        }

        fn on_error(&self, _request: &Request, _error: &Error) {
            self.journal
                .lock()
                .expect("lock")
                .push(format!("error:{}", self.tag));
        }
    }

    struct Reject;

    impl Middleware for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn on_request<'a>(&'a self, _request: &'a mut Request) -> BoxFuture<'a, Result<()>> {
            Box::pin(async { Err(Error::middleware("reject", "not allowed")) })
        }
    }

    fn chain(tags: &[&'static str], journal: &Arc<Mutex<Vec<String>>>) -> MiddlewareChain {
        let mut chain = MiddlewareChain::default();
        for &tag in tags {
            chain.push(Arc::new(Recorder {
                tag,
                journal: Arc::clone(journal),
            }));
        }
        chain
    }

    fn request() -> Request {
        Request::builder(Method::Get, "https://example.com/".parse().expect("url")).build()
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&["a", "b"], &journal);
        let mut request = request();

        chain.on_request(&mut request).await.expect("request hooks");
        let response = Response::new(200, Headers::new(), Bytes::new());
        chain
            .on_response(&request, response)
            .await
            .expect("response hooks");
        chain.on_error(&request, &Error::connection("reset"));

        assert_eq!(
            *journal.lock().expect("lock"),
            [
                "request:a",
                "request:b",
                "response:a",
                "response:b",
                "error:a",
                "error:b"
            ]
        );
        assert_eq!(request.header("x-seen"), Some("b"));
    }

    #[tokio::test]
    async fn failing_hook_stops_the_chain() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::default();
        chain.push(Arc::new(Reject));
        chain.push(Arc::new(Recorder {
            tag: "after",
            journal: Arc::clone(&journal),
        }));

        let err = chain
            .on_request(&mut request())
            .await
            .expect_err("rejected");

        assert!(matches!(err, Error::Middleware { ref name, .. } if name == "reject"));
        assert!(journal.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn default_hooks_pass_through() {
        let mut chain = MiddlewareChain::default();
        chain.push(Arc::new(Arc::new(Reject)));

        let response = Response::new(503, Headers::new(), Bytes::from_static(b"busy"));
        let response = chain
            .on_response(&request(), response)
            .await
            .expect("default on_response");

        assert_eq!(response.status(), 503);
        assert_eq!(response.body().as_ref(), b"busy");
    }
}
