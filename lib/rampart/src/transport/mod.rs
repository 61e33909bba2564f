//! Raw transports: anything that turns a [`Request`] into a [`Response`].
//!
//! A transport is any `tower::Service<Request, Response = Response, Error = Error>`.
//! The default one, [`HyperTransport`], is a pooled `hyper-util` client with
//! rustls, wrapped in a concurrency limit and, optionally, redirect following.

mod connector;
mod follow_redirect;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rampart_core::{Error, Headers, Request, RequestErrorKind, Response, Result};
use tower::limit::ConcurrencyLimitLayer;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tower_service::Service;

pub use connector::https_connector;
pub use follow_redirect::{DEFAULT_MAX_REDIRECTS, FollowRedirect, FollowRedirectLayer};

use crate::ClientConfig;

/// Type-erased transport.
pub type BoxTransport = BoxCloneService<Request, Response, Error>;

/// Future returned by transports.
pub type TransportFuture = Pin<Box<dyn Future<Output = Result<Response>> + Send + 'static>>;

/// Thread-safe handle on a [`BoxTransport`].
///
/// `BoxCloneService` is `Send` but not `Sync`; this wrapper keeps it behind a
/// mutex and hands out a fresh clone for every call.
#[derive(Clone)]
pub struct SharedTransport {
    inner: Arc<Mutex<BoxTransport>>,
}

impl std::fmt::Debug for SharedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTransport").finish_non_exhaustive()
    }
}

impl SharedTransport {
    /// Wrap any transport service.
    pub fn new<S>(service: S) -> Self
    where
        S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(BoxCloneService::new(service))),
        }
    }

    /// Send one request, waiting for the service to be ready first.
    pub fn call(&self, request: Request) -> TransportFuture {
        // Lock, clone the service, and release the lock immediately
        let service = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Box::pin(service.oneshot(request))
    }
}

/// Build the default transport described by `config`.
///
/// # Errors
///
/// Returns a TLS error if the rustls configuration cannot be built.
pub fn default_transport(config: &ClientConfig) -> Result<SharedTransport> {
    let hyper = HyperTransport::new(config)?;
    let limited = ConcurrencyLimitLayer::new(config.max_connections).layer(hyper);

    let transport = if config.follow_redirects {
        SharedTransport::new(FollowRedirectLayer::new().layer(limited))
    } else {
        SharedTransport::new(limited)
    };
    Ok(transport)
}

/// HTTP transport using hyper-util with connection pooling and rustls.
///
/// Requests are sent as-is: no retries, no timeout. Those belong to the
/// [`Client`](crate::Client) pipeline.
#[derive(Clone)]
pub struct HyperTransport {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl std::fmt::Debug for HyperTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperTransport").finish_non_exhaustive()
    }
}

impl HyperTransport {
    /// Create a transport using the pool and TLS options of `config`.
    ///
    /// # Errors
    ///
    /// Returns a TLS error if the rustls configuration cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let connector = https_connector(config.connect_timeout, config.verify_ssl)?;

        let inner = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.keepalive_expiry)
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .build(connector);

        Ok(Self { inner })
    }

    /// Build a hyper request from a rampart request.
    fn build_hyper_request(request: &Request) -> Result<http::Request<Full<Bytes>>> {
        let (parts, body) = request.to_http()?.into_parts();
        Ok(http::Request::from_parts(parts, Full::new(body)))
    }

    async fn execute(&self, request: Request) -> Result<Response> {
        let hyper_request = Self::build_hyper_request(&request)?;

        let response = self
            .inner
            .request(hyper_request)
            .await
            .map_err(Self::map_hyper_error)?;

        let status = response.status().as_u16();
        let headers = Headers::from(response.headers());

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::connection(e.to_string()))?
            .to_bytes();

        Ok(Response::new(status, headers, body))
    }

    #[allow(clippy::needless_pass_by_value)]
    fn map_hyper_error(err: hyper_util::client::legacy::Error) -> Error {
        classify_failure(format!("{err}: {}", error_chain(&err)), err.is_connect())
    }
}

/// Map a transport failure message onto a [`RequestErrorKind`].
fn classify_failure(msg: String, is_connect: bool) -> Error {
    let lowered = msg.to_ascii_lowercase();

    if lowered.contains("ssl") || lowered.contains("tls") || lowered.contains("certificate") {
        return Error::tls(msg);
    }
    if lowered.contains("timed out") {
        return Error::request(RequestErrorKind::Timeout, msg);
    }
    // hyper reports a dispatch dropped before completion as "operation was canceled"
    if lowered.contains("canceled") || lowered.contains("cancelled") {
        return Error::request(RequestErrorKind::Cancelled, msg);
    }
    if is_connect {
        return Error::connection(msg);
    }

    Error::request(RequestErrorKind::Other, msg)
}

/// Flattened messages of the error's sources.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut messages = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        messages.push(cause.to_string());
        source = cause.source();
    }
    messages.join(": ")
}

impl Service<Request> for HyperTransport {
    type Response = Response;
    type Error = Error;
    type Future = TransportFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { transport.execute(request).await })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use rampart_core::Method;

    use super::*;

    #[test]
    fn build_hyper_request_copies_everything() {
        let request = Request::builder(
            Method::Post,
            "https://api.example.com/items".parse().expect("url"),
        )
        .header("X-Api-Key", "k")
        .query("v", "2")
        .body("data")
        .build();

        let hyper_request = HyperTransport::build_hyper_request(&request).expect("valid");

        assert_eq!(hyper_request.method(), http::Method::POST);
        assert_eq!(
            hyper_request.uri().to_string(),
            "https://api.example.com/items?v=2"
        );
        assert!(hyper_request.headers().contains_key("x-api-key"));
    }

    #[test]
    fn error_chain_joins_sources() {
        let err = Error::RetryExhausted {
            attempts: 2,
            last_delay: std::time::Duration::from_secs(1),
            last: Box::new(Error::connection("refused")),
        };
        assert_eq!(error_chain(&err), "connection error: refused");
    }

    #[test]
    fn failures_are_classified_by_kind() {
        let kind =
            |msg: &str, is_connect| classify_failure(msg.to_string(), is_connect).request_kind();

        assert_eq!(
            kind("client error (SendRequest): operation was canceled: connection closed", false),
            Some(RequestErrorKind::Cancelled)
        );
        assert_eq!(
            kind("client error (Connect): tcp connect error: Connection refused", true),
            Some(RequestErrorKind::Connect)
        );
        assert_eq!(
            kind("client error (Connect): invalid peer certificate: UnknownIssuer", true),
            Some(RequestErrorKind::Tls)
        );
        assert_eq!(
            kind("client error (Connect): connection timed out", true),
            Some(RequestErrorKind::Timeout)
        );
        assert_eq!(
            kind("client error (SendRequest): connection error", false),
            Some(RequestErrorKind::Other)
        );
    }

    #[test]
    fn cancelled_failures_are_not_retryable() {
        let err = classify_failure("operation was canceled".to_string(), false);
        assert!(err.is_request_error());
        assert!(!err.is_retryable_transport());
    }

    #[tokio::test]
    async fn shared_transport_clones_service_per_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let transport = SharedTransport::new(tower::service_fn(move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, Error>(Response::new(204, Headers::new(), Bytes::new())) }
        }));

        let request = Request::builder(Method::Get, "http://localhost/".parse().expect("url"))
            .build();
        let first = transport.call(request.clone()).await.expect("first");
        let second = transport.clone().call(request).await.expect("second");

        assert_eq!(first.status(), 204);
        assert_eq!(second.status(), 204);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn default_transport_builds_from_config() {
        let config = ClientConfig::builder().follow_redirects(true).build();
        assert!(default_transport(&config).is_ok());
    }
}
