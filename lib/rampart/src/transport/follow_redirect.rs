//! Redirect following for the default transport.
//!
//! Follows 3xx responses carrying a `Location` header, resolving relative
//! locations against the current URL.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use rampart_core::{Error, Method, Request, Response, Result};
use tower::{Layer, Service, ServiceExt};
use url::Url;

/// Default maximum number of redirects to follow.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Layer that follows HTTP redirects.
#[derive(Debug, Clone)]
pub struct FollowRedirectLayer {
    max_redirects: usize,
}

impl Default for FollowRedirectLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl FollowRedirectLayer {
    /// Create a new follow redirect layer with default max redirects (10).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    /// Create a new follow redirect layer with a custom max redirects.
    #[must_use]
    pub const fn with_max_redirects(max_redirects: usize) -> Self {
        Self { max_redirects }
    }
}

impl<S> Layer<S> for FollowRedirectLayer {
    type Service = FollowRedirect<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FollowRedirect {
            inner,
            max_redirects: self.max_redirects,
        }
    }
}

/// Service that follows HTTP redirects.
#[derive(Debug, Clone)]
pub struct FollowRedirect<S> {
    inner: S,
    max_redirects: usize,
}

/// Check if a status code is a followed redirect.
const fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Determine the method for the redirected request.
///
/// - 301, 302, 303: Always use GET
/// - 307, 308: Preserve original method
const fn redirect_method(status: u16, original: Method) -> Method {
    match status {
        307 | 308 => original,
        _ => Method::Get,
    }
}

/// Resolve a redirect Location URL relative to the current request URL.
fn resolve_redirect_url(base_url: &Url, location: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(location) {
        return Ok(url);
    }
    base_url.join(location).map_err(Error::InvalidUrl)
}

/// Request for the next hop.
///
/// The query of the previous hop is not carried over; the new location
/// defines its own. The body is dropped when the method becomes GET.
fn redirected_request(previous: &Request, status: u16, location: Url) -> Request {
    let method = redirect_method(status, previous.method());
    let mut builder = Request::builder(method, location).headers(previous.headers().iter());

    if !matches!(method, Method::Get | Method::Head)
        && let Some(body) = previous.body()
    {
        builder = builder.body(body.clone());
    }
    if let Some(timeout) = previous.timeout() {
        builder = builder.timeout(timeout);
    }

    let mut request = builder.build();
    if matches!(method, Method::Get | Method::Head) {
        request.headers_mut().remove("content-type");
        request.headers_mut().remove("content-length");
    }
    *request.extensions_mut() = previous.extensions().clone();
    request
}

impl<S> Service<Request> for FollowRedirect<S>
where
    S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let inner = self.inner.clone();
        let max_redirects = self.max_redirects;

        Box::pin(async move {
            let mut current_request = request;
            let mut redirects = 0;

            loop {
                let response = inner.clone().oneshot(current_request.clone()).await?;

                if !is_redirect(response.status()) {
                    return Ok(response);
                }

                if redirects >= max_redirects {
                    return Err(Error::TooManyRedirects {
                        count: redirects,
                        max: max_redirects,
                    });
                }

                let location = response.header("location").ok_or_else(|| {
                    Error::InvalidRedirect("redirect response missing Location header".into())
                })?;
                let new_url = resolve_redirect_url(&current_request.url(), location)?;
                tracing::debug!(
                    status = response.status(),
                    location = %new_url,
                    "Following redirect"
                );

                current_request = redirected_request(&current_request, response.status(), new_url);
                redirects += 1;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use rampart_core::Headers;

    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid URL")
    }

    #[test]
    fn default_max_redirects() {
        let layer = FollowRedirectLayer::new();
        assert_eq!(layer.max_redirects, DEFAULT_MAX_REDIRECTS);
    }

    #[test]
    fn is_redirect_statuses() {
        for status in [301, 302, 303, 307, 308] {
            assert!(is_redirect(status));
        }
        for status in [200, 300, 304, 404, 500] {
            assert!(!is_redirect(status));
        }
    }

    #[test]
    fn redirect_method_rules() {
        assert_eq!(redirect_method(301, Method::Post), Method::Get);
        assert_eq!(redirect_method(302, Method::Put), Method::Get);
        assert_eq!(redirect_method(303, Method::Delete), Method::Get);
        assert_eq!(redirect_method(307, Method::Post), Method::Post);
        assert_eq!(redirect_method(308, Method::Put), Method::Put);
    }

    #[test]
    fn resolve_absolute_and_relative_urls() {
        let base = url("https://example.com/old/path");
        assert_eq!(
            resolve_redirect_url(&base, "https://other.com/new")
                .expect("absolute")
                .as_str(),
            "https://other.com/new"
        );
        assert_eq!(
            resolve_redirect_url(&base, "/new/path")
                .expect("relative")
                .as_str(),
            "https://example.com/new/path"
        );
        assert_eq!(
            resolve_redirect_url(&base, "sibling")
                .expect("sibling")
                .as_str(),
            "https://example.com/old/sibling"
        );
    }

    #[test]
    fn see_other_drops_body() {
        let previous = Request::builder(Method::Post, url("https://example.com/form"))
            .header("Content-Type", "application/json")
            .header("X-Trace", "1")
            .body("{}")
            .build();

        let next = redirected_request(&previous, 303, url("https://example.com/done"));

        assert_eq!(next.method(), Method::Get);
        assert!(next.body().is_none());
        assert!(next.header("content-type").is_none());
        assert_eq!(next.header("x-trace"), Some("1"));
    }

    #[test]
    fn temporary_redirect_keeps_body() {
        let previous = Request::builder(Method::Put, url("https://example.com/a"))
            .body("payload")
            .build();

        let next = redirected_request(&previous, 307, url("https://example.com/b"));

        assert_eq!(next.method(), Method::Put);
        assert_eq!(next.body().map(AsRef::as_ref), Some(b"payload".as_slice()));
    }

    fn redirecting_service(
        hops: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl Service<Request, Response = Response, Error = Error, Future: Send> + Clone + Send + 'static
    {
        tower::service_fn(move |request: Request| {
            let calls = Arc::clone(&calls);
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < hops {
                    let headers: Headers = [("Location", format!("/hop/{}", call + 1))]
                        .into_iter()
                        .collect();
                    Ok(Response::new(302, headers, Bytes::new()))
                } else {
                    Ok(Response::new(
                        200,
                        Headers::new(),
                        Bytes::from(request.url().path().to_string()),
                    ))
                }
            }
        })
    }

    #[tokio::test]
    async fn follows_redirect_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service =
            FollowRedirectLayer::new().layer(redirecting_service(2, Arc::clone(&calls)));

        let request = Request::builder(Method::Get, url("https://example.com/start")).build();
        let response = service.oneshot(request).await.expect("followed");

        assert_eq!(response.status(), 200);
        assert_eq!(response.body().as_ref(), b"/hop/2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_after_max_redirects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let service = FollowRedirectLayer::with_max_redirects(2)
            .layer(redirecting_service(usize::MAX, Arc::clone(&calls)));

        let request = Request::builder(Method::Get, url("https://example.com/loop")).build();
        let err = service.oneshot(request).await.expect_err("loop");

        assert!(matches!(err, Error::TooManyRedirects { count: 2, max: 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
