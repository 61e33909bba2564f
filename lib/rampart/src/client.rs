//! The resilient HTTP client.
//!
//! Every call goes through the same pipeline:
//!
//! 1. URL resolution against the base URL
//! 2. authentication
//! 3. middleware request hooks
//! 4. rate limiting (optional)
//! 5. circuit breaker admission (optional)
//! 6. transport attempts, each bounded by the request timeout, with
//!    exponential backoff between retryable failures
//! 7. middleware response (or error) hooks, breaker bookkeeping, and
//!    conversion of 4xx/5xx responses into errors

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rampart_core::{
    Clock, ContentType, Error, Method, Request, Response, Result, Sleeper, SystemClock,
    TokioSleeper, to_form, to_json,
};
use tower_service::Service;
use tracing::{Instrument, debug, info_span, warn};
use url::Url;

use crate::auth::AuthHandler;
use crate::circuit_breaker::{BreakerPermit, CircuitBreaker};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::rate_limit::TokenBucket;
use crate::retry::{AttemptOutcome, RetryPolicy};
use crate::transport::{SharedTransport, default_transport};
use crate::{ClientConfig, ClientConfigBuilder};

type TransportFactory = Arc<dyn Fn(&ClientConfig) -> Result<SharedTransport> + Send + Sync>;

/// Optional arguments of a single call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use rampart::RequestOptions;
///
/// let options = RequestOptions::new()
///     .header("X-Request-Id", "42")
///     .query("page", "2")
///     .json(&serde_json::json!({ "name": "rampart" }))
///     .timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Default)]
#[must_use]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<(Option<ContentType>, Bytes)>,
    timeout: Option<Duration>,
    error: Option<Error>,
}

impl RequestOptions {
    /// No headers, no query, no body, default timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Send `value` as a JSON body.
    ///
    /// A serialization failure is reported when the call is made.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Self {
        match to_json(value) {
            Ok(body) => self.body = Some((Some(ContentType::Json), body)),
            Err(error) => self.error = Some(error),
        }
        self
    }

    /// Send `value` as a form-urlencoded body.
    ///
    /// A serialization failure is reported when the call is made.
    pub fn form<T: serde::Serialize + ?Sized>(mut self, value: &T) -> Self {
        match to_form(value) {
            Ok(body) => self.body = Some((Some(ContentType::FormUrlEncoded), body)),
            Err(error) => self.error = Some(error),
        }
        self
    }

    /// Send raw bytes as the body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some((None, body.into()));
        self
    }

    /// Per-attempt timeout for this call.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn into_request(self, method: Method, url: Url, default_timeout: Duration) -> Result<Request> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let mut builder = Request::builder(method, url)
            .timeout(self.timeout.unwrap_or(default_timeout))
            .query_pairs(self.query);
        if let Some((content_type, body)) = self.body {
            if let Some(content_type) = content_type {
                builder = builder.header("Content-Type", content_type.as_str());
            }
            builder = builder.body(body);
        }
        // Caller headers win over the body's content type
        Ok(builder.headers(self.headers).build())
    }
}

struct ClientInner {
    base_url: String,
    config: Arc<ClientConfig>,
    retry: RetryPolicy,
    auth: Option<Arc<dyn AuthHandler>>,
    middleware: MiddlewareChain,
    limiter: Option<Arc<TokenBucket>>,
    breaker: Option<Arc<CircuitBreaker>>,
    sleeper: Arc<dyn Sleeper>,
    factory: TransportFactory,
    transport: Mutex<Option<SharedTransport>>,
}

/// Resilient asynchronous HTTP client.
///
/// Cheap to clone: clones share configuration, breaker, limiter and
/// connection pool.
///
/// # Example
///
/// ```no_run
/// use rampart::auth::BearerAuth;
/// use rampart::{Client, ClientConfig, RequestOptions};
///
/// # async fn example() -> rampart::Result<()> {
/// let config = ClientConfig::builder()
///     .retry_attempts(5)
///     .enable_circuit_breaker(true)
///     .build();
/// let client = Client::builder("https://api.example.com")
///     .config(config)
///     .auth(BearerAuth::new("my-token")?)
///     .build()?;
///
/// let response = client.get("/users/42", RequestOptions::new()).await?;
/// let user: serde_json::Value = response.json()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("config", &self.inner.config)
            .field("middleware", &self.inner.middleware)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Final state of the attempt loop.
struct Attempted {
    result: Result<Response>,
    attempts: u32,
    last_delay: Duration,
    exhausted: bool,
}

impl Client {
    /// Create a client builder for `base_url`.
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(base_url)
    }

    /// Base URL, without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// Get the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Circuit breaker guarding calls, if enabled.
    #[must_use]
    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.inner.breaker.as_deref()
    }

    /// Rate limiter throttling calls, if enabled.
    #[must_use]
    pub fn rate_limiter(&self) -> Option<&TokenBucket> {
        self.inner.limiter.as_deref()
    }

    /// Returns `true` while a connection pool is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Acquire the connection pool now instead of on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be built.
    pub fn open(&self) -> Result<()> {
        self.transport().map(drop)
    }

    /// Release the connection pool.
    ///
    /// Calls already in flight keep their connections; the next call opens a
    /// fresh pool.
    pub fn close(&self) {
        let released = self
            .inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!("Connection pool released");
        }
    }

    /// Run `f` with this client, releasing the pool however `f` ends.
    ///
    /// The pool is released when `f` returns, when it panics, and when the
    /// returned future is dropped before completion.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = CloseOnDrop(self.clone());
        f(self.clone()).await
    }

    /// Send a `GET` request.
    pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Get, path, options).await
    }

    /// Send a `POST` request.
    pub async fn post(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Post, path, options).await
    }

    /// Send a `PUT` request.
    pub async fn put(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Put, path, options).await
    }

    /// Send a `DELETE` request.
    pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Delete, path, options).await
    }

    /// Send a `PATCH` request.
    pub async fn patch(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Patch, path, options).await
    }

    /// Send a `HEAD` request.
    pub async fn head(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Head, path, options).await
    }

    /// Send an `OPTIONS` request.
    pub async fn options(&self, path: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::Options, path, options).await
    }

    /// Send a request through the full pipeline.
    ///
    /// `path` is appended to the base URL unless it is an absolute
    /// `http://` or `https://` URL.
    ///
    /// # Errors
    ///
    /// - [`Error::Response`] / [`Error::RateLimited`] for 4xx/5xx answers
    /// - [`Error::Request`] when the transport fails
    /// - [`Error::RetryExhausted`] when every attempt failed
    /// - [`Error::CircuitOpen`] when the breaker rejects the call
    /// - [`Error::Auth`], [`Error::Middleware`] or [`Error::Config`] from the
    ///   request-side pipeline
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.resolve_url(path)?;
        let span = info_span!("http_request", %method, url = %url);
        self.execute(method, url, options).instrument(span).await
    }

    fn resolve_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(Error::InvalidUrl);
        }
        Url::parse(&format!("{}{path}", self.inner.base_url)).map_err(Error::InvalidUrl)
    }

    fn transport(&self) -> Result<SharedTransport> {
        let mut slot = self
            .inner
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = slot.as_ref() {
            return Ok(transport.clone());
        }
        let transport = (self.inner.factory)(&self.inner.config)?;
        debug!("Connection pool opened");
        *slot = Some(transport.clone());
        Ok(transport)
    }

    async fn execute(&self, method: Method, url: Url, options: RequestOptions) -> Result<Response> {
        let inner = &self.inner;
        let mut request = options.into_request(method, url, inner.config.timeout)?;

        if let Some(auth) = &inner.auth {
            request = auth.prepare(request).await?;
        }
        inner.middleware.on_request(&mut request).await?;

        let mut permit = match self.admit().await {
            Ok(permit) => permit,
            Err(error) => {
                inner.middleware.on_error(&request, &error);
                return Err(error);
            }
        };

        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(error) => {
                inner.middleware.on_error(&request, &error);
                return Err(error);
            }
        };

        let Attempted {
            result,
            attempts,
            last_delay,
            exhausted,
        } = self.attempts(&request, &transport, permit.as_mut()).await;

        let breaker_failure = is_breaker_failure(&result);
        let result = match result {
            Ok(response) => inner.middleware.on_response(&request, response).await,
            Err(error) => {
                inner.middleware.on_error(&request, &error);
                Err(error)
            }
        };

        if let Some(permit) = permit {
            if breaker_failure {
                permit.failure();
            } else {
                permit.success();
            }
        }

        let result = result.and_then(Response::error_for_status);
        if exhausted {
            return result.map_err(|last| Error::RetryExhausted {
                attempts,
                last_delay,
                last: Box::new(last),
            });
        }
        result
    }

    /// Rate limiting, then breaker admission.
    async fn admit(&self) -> Result<Option<BreakerPermit<'_>>> {
        if let Some(limiter) = &self.inner.limiter {
            limiter.acquire(1).await?;
        }
        self.inner
            .breaker
            .as_deref()
            .map(CircuitBreaker::try_acquire)
            .transpose()
    }

    async fn attempts(
        &self,
        request: &Request,
        transport: &SharedTransport,
        mut permit: Option<&mut BreakerPermit<'_>>,
    ) -> Attempted {
        let policy = &self.inner.retry;
        let max_attempts = policy.max_attempts();
        let mut attempt = 0;
        let mut last_delay = Duration::ZERO;

        loop {
            let result = self.attempt(request, transport).await;
            if is_breaker_failure(&result)
                && let Some(permit) = permit.as_deref_mut()
            {
                permit.observe_failure();
            }

            let outcome = policy.classify(request.method(), result);
            let retry_after = outcome.retry_after();
            let result = match outcome {
                AttemptOutcome::Success(response) => Ok(response),
                AttemptOutcome::Terminal(error) => Err(error),
                AttemptOutcome::Retryable(result) if attempt + 1 < max_attempts => {
                    let delay = policy.delay(attempt, retry_after);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %describe(&result),
                        "Retrying request"
                    );
                    drop(result);
                    self.inner.sleeper.sleep(delay).await;
                    last_delay = delay;
                    attempt += 1;
                    continue;
                }
                AttemptOutcome::Retryable(result) => {
                    return Attempted {
                        result,
                        attempts: attempt + 1,
                        last_delay,
                        exhausted: max_attempts > 1,
                    };
                }
            };

            return Attempted {
                result,
                attempts: attempt + 1,
                last_delay,
                exhausted: false,
            };
        }
    }

    /// One transport call bounded by the request timeout.
    async fn attempt(&self, request: &Request, transport: &SharedTransport) -> Result<Response> {
        let timeout = request.timeout().unwrap_or(self.inner.config.timeout);
        match tokio::time::timeout(timeout, transport.call(request.clone())).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(timeout)),
        }
    }
}

/// Transport errors and 5xx responses count against the breaker.
fn is_breaker_failure(result: &Result<Response>) -> bool {
    match result {
        Ok(response) => response.is_server_error(),
        Err(error) => error.is_retryable_transport(),
    }
}

fn describe(result: &Result<Response>) -> String {
    match result {
        Ok(response) => format!("HTTP {}", response.status()),
        Err(error) => error.to_string(),
    }
}

struct CloseOnDrop(Client);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Builder for [`Client`].
///
/// The rate limiter and circuit breaker are created from the configuration
/// when enabled there, unless explicit instances are supplied.
#[must_use]
pub struct ClientBuilder {
    base_url: String,
    config: Option<ClientConfig>,
    auth: Option<Arc<dyn AuthHandler>>,
    middleware: MiddlewareChain,
    factory: Option<TransportFactory>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    limiter: Option<Arc<TokenBucket>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .field("middleware", &self.middleware)
            .field("custom_transport", &self.factory.is_some())
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a builder for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            config: None,
            auth: None,
            middleware: MiddlewareChain::default(),
            factory: None,
            clock: None,
            sleeper: None,
            limiter: None,
            breaker: None,
        }
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Configure through a [`ClientConfigBuilder`].
    pub fn configure(self, f: impl FnOnce(ClientConfigBuilder) -> ClientConfigBuilder) -> Self {
        let config = f(ClientConfig::builder()).build();
        self.config(config)
    }

    /// Authenticate every request with `auth`.
    pub fn auth(mut self, auth: impl AuthHandler) -> Self {
        self.auth = Some(Arc::new(auth));
        self
    }

    /// Append `middleware` to the chain.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Send requests through `service` instead of the default hyper transport.
    pub fn transport<S>(mut self, service: S) -> Self
    where
        S: Service<Request, Response = Response, Error = Error> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        let shared = SharedTransport::new(service);
        let factory: TransportFactory =
            Arc::new(move |_config: &ClientConfig| -> Result<SharedTransport> { Ok(shared.clone()) });
        self.factory = Some(factory);
        self
    }

    /// Clock used by the limiter and breaker built from the configuration.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sleeper used for backoff and rate-limit waits.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Use `limiter` whatever the configuration says.
    pub fn rate_limiter(mut self, limiter: TokenBucket) -> Self {
        self.limiter = Some(Arc::new(limiter));
        self
    }

    /// Use `breaker` whatever the configuration says.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(Arc::new(breaker));
        self
    }

    /// Build the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration or the base URL is
    /// invalid.
    pub fn build(self) -> Result<Client> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if !base_url.is_empty() {
            Url::parse(&base_url).map_err(|e| {
                Error::config("base_url", format!("invalid URL '{base_url}': {e}"))
            })?;
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));

        let limiter = match self.limiter {
            Some(limiter) => Some(limiter),
            None if config.enable_rate_limiting => Some(Arc::new(TokenBucket::with_time(
                config.rate_limit_rate,
                config.rate_limit_burst,
                Arc::clone(&clock),
                Arc::clone(&sleeper),
            )?)),
            None => None,
        };
        let breaker = match self.breaker {
            Some(breaker) => Some(breaker),
            None if config.enable_circuit_breaker => Some(Arc::new(CircuitBreaker::with_clock(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_recovery_timeout,
                Arc::clone(&clock),
            )?)),
            None => None,
        };

        let factory: TransportFactory = match self.factory {
            Some(factory) => factory,
            None => Arc::new(default_transport),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                base_url,
                retry: RetryPolicy::from_config(&config),
                config: Arc::new(config),
                auth: self.auth,
                middleware: self.middleware,
                limiter,
                breaker,
                sleeper,
                factory,
                transport: Mutex::new(None),
            }),
        })
    }
}
