//! OAuth2 client-credentials authentication.
//!
//! Tokens are cached until shortly before expiry. When the cache is empty or
//! stale, exactly one fetch runs; concurrent callers await the same shared
//! future instead of starting their own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use rampart_core::{Clock, Error, Method, Request, Result, SystemClock};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{AuthHandler, non_empty};
use crate::ClientConfig;
use crate::transport::{SharedTransport, default_transport};

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
/// Tokens are refreshed this long before they expire.
const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);
/// Bound on a single token fetch.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// A fetched token and the instant it stops being usable.
#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
    margin: Duration,
}

impl CachedToken {
    fn is_valid(&self, now: Instant) -> bool {
        now.checked_add(self.margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

type TokenFetch = Shared<BoxFuture<'static, std::result::Result<CachedToken, String>>>;

#[derive(Default)]
struct TokenState {
    cache: Option<CachedToken>,
    inflight: Option<TokenFetch>,
}

struct Inner {
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    header_name: String,
    token_prefix: String,
    default_lifetime: Duration,
    lifetime: Option<Duration>,
    refresh_margin: Option<Duration>,
    fetch_timeout: Duration,
    transport: SharedTransport,
    clock: Arc<dyn Clock>,
    state: Mutex<TokenState>,
}

/// OAuth2 client-credentials flow with a cached access token.
///
/// # Example
///
/// ```no_run
/// use rampart::auth::OAuth2ClientCredentials;
///
/// # fn example() -> rampart::Result<()> {
/// let auth = OAuth2ClientCredentials::builder(
///     "https://auth.example.com/oauth/token",
///     "my-client",
///     "my-secret",
/// )
/// .scope("read write")
/// .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct OAuth2ClientCredentials {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for OAuth2ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2ClientCredentials")
            .field("token_url", &self.inner.token_url.as_str())
            .field("client_id", &self.inner.client_id)
            .field("scope", &self.inner.scope)
            .finish_non_exhaustive()
    }
}

impl OAuth2ClientCredentials {
    /// Start configuring a client-credentials handler.
    #[must_use]
    pub fn builder(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> OAuth2Builder {
        OAuth2Builder {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            header_name: None,
            token_prefix: None,
            default_lifetime: None,
            lifetime: None,
            refresh_margin: None,
            fetch_timeout: None,
            transport: None,
            clock: None,
        }
    }

    /// Current access token, fetching a new one if the cache is stale.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the token endpoint fails or answers with
    /// an unusable payload.
    pub async fn token(&self) -> Result<String> {
        let fetch = {
            let now = self.inner.clock.now();
            let mut state = self.inner.lock();
            if let Some(cached) = state.cache.as_ref().filter(|c| c.is_valid(now)) {
                return Ok(cached.token.clone());
            }
            if let Some(fetch) = &state.inflight {
                debug!("Joining in-flight OAuth2 token fetch");
                fetch.clone()
            } else {
                let fetch = Self::fetch(Arc::clone(&self.inner)).boxed().shared();
                state.inflight = Some(fetch.clone());
                fetch
            }
        };

        let result = fetch.clone().await;

        {
            let mut state = self.inner.lock();
            if state
                .inflight
                .as_ref()
                .is_some_and(|current| Shared::ptr_eq(current, &fetch))
            {
                state.inflight = None;
                if let Ok(token) = &result {
                    state.cache = Some(token.clone());
                }
            }
        }

        result
            .map(|cached| cached.token)
            .map_err(|message| Error::auth("oauth2", message))
    }

    /// Drop the cached token; the next request fetches a new one.
    pub fn invalidate(&self) {
        self.inner.lock().cache = None;
    }

    async fn fetch(inner: Arc<Inner>) -> std::result::Result<CachedToken, String> {
        info!(token_url = %inner.token_url, "Fetching OAuth2 token");

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", inner.client_id.as_str()),
            ("client_secret", inner.client_secret.as_str()),
        ];
        if let Some(scope) = &inner.scope {
            form.push(("scope", scope.as_str()));
        }

        let request = Request::builder(Method::Post, inner.token_url.clone())
            .header("Accept", "application/json")
            .form(&form)
            .map_err(|e| e.to_string())?
            .build();

        let response = tokio::time::timeout(inner.fetch_timeout, inner.transport.call(request))
            .await
            .map_err(|_| {
                format!(
                    "token endpoint did not answer within {}ms",
                    inner.fetch_timeout.as_millis()
                )
            })?
            .map_err(|e| format!("token request failed: {e}"))?;

        if !response.is_success() {
            warn!(status = response.status(), "OAuth2 token request rejected");
            return Err(format!(
                "token endpoint returned HTTP {}",
                response.status()
            ));
        }

        let payload: TokenResponse = response
            .json()
            .map_err(|e| format!("invalid token response: {e}"))?;
        if payload.access_token.trim().is_empty() {
            return Err("token response has an empty access_token".to_string());
        }

        let lifetime = inner
            .lifetime
            .or_else(|| payload.expires_in.map(Duration::from_secs))
            .unwrap_or(inner.default_lifetime);
        let now = inner.clock.now();
        let expires_at = now.checked_add(lifetime).unwrap_or(now);
        debug!(lifetime_secs = lifetime.as_secs(), "OAuth2 token refreshed");

        Ok(CachedToken {
            token: payload.access_token,
            expires_at,
            // the default margin never eats more than half of a short-lived token
            margin: inner
                .refresh_margin
                .unwrap_or_else(|| DEFAULT_REFRESH_MARGIN.min(lifetime / 2)),
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AuthHandler for OAuth2ClientCredentials {
    fn scheme(&self) -> &'static str {
        "oauth2"
    }

    fn prepare(&self, mut request: Request) -> BoxFuture<'_, Result<Request>> {
        Box::pin(async move {
            let token = self.token().await?;
            request.headers_mut().insert(
                &self.inner.header_name,
                format!("{} {token}", self.inner.token_prefix),
            );
            Ok(request)
        })
    }
}

/// Builder for [`OAuth2ClientCredentials`].
#[must_use]
pub struct OAuth2Builder {
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    header_name: Option<String>,
    token_prefix: Option<String>,
    default_lifetime: Option<Duration>,
    lifetime: Option<Duration>,
    refresh_margin: Option<Duration>,
    fetch_timeout: Option<Duration>,
    transport: Option<SharedTransport>,
    clock: Option<Arc<dyn Clock>>,
}

impl std::fmt::Debug for OAuth2Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Builder")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl OAuth2Builder {
    /// Requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Header carrying the token (default `Authorization`).
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = Some(name.into());
        self
    }

    /// Prefix before the token (default `Bearer`).
    pub fn token_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.token_prefix = Some(prefix.into());
        self
    }

    /// Lifetime used when the endpoint omits `expires_in` (default 1 hour).
    pub const fn default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = Some(lifetime);
        self
    }

    /// Lifetime used regardless of `expires_in`.
    pub const fn lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = Some(lifetime);
        self
    }

    /// How long before expiry the token is refreshed.
    ///
    /// Applied as given. Without it, 30s is used, reduced to half the token
    /// lifetime for tokens living less than a minute.
    pub const fn refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = Some(margin);
        self
    }

    /// Bound on a single token fetch (default 30s).
    pub const fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Transport used to reach the token endpoint.
    pub fn transport(mut self, transport: SharedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Clock used for expiry checks.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the token URL is invalid or a credential
    /// is empty, or a TLS error if the default transport cannot be built.
    pub fn build(self) -> Result<OAuth2ClientCredentials> {
        let token_url = Url::parse(self.token_url.trim()).map_err(|e| {
            Error::config("token_url", format!("invalid URL '{}': {e}", self.token_url))
        })?;
        let client_id = non_empty("client_id", self.client_id)?;
        let client_secret = non_empty("client_secret", self.client_secret)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport(&ClientConfig::default())?,
        };

        Ok(OAuth2ClientCredentials {
            inner: Arc::new(Inner {
                token_url,
                client_id,
                client_secret,
                scope: self.scope.filter(|s| !s.trim().is_empty()),
                header_name: self
                    .header_name
                    .unwrap_or_else(|| "Authorization".to_string()),
                token_prefix: self.token_prefix.unwrap_or_else(|| "Bearer".to_string()),
                default_lifetime: self.default_lifetime.unwrap_or(DEFAULT_LIFETIME),
                lifetime: self.lifetime,
                refresh_margin: self.refresh_margin,
                fetch_timeout: self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
                transport,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                state: Mutex::new(TokenState::default()),
            }),
        })
    }
}
