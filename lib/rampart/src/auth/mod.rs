//! Authentication handlers.
//!
//! An [`AuthHandler`] prepares every outgoing request before middleware runs.
//! Built-in schemes:
//!
//! | Handler | Effect |
//! |---------|--------|
//! | [`BearerAuth`] | `Authorization: Bearer <token>` |
//! | [`ApiKeyAuth`] | key in a header (default `X-API-Key`) or a query parameter |
//! | [`BasicAuth`] | `Authorization: Basic base64(user:pass)` |
//! | [`OAuth2ClientCredentials`] | cached client-credentials token, refreshed on expiry |
//!
//! Custom schemes implement the trait directly.

mod api_key;
mod basic;
mod bearer;
mod oauth2;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rampart_core::{Request, Result};

pub use api_key::{ApiKeyAuth, ApiKeyLocation, DEFAULT_API_KEY_HEADER};
pub use basic::BasicAuth;
pub use bearer::BearerAuth;
pub use oauth2::{OAuth2Builder, OAuth2ClientCredentials};

/// Applies credentials to outgoing requests.
///
/// `prepare` may perform I/O (e.g. fetching a token). Failures surface as
/// [`rampart_core::Error::Auth`] and abort the call.
///
/// # Example
///
/// ```
/// use futures_util::future::BoxFuture;
/// use rampart::auth::AuthHandler;
/// use rampart::{Request, Result};
///
/// struct TenantHeader(String);
///
/// impl AuthHandler for TenantHeader {
///     fn scheme(&self) -> &'static str {
///         "tenant"
///     }
///
///     fn prepare(&self, mut request: Request) -> BoxFuture<'_, Result<Request>> {
///         request.headers_mut().insert("X-Tenant", self.0.clone());
///         Box::pin(async move { Ok(request) })
///     }
/// }
/// ```
pub trait AuthHandler: Send + Sync + 'static {
    /// Short scheme name used in errors and logs.
    fn scheme(&self) -> &'static str;

    /// Return `request` with credentials applied.
    fn prepare(&self, request: Request) -> BoxFuture<'_, Result<Request>>;
}

impl<A: AuthHandler + ?Sized> AuthHandler for Arc<A> {
    fn scheme(&self) -> &'static str {
        (**self).scheme()
    }

    fn prepare(&self, request: Request) -> BoxFuture<'_, Result<Request>> {
        (**self).prepare(request)
    }
}

/// Rejects empty or whitespace-only credentials; others are kept verbatim.
fn non_empty(field: &'static str, value: impl Into<String>) -> Result<String> {
    let value = value.into();
    if value.trim().is_empty() {
        return Err(rampart_core::Error::config(field, "must not be empty"));
    }
    Ok(value)
}
