//! Bearer token authentication.

use futures_util::future::BoxFuture;
use rampart_core::{Request, Result};

use super::{AuthHandler, non_empty};

/// Adds `Authorization: Bearer <token>` to every request.
///
/// # Example
///
/// ```
/// use rampart::auth::BearerAuth;
///
/// let auth = BearerAuth::new("my-secret-token").expect("non-empty token");
/// ```
#[derive(Clone)]
pub struct BearerAuth {
    token: String,
    header_name: String,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

impl BearerAuth {
    /// Create a bearer auth handler with the given token.
    ///
    /// # Errors
    ///
    /// Returns [`rampart_core::Error::Config`] if the token is empty.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            token: non_empty("token", token)?,
            header_name: "Authorization".to_string(),
        })
    }

    /// Send the token in another header.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }
}

impl AuthHandler for BearerAuth {
    fn scheme(&self) -> &'static str {
        "bearer"
    }

    fn prepare(&self, mut request: Request) -> BoxFuture<'_, Result<Request>> {
        request
            .headers_mut()
            .insert(&self.header_name, format!("Bearer {}", self.token));
        Box::pin(async move { Ok(request) })
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::Method;

    use super::*;

    fn request() -> Request {
        Request::builder(Method::Get, "https://api.example.com/".parse().expect("url")).build()
    }

    #[tokio::test]
    async fn adds_bearer_header() {
        let auth = BearerAuth::new("secret").expect("valid");

        let request = auth.prepare(request()).await.expect("prepared");

        assert_eq!(request.header("authorization"), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn custom_header_name() {
        let auth = BearerAuth::new("secret")
            .expect("valid")
            .header_name("X-Access-Token");

        let request = auth.prepare(request()).await.expect("prepared");

        assert_eq!(request.header("x-access-token"), Some("Bearer secret"));
        assert!(request.header("authorization").is_none());
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        let auth = BearerAuth::new("secret").expect("valid");

        let once = auth.prepare(request()).await.expect("once");
        let twice = auth.prepare(once.clone()).await.expect("twice");

        assert_eq!(once.headers(), twice.headers());
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(BearerAuth::new("   ").expect_err("empty").is_config());
    }

    #[test]
    fn debug_hides_token() {
        let auth = BearerAuth::new("secret").expect("valid");
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
