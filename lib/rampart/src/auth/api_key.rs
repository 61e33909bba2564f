//! API key authentication.

use futures_util::future::BoxFuture;
use rampart_core::{Error, Request, Result};

use super::{AuthHandler, non_empty};

/// Header used when no location is given.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Where the API key travels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyLocation {
    /// In the named header.
    Header(String),
    /// In the named query parameter.
    Query(String),
}

/// Adds an API key to every request, in a header or a query parameter.
///
/// # Example
///
/// ```
/// use rampart::auth::ApiKeyAuth;
///
/// // X-API-Key: abc123
/// let in_header = ApiKeyAuth::header("abc123").expect("valid");
///
/// // ?api_key=abc123
/// let in_query = ApiKeyAuth::query("abc123", "api_key").expect("valid");
/// ```
#[derive(Clone)]
pub struct ApiKeyAuth {
    key: String,
    location: ApiKeyLocation,
}

impl std::fmt::Debug for ApiKeyAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyAuth")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl ApiKeyAuth {
    /// Send the key in the `X-API-Key` header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key is empty.
    pub fn header(key: impl Into<String>) -> Result<Self> {
        Self::header_named(key, DEFAULT_API_KEY_HEADER)
    }

    /// Send the key in the named header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key or the header name is empty.
    pub fn header_named(key: impl Into<String>, header: impl Into<String>) -> Result<Self> {
        Ok(Self {
            key: non_empty("api_key", key)?,
            location: ApiKeyLocation::Header(non_empty("header_name", header)?),
        })
    }

    /// Send the key in the named query parameter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the key or the parameter name is empty.
    pub fn query(key: impl Into<String>, param: impl Into<String>) -> Result<Self> {
        Ok(Self {
            key: non_empty("api_key", key)?,
            location: ApiKeyLocation::Query(non_empty("query_param_name", param)?),
        })
    }

    /// Pick the location from optional names; exactly one must be given.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if both or neither location is given, or
    /// if the key is empty.
    pub fn new(key: impl Into<String>, header: Option<&str>, query: Option<&str>) -> Result<Self> {
        match (header, query) {
            (Some(header), None) => Self::header_named(key, header),
            (None, Some(param)) => Self::query(key, param),
            (Some(_), Some(_)) => Err(Error::config(
                "api_key",
                "set either a header name or a query parameter name, not both",
            )),
            (None, None) => Err(Error::config(
                "api_key",
                "a header name or a query parameter name is required",
            )),
        }
    }

    /// Where the key is sent.
    #[must_use]
    pub const fn location(&self) -> &ApiKeyLocation {
        &self.location
    }
}

impl AuthHandler for ApiKeyAuth {
    fn scheme(&self) -> &'static str {
        "api_key"
    }

    fn prepare(&self, mut request: Request) -> BoxFuture<'_, Result<Request>> {
        match &self.location {
            ApiKeyLocation::Header(name) => {
                request.headers_mut().insert(name, self.key.clone());
            }
            ApiKeyLocation::Query(name) => request.set_query(name.clone(), self.key.clone()),
        }
        Box::pin(async move { Ok(request) })
    }
}

#[cfg(test)]
mod tests {
    use rampart_core::Method;

    use super::*;

    fn request() -> Request {
        Request::builder(Method::Get, "https://api.example.com/v1".parse().expect("url"))
            .query("page", "1")
            .build()
    }

    #[tokio::test]
    async fn default_header() {
        let auth = ApiKeyAuth::header("abc123").expect("valid");

        let request = auth.prepare(request()).await.expect("prepared");

        assert_eq!(request.header("x-api-key"), Some("abc123"));
        assert!(request.query_param("api_key").is_none());
    }

    #[tokio::test]
    async fn query_parameter() {
        let auth = ApiKeyAuth::query("abc123", "api_key").expect("valid");

        let request = auth.prepare(request()).await.expect("prepared");

        assert!(request.header("x-api-key").is_none());
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1?page=1&api_key=abc123"
        );
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        for auth in [
            ApiKeyAuth::header("k").expect("header"),
            ApiKeyAuth::query("k", "key").expect("query"),
        ] {
            let once = auth.prepare(request()).await.expect("once");
            let twice = auth.prepare(once.clone()).await.expect("twice");
            assert_eq!(once.url(), twice.url());
            assert_eq!(once.headers(), twice.headers());
        }
    }

    #[test]
    fn exactly_one_location() {
        assert!(
            ApiKeyAuth::new("k", Some("X-Key"), Some("key"))
                .expect_err("both")
                .is_config()
        );
        assert!(ApiKeyAuth::new("k", None, None).expect_err("neither").is_config());
        assert_eq!(
            ApiKeyAuth::new("k", None, Some("key"))
                .expect("query")
                .location(),
            &ApiKeyLocation::Query("key".to_string())
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(ApiKeyAuth::header(" ").expect_err("empty").is_config());
    }
}
