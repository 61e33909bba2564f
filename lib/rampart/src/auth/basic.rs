//! Basic authentication.

use base64::Engine;
use futures_util::future::BoxFuture;
use rampart_core::{Request, Result};

use super::{AuthHandler, non_empty};

/// Adds `Authorization: Basic <base64(user:pass)>` to every request.
///
/// The password may be empty; the username may not.
#[derive(Clone)]
pub struct BasicAuth {
    /// Precomputed header value.
    credentials: String,
    header_name: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("header_name", &self.header_name)
            .finish_non_exhaustive()
    }
}

impl BasicAuth {
    /// Create a basic auth handler.
    ///
    /// # Errors
    ///
    /// Returns [`rampart_core::Error::Config`] if the username is empty.
    pub fn new(username: impl Into<String>, password: impl AsRef<str>) -> Result<Self> {
        let username = non_empty("username", username)?;
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{username}:{}", password.as_ref()));
        Ok(Self {
            credentials: format!("Basic {encoded}"),
            header_name: "Authorization".to_string(),
        })
    }

    /// Send the credentials in another header.
    #[must_use]
    pub fn header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }
}

impl AuthHandler for BasicAuth {
    fn scheme(&self) -> &'static str {
        "basic"
    }

    fn prepare(&self, mut request: Request) -> BoxFuture<'_, Result<Request>> {
        request
            .headers_mut()
            .insert(&self.header_name, self.credentials.clone());
        Box::pin(async move { Ok(request) })
    }
}
