//! HTTP request building.
//!
//! Use [`Request::builder`] to construct requests with headers, query parameters, and bodies.
//!
//! # Example
//!
//! ```
//! use rampart_core::{Method, Request};
//!
//! let request = Request::builder(Method::Get, "https://api.example.com".parse().unwrap())
//!     .header("Accept", "application/json")
//!     .query("page", "1")
//!     .build();
//! assert_eq!(request.url().as_str(), "https://api.example.com/?page=1");
//! ```

use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::{Headers, Method};

/// An HTTP request with method, URL, headers, query mapping and optional body.
///
/// Requests are mutable while auth handlers and middleware prepare them, and
/// are only read afterwards.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    query: Vec<(String, String)>,
    body: Option<Bytes>,
    timeout: Option<Duration>,
    extensions: http::Extensions,
}

impl Request {
    /// Creates a new [`RequestBuilder`].
    #[must_use]
    pub fn builder(method: Method, url: Url) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    /// HTTP method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request URL, without the query mapping.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.url
    }

    /// Request URL with the query mapping appended.
    #[must_use]
    pub fn url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &self.query {
                pairs.append_pair(name, value);
            }
        }
        url
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to headers.
    #[must_use]
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Single header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Query parameters in insertion order.
    #[must_use]
    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Single query parameter by name.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Sets a query parameter, replacing any previous value for the same name.
    pub fn set_query(&mut self, name: impl Into<String>, value: impl Into<String>) {
        set_pair(&mut self.query, name.into(), value.into());
    }

    /// Request body.
    #[must_use]
    pub const fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Per-call timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Sets the per-call timeout.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Typed per-call state shared between middleware hooks.
    #[must_use]
    pub fn extensions(&self) -> &http::Extensions {
        &self.extensions
    }

    /// Mutable access to the extensions.
    #[must_use]
    pub fn extensions_mut(&mut self) -> &mut http::Extensions {
        &mut self.extensions
    }

    /// Converts into an [`http::Request`] ready for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if a header name or value is not valid HTTP.
    pub fn to_http(&self) -> crate::Result<http::Request<Bytes>> {
        let mut builder = http::Request::builder()
            .method(http::Method::from(self.method))
            .uri(self.url().as_str());

        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }

        builder
            .body(self.body.clone().unwrap_or_default())
            .map_err(|e| crate::Error::config("request", e.to_string()))
    }
}

fn set_pair(pairs: &mut Vec<(String, String)>, name: String, value: String) {
    match pairs.iter_mut().find(|(key, _)| *key == name) {
        Some(slot) => slot.1 = value,
        None => pairs.push((name, value)),
    }
}

/// Builder for constructing [`Request`] instances.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            request: Request {
                method,
                url,
                headers: Headers::new(),
                query: Vec::new(),
                body: None,
                timeout: None,
                extensions: http::Extensions::new(),
            },
        }
    }

    /// Sets a header.
    #[must_use]
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    /// Sets multiple headers.
    #[must_use]
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        self.request.headers.extend(headers);
        self
    }

    /// Sets a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.set_query(name, value);
        self
    }

    /// Sets multiple query parameters.
    #[must_use]
    pub fn query_pairs<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in pairs {
            self.request.set_query(name, value);
        }
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = Some(body.into());
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = Some(timeout);
        self
    }

    /// Set a JSON body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn json<T: serde::Serialize + ?Sized>(self, value: &T) -> crate::Result<Self> {
        let body = crate::to_json(value)?;
        Ok(self
            .header("Content-Type", crate::ContentType::Json.as_str())
            .body(body))
    }

    /// Set a form-urlencoded body.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn form<T: serde::Serialize + ?Sized>(self, value: &T) -> crate::Result<Self> {
        let body = crate::to_form(value)?;
        Ok(self
            .header("Content-Type", crate::ContentType::FormUrlEncoded.as_str())
            .body(body))
    }

    /// Builds the [`Request`].
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid URL")
    }

    #[test]
    fn request_builder_basic() {
        let request = Request::builder(Method::Get, url("https://api.example.com/users"))
            .header("Accept", "application/json")
            .build();

        assert_eq!(request.method(), Method::Get);
        assert_eq!(request.base_url().as_str(), "https://api.example.com/users");
        assert_eq!(request.header("accept"), Some("application/json"));
        assert!(request.body().is_none());
        assert!(request.timeout().is_none());
    }

    #[test]
    fn query_last_write_wins_and_keeps_order() {
        let request = Request::builder(Method::Get, url("https://api.example.com/users"))
            .query("page", "1")
            .query("limit", "10")
            .query("page", "2")
            .build();

        assert_eq!(request.query_param("page"), Some("2"));
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/users?page=2&limit=10"
        );
    }

    #[test]
    fn url_keeps_existing_query() {
        let request = Request::builder(Method::Get, url("https://api.example.com/s?q=rust"))
            .query("page", "1")
            .build();
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/s?q=rust&page=1"
        );
    }

    #[test]
    fn request_builder_json() {
        #[derive(serde::Serialize)]
        struct User {
            name: String,
        }

        let request = Request::builder(Method::Post, url("https://api.example.com/users"))
            .json(&User {
                name: "test".to_string(),
            })
            .expect("json")
            .build();

        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(
            request.body().map(AsRef::as_ref),
            Some(br#"{"name":"test"}"#.as_slice())
        );
    }

    #[test]
    fn request_builder_form() {
        let request = Request::builder(Method::Post, url("https://auth.example.com/token"))
            .form(&[("grant_type", "client_credentials")])
            .expect("form")
            .build();

        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.body().map(AsRef::as_ref),
            Some(b"grant_type=client_credentials".as_slice())
        );
    }

    #[test]
    fn to_http_carries_headers_and_query() {
        let request = Request::builder(Method::Put, url("https://api.example.com/items/1"))
            .header("X-Request-Id", "abc")
            .query("dry_run", "true")
            .body("payload")
            .build();

        let http_request = request.to_http().expect("valid http request");
        assert_eq!(http_request.method(), http::Method::PUT);
        assert_eq!(
            http_request.uri().to_string(),
            "https://api.example.com/items/1?dry_run=true"
        );
        assert_eq!(
            http_request.headers().get("x-request-id").map(|v| v.as_bytes()),
            Some(b"abc".as_slice())
        );
        assert_eq!(http_request.body().as_ref(), b"payload");
    }
}
