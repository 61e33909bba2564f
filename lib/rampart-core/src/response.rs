//! HTTP response handling.
//!
//! [`Response`] provides access to status, headers, and body with JSON/text deserialization.
//!
//! # Example
//!
//! ```
//! use rampart_core::{Headers, Response};
//!
//! let response = Response::new(200, Headers::new(), r#"{"id":7}"#.into());
//! assert_eq!(response.json_value().and_then(|v| v["id"].as_u64()), Some(7));
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use bytes::Bytes;

use crate::Headers;

/// HTTP response with status, headers, and a fully buffered body.
///
/// Immutable once constructed. The structured JSON view of the body is
/// parsed at most once, on first access.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Bytes,
    json: OnceLock<Option<serde_json::Value>>,
}

impl Response {
    /// Creates a new response.
    #[must_use]
    pub fn new(status: u16, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
            json: OnceLock::new(),
        }
    }

    /// HTTP status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Single header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Raw response body.
    #[must_use]
    pub const fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume into (status, headers, body).
    #[must_use]
    pub fn into_parts(self) -> (u16, Headers, Bytes) {
        (self.status, self.headers, self.body)
    }

    /// Status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Status is 3xx.
    #[must_use]
    pub const fn is_redirection(&self) -> bool {
        self.status >= 300 && self.status < 400
    }

    /// Status is 4xx.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        self.status >= 400 && self.status < 500
    }

    /// Status is 5xx.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        self.status >= 500 && self.status < 600
    }

    /// Delay requested by the `Retry-After` header, in delta-seconds.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")
            .and_then(crate::error::parse_retry_after)
    }

    /// Structured view of the body.
    ///
    /// `None` when the body is empty or not valid JSON.
    #[must_use]
    pub fn json_value(&self) -> Option<&serde_json::Value> {
        self.json
            .get_or_init(|| {
                if self.body.is_empty() {
                    None
                } else {
                    serde_json::from_slice(&self.body).ok()
                }
            })
            .as_ref()
    }

    /// Deserialize the response body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        crate::from_json(&self.body)
    }

    /// Get the response body as text.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid UTF-8.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Turns a 4xx/5xx response into the matching error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Response`], or [`crate::Error::RateLimited`]
    /// for 429.
    pub fn error_for_status(self) -> crate::Result<Self> {
        if self.status >= 400 {
            Err(crate::Error::from_status(
                self.status,
                self.headers,
                self.body,
            ))
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, headers: &[(&str, &str)], body: &'static str) -> Response {
        Response::new(
            status,
            headers.iter().copied().collect(),
            Bytes::from_static(body.as_bytes()),
        )
    }

    #[test]
    fn response_basic() {
        let response = response(200, &[("Content-Type", "application/json")], r#"{"id":1}"#);

        assert_eq!(response.status(), 200);
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert!(response.is_success());
        assert!(!response.is_client_error());
        assert!(!response.is_server_error());
    }

    #[test]
    fn response_status_checks() {
        assert!(response(301, &[], "").is_redirection());
        assert!(response(404, &[], "").is_client_error());
        assert!(response(500, &[], "").is_server_error());
    }

    #[test]
    fn response_json() {
        #[derive(Debug, PartialEq, serde::Deserialize)]
        struct User {
            id: u64,
            name: String,
        }

        let response = response(200, &[], r#"{"id":1,"name":"test"}"#);

        let user: User = response.json().expect("deserialize");
        assert_eq!(
            user,
            User {
                id: 1,
                name: "test".to_string()
            }
        );
    }

    #[test]
    fn json_value_is_lazy_and_tolerant() {
        let json = response(200, &[], r#"{"ok":true}"#);
        let first = json.json_value().map(std::ptr::from_ref);
        let second = json.json_value().map(std::ptr::from_ref);
        assert!(first.is_some());
        assert_eq!(first, second);

        assert!(response(204, &[], "").json_value().is_none());
        assert!(response(200, &[], "<html>").json_value().is_none());
    }

    #[test]
    fn response_text() {
        let response = response(200, &[], "Hello, World!");
        assert_eq!(response.text().expect("text"), "Hello, World!");
    }

    #[test]
    fn retry_after_header() {
        assert_eq!(
            response(503, &[("Retry-After", "5")], "").retry_after(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(response(503, &[], "").retry_after(), None);
    }

    #[test]
    fn error_for_status() {
        assert!(response(200, &[], "").error_for_status().is_ok());

        let err = response(404, &[], "missing")
            .error_for_status()
            .expect_err("404");
        assert_eq!(err.status(), Some(404));

        let err = response(429, &[], "").error_for_status().expect_err("429");
        assert!(err.is_rate_limited());
    }
}
