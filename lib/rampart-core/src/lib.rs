//! Core types and collaborator contracts for the rampart HTTP client.
//!
//! This crate provides the foundational types used by rampart:
//! - [`Method`] - HTTP method enum
//! - [`Headers`] - case-insensitive header mapping
//! - [`Request`] and [`RequestBuilder`] - HTTP request types
//! - [`Response`] - HTTP response type
//! - [`Error`] and [`Result`] - Error handling
//! - [`Clock`] and [`Sleeper`] - time collaborators, swappable in tests
//! - [`StatusCode`] - HTTP status codes (re-exported from `http` crate)

mod body;
mod error;
mod headers;
mod method;
pub mod prelude;
mod request;
mod response;
mod time;

pub use body::{ContentType, from_json, to_form, to_json};
pub use error::{Error, RequestErrorKind, Result, parse_retry_after};
pub use headers::Headers;
pub use method::Method;
pub use request::{Request, RequestBuilder};
pub use response::Response;
pub use time::{Clock, ManualClock, ManualSleeper, Sleeper, SystemClock, TokioSleeper};

// Re-export http crate types for status codes
pub use http::StatusCode;
