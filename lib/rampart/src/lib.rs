//! Resilient asynchronous HTTP client.
//!
//! rampart layers authentication, pluggable middleware, rate limiting,
//! retry with exponential backoff and circuit breaking around outbound calls
//! to third-party APIs.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use rampart::auth::ApiKeyAuth;
//! use rampart::middleware::LoggingMiddleware;
//! use rampart::prelude::*;
//!
//! # async fn example() -> rampart::Result<()> {
//! let client = Client::builder("https://api.example.com")
//!     .configure(|config| {
//!         config
//!             .timeout(Duration::from_secs(10))
//!             .retry_attempts(4)
//!             .enable_rate_limiting(true)
//!             .rate_limit_rate(5.0)
//!             .enable_circuit_breaker(true)
//!     })
//!     .auth(ApiKeyAuth::header("my-key")?)
//!     .middleware(LoggingMiddleware::new())
//!     .build()?;
//!
//! let response = client
//!     .post("/orders", RequestOptions::new().json(&serde_json::json!({ "sku": "A-1" })))
//!     .await?;
//! println!("created: {}", response.status());
//! # Ok(())
//! # }
//! ```
//!
//! # Errors
//!
//! Every fallible operation returns [`Result`]. 4xx/5xx answers become
//! [`Error::Response`] (or [`Error::RateLimited`] for 429); a call whose
//! retries ran out becomes [`Error::RetryExhausted`] wrapping the last
//! failure.

pub mod auth;
mod circuit_breaker;
mod client;
mod config;
pub mod middleware;
pub mod prelude;
mod rate_limit;
mod retry;
pub mod transport;

pub use circuit_breaker::{BreakerPermit, CircuitBreaker, CircuitState};
pub use client::{Client, ClientBuilder, RequestOptions};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use rate_limit::TokenBucket;
pub use retry::RetryPolicy;

// Re-export core types
pub use rampart_core::{
    Clock, ContentType, Error, Headers, ManualClock, ManualSleeper, Method, Request,
    RequestBuilder, RequestErrorKind, Response, Result, Sleeper, StatusCode, SystemClock,
    TokioSleeper, from_json, parse_retry_after, to_form, to_json,
};

// Re-export tower for custom transports
pub use tower;
