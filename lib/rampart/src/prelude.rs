//! Prelude module for convenient imports.
//!
//! ```
//! use rampart::prelude::*;
//! ```

pub use crate::auth::AuthHandler;
pub use crate::middleware::Middleware;
pub use crate::{
    CircuitState, Client, ClientConfig, Error, Headers, Method, Request, RequestOptions,
    Response, Result, StatusCode,
};
pub use serde::{Deserialize, Serialize};
