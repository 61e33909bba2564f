//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types and functions
//! for easy glob importing:
//!
//! ```
//! use rampart_core::prelude::*;
//! ```

pub use crate::{
    Clock, ContentType, Error, Headers, Method, Request, RequestBuilder, Response, Result, Sleeper,
    from_json, to_form, to_json,
};
