//! Encoding of request payloads and decoding of response payloads.

use bytes::Bytes;
use derive_more::Display;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Encoding of a structured request body.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// `application/json`
    #[display("application/json")]
    Json,
    /// `application/x-www-form-urlencoded`, repeated keys for sequences.
    #[display("application/x-www-form-urlencoded")]
    FormUrlEncoded,
}

impl ContentType {
    /// Value sent in the `Content-Type` header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }

    /// Encode `value` as a body of this type.
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Bytes> {
        match self {
            Self::Json => to_json(value),
            Self::FormUrlEncoded => to_form(value),
        }
    }
}

/// Encode `value` as a JSON body.
///
/// ```
/// let body = rampart_core::to_json(&["a", "b"])?;
/// assert_eq!(body.as_ref(), br#"["a","b"]"#);
/// # Ok::<_, rampart_core::Error>(())
/// ```
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Encode `value` as a form body; sequences become repeated keys.
pub fn to_form<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_html_form::to_string(value)?))
}

/// Decode a JSON payload into `T`.
///
/// A failure names the path of the offending field (`items[2].id`).
pub fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize(&mut deserializer)
        .map_err(|err| Error::json_deserialization(err.path().to_string(), err.inner().to_string()))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Serialize)]
    struct Order {
        sku: &'static str,
        quantity: u32,
        tags: Vec<&'static str>,
    }

    fn order() -> Order {
        Order {
            sku: "A-1",
            quantity: 2,
            tags: vec!["gift", "fragile"],
        }
    }

    #[test]
    fn header_values() {
        assert_eq!(ContentType::Json.to_string(), "application/json");
        assert_eq!(
            ContentType::FormUrlEncoded.to_string(),
            ContentType::FormUrlEncoded.as_str()
        );
    }

    #[test]
    fn encodes_per_content_type() {
        let json = ContentType::Json.encode(&order()).expect("json");
        assert_eq!(
            json.as_ref(),
            br#"{"sku":"A-1","quantity":2,"tags":["gift","fragile"]}"#
        );

        let form = ContentType::FormUrlEncoded.encode(&order()).expect("form");
        assert_eq!(
            form.as_ref(),
            b"sku=A-1&quantity=2&tags=gift&tags=fragile"
        );
    }

    #[test]
    fn form_rejects_non_map_values() {
        let err = to_form(&42).expect_err("scalar is not a form");
        assert!(matches!(err, Error::Form(_)));
    }

    #[test]
    fn decode_error_names_the_field_path() {
        #[derive(Debug, Deserialize)]
        struct Line {
            #[allow(dead_code)]
            id: u64,
        }

        #[derive(Debug, Deserialize)]
        struct Page {
            #[allow(dead_code)]
            items: Vec<Line>,
        }

        let err = from_json::<Page>(br#"{"items":[{"id":1},{"id":"x"}]}"#).expect_err("bad id");
        let message = err.to_string();
        assert!(message.contains("items[1].id"), "{message}");
    }
}
