//! Case-insensitive header mapping.

use std::collections::BTreeMap;
use std::fmt;

/// Header mapping with case-insensitive names.
///
/// Names are stored lower-cased, so `Authorization` and `authorization` refer
/// to the same entry and the last write wins. Iteration order is sorted by
/// name, which keeps logs and tests deterministic.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Single header value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Removes a header.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    /// Returns `true` if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(lower-cased name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy of the mapping with the given names replaced by `mask`.
    #[must_use]
    pub fn redacted<'a>(&self, names: impl IntoIterator<Item = &'a str>, mask: &str) -> Self {
        let mut redacted = self.clone();
        for name in names {
            if let Some(value) = redacted.entries.get_mut(&name.to_ascii_lowercase()) {
                mask.clone_into(value);
            }
        }
        redacted
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        headers.extend(iter);
        headers
    }
}

impl<K, V> Extend<(K, V)> for Headers
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

impl From<&http::HeaderMap> for Headers {
    /// Non UTF-8 values are skipped. Repeated names are joined with `", "`.
    fn from(map: &http::HeaderMap) -> Self {
        let mut headers = Self::new();
        for name in map.keys() {
            let values = map
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .collect::<Vec<_>>();
            if !values.is_empty() {
                headers.insert(name.as_str(), values.join(", "));
            }
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/plain");
        headers.insert("content-type", "application/json");

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
        assert!(headers.contains("Content-type"));
    }

    #[test]
    fn remove_ignores_case() {
        let mut headers: Headers = [("X-Trace", "abc")].into_iter().collect();
        assert_eq!(headers.remove("x-trace").as_deref(), Some("abc"));
        assert!(headers.is_empty());
    }

    #[test]
    fn redacted_masks_only_listed_names() {
        let headers: Headers = [("Authorization", "Bearer t"), ("Accept", "*/*")]
            .into_iter()
            .collect();
        let redacted = headers.redacted(["authorization", "cookie"], "***");

        assert_eq!(redacted.get("authorization"), Some("***"));
        assert_eq!(redacted.get("accept"), Some("*/*"));
        assert_eq!(headers.get("authorization"), Some("Bearer t"));
    }

    #[test]
    fn from_http_header_map() {
        let mut map = http::HeaderMap::new();
        map.insert("Retry-After", http::HeaderValue::from_static("5"));
        let headers = Headers::from(&map);
        assert_eq!(headers.get("retry-after"), Some("5"));
    }

    #[test]
    fn repeated_http_headers_keep_every_value() {
        let mut map = http::HeaderMap::new();
        map.append("link", http::HeaderValue::from_static("</p/2>; rel=\"next\""));
        map.append("link", http::HeaderValue::from_static("</p/9>; rel=\"last\""));
        map.append("x-binary", http::HeaderValue::from_bytes(b"\xff").expect("opaque value"));

        let headers = Headers::from(&map);

        assert_eq!(
            headers.get("link"),
            Some("</p/2>; rel=\"next\", </p/9>; rel=\"last\"")
        );
        assert!(!headers.contains("x-binary"));
    }
}
