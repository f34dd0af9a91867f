//! API key validation.

use std::collections::HashSet;

use axum::http::HeaderMap;

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Immutable set of API keys accepted by the gateway.
///
/// Built once at startup and shared read-only by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiKeySet {
    keys: HashSet<String>,
}

impl ApiKeySet {
    /// Parse a comma-separated list of keys. Entries are trimmed and empty
    /// entries are dropped, so `" k1, ,k2,"` yields `{k1, k2}`.
    pub fn parse(raw: &str) -> Self {
        Self::from_keys(raw.split(','))
    }

    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keys }
    }

    /// Returns `true` iff `presented` is non-empty and one of the configured keys.
    pub fn validate(&self, presented: Option<&str>) -> bool {
        match presented {
            Some(key) if !key.is_empty() => self.keys.contains(key),
            _ => false,
        }
    }

    /// Validate the key carried in the `x-api-key` header.
    ///
    /// A header value that is not valid visible ASCII counts as missing.
    pub fn validate_headers(&self, headers: &HeaderMap) -> bool {
        let presented = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        self.validate(presented)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
