use serde::{Deserialize, Serialize};

/// Metadata key carrying the bearer token (`"Bearer <token>"`).
pub const KEY_AUTHORIZATION: &str = "authorization";

/// Metadata key carrying the caller's relative deadline in milliseconds.
pub const KEY_TIMEOUT_MS: &str = "timeout-ms";

/// Metadata value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataValue {
    String(String),
    Bytes(Vec<u8>),
    U64(u64),
}

impl MetadataValue {
    /// Returns the string form of this value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer form of this value, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            MetadataValue::U64(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<u64> for MetadataValue {
    fn from(n: u64) -> Self {
        MetadataValue::U64(n)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(b: Vec<u8>) -> Self {
        MetadataValue::Bytes(b)
    }
}

/// Ordered key/value entries attached to a call or response.
///
/// Entries keep insertion order on the wire. Lookup is linear; metadata is
/// expected to stay small (a token, a deadline, a trace id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    entries: Vec<(String, MetadataValue)>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Duplicate keys are allowed; `get` returns the first.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut md = Metadata::new();
        md.insert(KEY_AUTHORIZATION, "Bearer t");
        md.insert(KEY_TIMEOUT_MS, 250u64);

        assert_eq!(
            md.get(KEY_AUTHORIZATION).and_then(MetadataValue::as_str),
            Some("Bearer t")
        );
        assert_eq!(
            md.get(KEY_TIMEOUT_MS).and_then(MetadataValue::as_u64),
            Some(250)
        );
        assert_eq!(md.get("missing"), None);
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn first_entry_wins_on_duplicates() {
        let mut md = Metadata::new();
        md.insert("k", "first");
        md.insert("k", "second");
        assert_eq!(md.get("k").and_then(MetadataValue::as_str), Some("first"));
    }
}
