//! Ordered document metadata with coercing accessors

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Insertion-ordered map of metadata keys to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    values: IndexMap<String, Value>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay `other` on top of this map; later keys win.
    pub fn merge(&mut self, other: &Metadata) {
        for (key, value) in other.iter() {
            self.values.insert(key.to_string(), value.clone());
        }
    }

    /// String view of a value. Numbers and booleans are rendered as text.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer view of a value. Numeric strings are parsed.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Float view of a value. Numeric strings are parsed.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean view of a value. Accepts `true`/`false`/`yes`/`no`/`1`/`0`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|i| i != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Deserialize a value into any `serde` type.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| Error::execution(format!("Metadata key '{}': {}", key, e))),
        }
    }
}

impl FromIterator<(String, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_keep_insertion_order() {
        let meta = Metadata::new().with("zeta", 1).with("alpha", 2).with("mid", 3);
        let keys: Vec<&str> = meta.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_coercions() {
        let meta = Metadata::new()
            .with("count", "42")
            .with("ratio", 0.5)
            .with("draft", "yes")
            .with("flag", 1)
            .with("title", "Hello");

        assert_eq!(meta.get_i64("count"), Some(42));
        assert_eq!(meta.get_str("ratio"), Some("0.5".to_string()));
        assert_eq!(meta.get_bool("draft"), Some(true));
        assert_eq!(meta.get_bool("flag"), Some(true));
        assert_eq!(meta.get_bool("title"), None);
        assert_eq!(meta.get_i64("missing"), None);
    }

    #[test]
    fn test_get_as_deserializes() {
        let meta = Metadata::new().with("tags", json!(["a", "b"]));
        let tags: Vec<String> = meta.get_as("tags").unwrap().unwrap();
        assert_eq!(tags, vec!["a", "b"]);
        assert!(meta.get_as::<u32>("tags").is_err());
        assert!(meta.get_as::<u32>("absent").unwrap().is_none());
    }

    #[test]
    fn test_merge_overrides_existing() {
        let mut base = Metadata::new().with("a", 1).with("b", 2);
        base.merge(&Metadata::new().with("b", 3).with("c", 4));
        assert_eq!(base.get("b"), Some(&json!(3)));
        assert_eq!(base.len(), 3);
    }
}
