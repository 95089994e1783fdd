//! Composite cache keys.
//!
//! A [`QueryKey`] is an ordered tuple `(resource, params...)`. Its identity is
//! a canonical JSON encoding in which object fields are sorted, so two keys
//! built from structurally equal params are equal no matter in which order the
//! fields were inserted, and any changed value yields a different key.

use serde::Serialize;
use serde_json::Value;
use std::fmt::{self, Write as _};
use std::hash::{Hash, Hasher};

/// Composite cache key.
#[derive(Debug, Clone)]
pub struct QueryKey {
    parts: Vec<Value>,
    hash: String,
}

impl QueryKey {
    /// Key for a resource with no parameters (e.g. `["classes"]`).
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self::from_parts(vec![Value::String(resource.into())])
    }

    /// Build a key from raw parts. The first part is the resource name.
    #[must_use]
    pub fn from_parts(parts: Vec<Value>) -> Self {
        let hash = canonical_parts(&parts);
        Self { parts, hash }
    }

    /// Append a parameter.
    #[must_use]
    pub fn with(mut self, param: impl Into<Value>) -> Self {
        self.parts.push(param.into());
        self.hash = canonical_parts(&self.parts);
        self
    }

    /// Append any serializable parameter (filter structs, pagination params).
    ///
    /// # Errors
    ///
    /// Returns the serialization error if `param` cannot be represented as
    /// JSON (e.g. a map with non-string keys).
    pub fn try_with<T: Serialize>(self, param: &T) -> Result<Self, serde_json::Error> {
        Ok(self.with(serde_json::to_value(param)?))
    }

    /// Resource name (first part), if it is a string.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        self.parts.first().and_then(Value::as_str)
    }

    /// All parts of the key.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.parts
    }

    /// Canonical encoding used for equality and hashing.
    #[must_use]
    pub fn hash_key(&self) -> &str {
        &self.hash
    }

    /// Whether `prefix` matches the leading parts of this key.
    ///
    /// `["classes"]` matches every classes key; `["classes", {page: 1}]`
    /// matches only that page. A key is a prefix of itself.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        prefix.parts.len() <= self.parts.len()
            && prefix
                .parts
                .iter()
                .zip(&self.parts)
                .all(|(expected, actual)| canonical(expected) == canonical(actual))
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

fn canonical_parts(parts: &[Value]) -> String {
    let mut out = String::from("[");
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        write_canonical(part, &mut out);
    }
    out.push(']');
    out
}

fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

// Sorts object fields explicitly so the encoding does not depend on whether
// serde_json was built with `preserve_order`.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (index, (name, field)) in fields.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_string(name, out);
                out.push(':');
                write_canonical(field, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(text) => write_string(text, out),
        Value::Null | Value::Bool(_) | Value::Number(_) => {
            let _ = write!(out, "{value}");
        }
    }
}

fn write_string(text: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::String(text.to_string()));
}
