//! Key encoding.
//!
//! ACL keys and value names end up as document field names and query values.
//! Strings are percent-encoded the way URI components are, and `.` is escaped
//! as well because it separates path segments in document field names.
//! Numbers pass through untouched as query values; as field names they take
//! their decimal text, encoded like any string.

use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{Number, Value};

use crate::error::{AclStoreError, Result};

/// Every byte except ASCII alphanumerics and `- _ ! ~ * ' ( )`.
const KEY_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// An ACL key or value name: text, or a number used verbatim.
///
/// Numbers are integers or finite floats; see the `TryFrom<f64>` impl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclKey {
    Text(String),
    Number(Number),
}

impl AclKey {
    /// Encoded form used as a query value.
    pub fn encode(&self) -> Value {
        match self {
            AclKey::Text(text) => Value::String(encode(text)),
            AclKey::Number(n) => Value::Number(n.clone()),
        }
    }

    /// Encoded form used as a document field name.
    pub fn encode_field(&self) -> String {
        match self {
            AclKey::Text(text) => encode(text),
            AclKey::Number(n) => encode(&n.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AclKey::Text(text) => Some(text),
            AclKey::Number(_) => None,
        }
    }
}

impl fmt::Display for AclKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AclKey::Text(text) => f.write_str(text),
            AclKey::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for AclKey {
    fn from(text: &str) -> Self {
        AclKey::Text(text.to_string())
    }
}

impl From<String> for AclKey {
    fn from(text: String) -> Self {
        AclKey::Text(text)
    }
}

impl From<&String> for AclKey {
    fn from(text: &String) -> Self {
        AclKey::Text(text.clone())
    }
}

impl From<Number> for AclKey {
    fn from(n: Number) -> Self {
        AclKey::Number(n)
    }
}

impl From<i64> for AclKey {
    fn from(n: i64) -> Self {
        AclKey::Number(n.into())
    }
}

impl From<i32> for AclKey {
    fn from(n: i32) -> Self {
        AclKey::Number(n.into())
    }
}

impl From<u32> for AclKey {
    fn from(n: u32) -> Self {
        AclKey::Number(n.into())
    }
}

impl From<u64> for AclKey {
    fn from(n: u64) -> Self {
        AclKey::Number(n.into())
    }
}

/// NaN and infinities have no JSON representation and are rejected.
impl TryFrom<f64> for AclKey {
    type Error = AclStoreError;

    fn try_from(n: f64) -> Result<Self> {
        Number::from_f64(n)
            .map(AclKey::Number)
            .ok_or_else(|| AclStoreError::Validation(format!("Key {n} is not a finite number.")))
    }
}

/// Percent-encode a key, escaping `.` too.
///
/// `encode(encode(k))` is not `encode(k)`: encoding is one-way per layer.
pub fn encode(text: &str) -> String {
    utf8_percent_encode(text, KEY_ESCAPES).to_string()
}

/// Reverse [`encode`].
pub fn decode(text: &str) -> Result<String> {
    percent_decode_str(text)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| AclStoreError::InvalidEncoding(text.to_string()))
}

/// Encode a sequence of keys element-wise, preserving order.
pub fn encode_all(keys: &[AclKey]) -> Vec<Value> {
    keys.iter().map(AclKey::encode).collect()
}
