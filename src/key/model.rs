//! Keys and their total order
//!
//! Cross-type precedence (highest to lowest):
//! Array > Binary > String > Number > Date.
//!
//! Within a type: numbers and dates compare numerically, strings by code
//! point, binary bytewise, arrays element-wise with the longer array
//! greater on a common-prefix tie.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};

use super::value::Value;
use crate::errors::{DbError, DbResult};

/// A valid, immutable key.
///
/// The representation is private: every key is built through a checked
/// constructor or conversion, so a NaN number or date never exists.
#[derive(Debug, Clone)]
pub struct Key(Repr);

#[derive(Debug, Clone)]
enum Repr {
    Number(f64),
    /// Milliseconds since the Unix epoch
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

/// Key type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyKind {
    Date,
    Number,
    String,
    Binary,
    Array,
}

impl Key {
    /// Create a number key; NaN is rejected
    pub fn number(n: f64) -> DbResult<Key> {
        if n.is_nan() {
            return Err(DbError::invalid_key("NaN is not a valid key"));
        }
        Ok(Key(Repr::Number(n)))
    }

    /// Create a date key from milliseconds since the epoch; invalid dates are rejected
    pub fn date(millis: f64) -> DbResult<Key> {
        if millis.is_nan() {
            return Err(DbError::invalid_key("invalid date is not a valid key"));
        }
        Ok(Key(Repr::Date(millis)))
    }

    pub fn string(s: impl Into<String>) -> Key {
        Key(Repr::String(s.into()))
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Key {
        Key(Repr::Binary(bytes.into()))
    }

    pub fn array(items: Vec<Key>) -> Key {
        Key(Repr::Array(items))
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Key {
        Key(Repr::Date(dt.timestamp_millis() as f64))
    }

    /// Smallest possible key, below every date
    pub(crate) fn lowest() -> Key {
        Key(Repr::Date(f64::NEG_INFINITY))
    }

    /// Returns the type tag
    pub fn kind(&self) -> KeyKind {
        match &self.0 {
            Repr::Number(_) => KeyKind::Number,
            Repr::Date(_) => KeyKind::Date,
            Repr::String(_) => KeyKind::String,
            Repr::Binary(_) => KeyKind::Binary,
            Repr::Array(_) => KeyKind::Array,
        }
    }

    /// Returns the numeric value of a number key
    pub fn as_number(&self) -> Option<f64> {
        match &self.0 {
            Repr::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Milliseconds since the epoch of a date key
    pub fn as_date_millis(&self) -> Option<f64> {
        match &self.0 {
            Repr::Date(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.0 {
            Repr::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.0 {
            Repr::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Key]> {
        match &self.0 {
            Repr::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Key>> {
        match self.0 {
            Repr::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Convert back to an application value
    pub fn to_value(&self) -> Value {
        match &self.0 {
            Repr::Number(n) => Value::Number(*n),
            Repr::Date(ms) => Value::Date(*ms),
            Repr::String(s) => Value::String(s.clone()),
            Repr::Binary(b) => Value::Binary(b.clone()),
            Repr::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }
}

/// Convert an application value into a key.
///
/// Numbers (not NaN), dates (not invalid), strings, binary and arrays of
/// convertible values are keys; everything else is rejected with `InvalidKey`.
/// `Value` trees are owned, so an array can never contain itself.
pub fn to_key(value: &Value) -> DbResult<Key> {
    match value {
        Value::Number(n) => Key::number(*n),
        Value::Date(ms) => Key::date(*ms),
        Value::String(s) => Ok(Key::string(s.clone())),
        Value::Binary(b) => Ok(Key::binary(b.clone())),
        Value::Array(items) => items
            .iter()
            .map(to_key)
            .collect::<DbResult<Vec<_>>>()
            .map(Key::array),
        Value::Undefined | Value::Null | Value::Bool(_) | Value::Object(_) => Err(
            DbError::invalid_key(format!("value {} is not a valid key", value)),
        ),
    }
}

/// Convert a value into a multi-entry index key.
///
/// Arrays are flattened one level: elements that are not valid keys are
/// skipped, duplicates are dropped keeping the first occurrence.
pub fn multi_entry_key(value: &Value) -> DbResult<Key> {
    let items = match value {
        Value::Array(items) => items,
        other => return to_key(other),
    };

    let mut keys: Vec<Key> = Vec::with_capacity(items.len());
    for item in items {
        let Ok(key) = to_key(item) else {
            continue;
        };
        if !keys.iter().any(|seen| compare(seen, &key) == Ordering::Equal) {
            keys.push(key);
        }
    }
    Ok(Key::array(keys))
}

/// Total order over keys
pub fn compare(a: &Key, b: &Key) -> Ordering {
    let (ka, kb) = (a.kind(), b.kind());
    if ka != kb {
        return ka.cmp(&kb);
    }

    match (&a.0, &b.0) {
        // Constructors reject NaN, so partial_cmp always answers
        (Repr::Number(x), Repr::Number(y)) | (Repr::Date(x), Repr::Date(y)) => {
            x.partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Repr::String(x), Repr::String(y)) => x.cmp(y),
        (Repr::Binary(x), Repr::Binary(y)) => x.cmp(y),
        (Repr::Array(x), Repr::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                match compare(ex, ey) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            x.len().cmp(&y.len())
        }
        _ => unreachable!("key kinds already compared equal"),
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        key.to_value()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::string(s)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::string(s)
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key(Repr::Number(n as f64))
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key(Repr::Number(f64::from(n)))
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Key(Repr::Number(n as f64))
    }
}

impl TryFrom<f64> for Key {
    type Error = DbError;

    fn try_from(n: f64) -> DbResult<Key> {
        Key::number(n)
    }
}

impl TryFrom<&Value> for Key {
    type Error = DbError;

    fn try_from(value: &Value) -> DbResult<Key> {
        to_key(value)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Number(n) => write!(f, "{}", n),
            Repr::Date(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms as i64) {
                Some(dt) => write!(f, "Date({})", dt.to_rfc3339()),
                None => write!(f, "Date({})", ms),
            },
            Repr::String(s) => write!(f, "{:?}", s),
            Repr::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
            Repr::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}
