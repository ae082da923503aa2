//! Application value model
//!
//! Values are what applications store. Keys are derived from them, either
//! explicitly or through a key path. The serialized form handed to the
//! storage backend is serde_json over this enum.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A structured application value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(#[serde(with = "float_repr")] f64),
    String(String),
    /// Milliseconds since the Unix epoch; NaN marks an invalid date
    Date(#[serde(with = "float_repr")] f64),
    Binary(Vec<u8>),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Create a binary value
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    /// Create a date value from milliseconds since the epoch
    pub fn date(millis: f64) -> Self {
        Value::Date(millis)
    }

    /// Create an object value from field pairs
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Look up a property of an object value
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(field),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Serialize into the byte form stored by the backend
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Deserialize from the byte form stored by the backend
    pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    /// Convert to plain JSON.
    ///
    /// Dates become `{"$date": ms}`, binary becomes `{"$binary": base64}`,
    /// undefined becomes `{"$undefined": true}` and non-finite numbers become
    /// `{"$number": "NaN" | "Infinity" | "-Infinity"}`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Value::Undefined => json!({ "$undefined": true }),
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            // Integral numbers render without a fraction
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER => json!(*n as i64),
            Value::Number(n) => match serde_json::Number::from_f64(*n) {
                Some(num) => serde_json::Value::Number(num),
                None => json!({ "$number": non_finite_name(*n) }),
            },
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Date(ms) => match serde_json::Number::from_f64(*ms) {
                Some(num) => json!({ "$date": num }),
                None => json!({ "$date": non_finite_name(*ms) }),
            },
            Value::Binary(bytes) => json!({ "$binary": STANDARD.encode(bytes) }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn non_finite_name(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn parse_non_finite(s: &str) -> Option<f64> {
    match s {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(tagged) = from_tagged(&map) {
                        return tagged;
                    }
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

fn from_tagged(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    let (tag, inner) = map.iter().next()?;
    match (tag.as_str(), inner) {
        ("$date", serde_json::Value::Number(n)) => n.as_f64().map(Value::Date),
        ("$date", serde_json::Value::String(s)) => parse_non_finite(s).map(Value::Date),
        ("$binary", serde_json::Value::String(s)) => STANDARD.decode(s).ok().map(Value::Binary),
        ("$number", serde_json::Value::String(s)) => parse_non_finite(s).map(Value::Number),
        ("$undefined", serde_json::Value::Bool(true)) => Some(Value::Undefined),
        _ => None,
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::Date(dt.timestamp_millis() as f64)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Serde adapter keeping NaN and the infinities intact through JSON
mod float_repr {
    use std::fmt;

    use serde::{de, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(super::non_finite_name(*value))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        struct FloatVisitor;

        impl<'de> de::Visitor<'de> for FloatVisitor {
            type Value = f64;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or one of \"NaN\", \"Infinity\", \"-Infinity\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
                Ok(v as f64)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
                super::parse_non_finite(v)
                    .ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(FloatVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_preserve_non_finite_numbers() {
        let value = Value::Array(vec![
            Value::Number(f64::INFINITY),
            Value::Number(f64::NEG_INFINITY),
            Value::Number(1.5),
        ]);
        let bytes = value.to_bytes().unwrap();
        assert_eq!(Value::from_bytes(&bytes).unwrap(), value);

        let nan = Value::Number(f64::NAN).to_bytes().unwrap();
        match Value::from_bytes(&nan).unwrap() {
            Value::Number(n) => assert!(n.is_nan()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_tags() {
        let value = Value::from(json!({
            "when": { "$date": 1000 },
            "blob": { "$binary": "AQID" },
            "plain": { "$date": 1, "extra": true },
        }));
        assert_eq!(value.get("when"), Some(&Value::Date(1000.0)));
        assert_eq!(value.get("blob"), Some(&Value::Binary(vec![1, 2, 3])));
        assert!(matches!(value.get("plain"), Some(Value::Object(_))));
    }

    #[test]
    fn test_to_json_tags() {
        let value = Value::object([
            ("d", Value::Date(5.0)),
            ("b", Value::binary(vec![1u8, 2, 3])),
        ]);
        assert_eq!(value.to_json(), json!({ "d": { "$date": 5.0 }, "b": { "$binary": "AQID" } }));
    }

    #[test]
    fn test_datetime_conversion() {
        let dt = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::from(dt), Value::Date(1_704_067_200_000.0));
    }
}
