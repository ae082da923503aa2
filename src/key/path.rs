//! Key paths
//!
//! A key path is a dotted accessor (`"a.b.c"`, or `""` for the value
//! itself), or a sequence of such accessors producing an array key.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::model::{multi_entry_key, to_key, Key};
use super::value::Value;
use crate::errors::{DbError, DbResult};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\p{L}\p{Nl}$_][\p{L}\p{Nl}\p{Mn}\p{Mc}\p{Nd}\p{Pc}$_\x{200C}\x{200D}]*$")
        .expect("identifier pattern compiles")
});

/// Key path of an object store or index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Sequence(Vec<String>),
}

/// Outcome of evaluating a key path against a value
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Key(Key),
    /// The path does not resolve inside the value
    Missing,
    /// The path resolves to something that is not a valid key
    Invalid,
}

fn is_valid_path_string(path: &str) -> bool {
    path.is_empty() || path.split('.').all(|segment| IDENTIFIER.is_match(segment))
}

impl KeyPath {
    /// Validate the path syntax; invalid paths are a `SyntaxError`
    pub fn validate(&self) -> DbResult<()> {
        match self {
            KeyPath::Single(path) if is_valid_path_string(path) => Ok(()),
            KeyPath::Single(path) => Err(DbError::syntax(format!("invalid key path '{}'", path))),
            KeyPath::Sequence(paths) if paths.is_empty() => {
                Err(DbError::syntax("key path sequence must not be empty"))
            }
            KeyPath::Sequence(paths) => match paths.iter().find(|p| !is_valid_path_string(p)) {
                Some(bad) => Err(DbError::syntax(format!("invalid key path '{}'", bad))),
                None => Ok(()),
            },
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, KeyPath::Sequence(_))
    }

    /// Returns true for the empty single path, which selects the value itself
    pub fn is_empty_path(&self) -> bool {
        matches!(self, KeyPath::Single(p) if p.is_empty())
    }

    /// Evaluate against a value
    pub fn evaluate(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::Single(path) => evaluate_path(value, path),
            KeyPath::Sequence(paths) => paths
                .iter()
                .map(|p| evaluate_path(value, p))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Extract a record key
    pub fn extract_key(&self, value: &Value) -> Extracted {
        match self.evaluate(value) {
            None => Extracted::Missing,
            Some(v) => match to_key(&v) {
                Ok(key) => Extracted::Key(key),
                Err(_) => Extracted::Invalid,
            },
        }
    }

    /// Extract an index key; multi-entry paths flatten arrays
    pub fn extract_index_key(&self, value: &Value, multi_entry: bool) -> Option<Key> {
        let resolved = self.evaluate(value)?;
        let key = if multi_entry {
            multi_entry_key(&resolved)
        } else {
            to_key(&resolved)
        };
        key.ok()
    }

    /// Returns true if a generated key could be stored into `value` at this path
    pub fn can_inject(&self, value: &Value) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        let segments: Vec<&str> = path.split('.').collect();
        let Some((_, parents)) = segments.split_last() else {
            return false;
        };

        let mut current = value;
        for segment in parents {
            let Value::Object(map) = current else {
                return false;
            };
            match map.get(*segment) {
                Some(next) => current = next,
                None => return true,
            }
        }
        matches!(current, Value::Object(_))
    }

    /// Store `key` into `value` at this path, creating intermediate objects
    pub fn inject(&self, value: &mut Value, key: &Key) -> DbResult<()> {
        let KeyPath::Single(path) = self else {
            return Err(DbError::data("cannot inject a key through a sequence key path"));
        };
        let segments: Vec<&str> = path.split('.').collect();
        let Some((leaf, parents)) = segments.split_last() else {
            return Err(DbError::data("cannot inject a key through an empty key path"));
        };

        let mut current = value;
        for segment in parents {
            let map = match current {
                Value::Object(map) => map,
                _ => {
                    return Err(DbError::data(format!("'{}' is not reachable in the value", path)))
                }
            };
            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }
        match current {
            Value::Object(map) => {
                map.insert(leaf.to_string(), key.to_value());
                Ok(())
            }
            _ => Err(DbError::data(format!("'{}' is not reachable in the value", path))),
        }
    }
}

fn evaluate_path(value: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(value.clone());
    }

    let mut current = value.clone();
    for segment in path.split('.') {
        current = match (&current, segment) {
            (Value::String(s), "length") => Value::Number(s.encode_utf16().count() as f64),
            (Value::Array(items), "length") => Value::Number(items.len() as f64),
            (Value::Binary(bytes), "length") => Value::Number(bytes.len() as f64),
            (Value::Object(map), field) => map.get(field)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(paths: Vec<&str>) -> Self {
        KeyPath::Sequence(paths.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate() {
        assert!(KeyPath::from("").validate().is_ok());
        assert!(KeyPath::from("id").validate().is_ok());
        assert!(KeyPath::from("a.b_c.$d").validate().is_ok());
        assert!(KeyPath::from("a..b").validate().is_err());
        assert!(KeyPath::from("1abc").validate().is_err());
        assert!(KeyPath::from(" id").validate().is_err());
        assert!(KeyPath::Sequence(vec![]).validate().is_err());
    }

    #[test]
    fn test_extract_nested() {
        let value = Value::from(json!({ "a": { "b": 7 } }));
        assert_eq!(KeyPath::from("a.b").extract_key(&value), Extracted::Key(Key::from(7)));
        assert_eq!(KeyPath::from("a.c").extract_key(&value), Extracted::Missing);
        assert_eq!(KeyPath::from("a").extract_key(&value), Extracted::Invalid);
    }

    #[test]
    fn test_extract_sequence() {
        let value = Value::from(json!({ "first": "ada", "last": "lovelace" }));
        let path = KeyPath::from(vec!["last", "first"]);
        assert_eq!(
            path.extract_key(&value),
            Extracted::Key(Key::array(vec![Key::from("lovelace"), Key::from("ada")]))
        );
    }

    #[test]
    fn test_length_property() {
        let value = Value::from(json!({ "tags": ["a", "b", "c"] }));
        assert_eq!(KeyPath::from("tags.length").extract_key(&value), Extracted::Key(Key::from(3)));
    }

    #[test]
    fn test_inject_creates_parents() {
        let mut value = Value::from(json!({ "name": "x" }));
        let path = KeyPath::from("meta.id");
        assert!(path.can_inject(&value));
        path.inject(&mut value, &Key::from(4)).unwrap();
        assert_eq!(value, Value::from(json!({ "name": "x", "meta": { "id": 4.0 } })));
    }

    #[test]
    fn test_cannot_inject_into_scalar() {
        let value = Value::from(json!({ "meta": 5 }));
        assert!(!KeyPath::from("meta.id").can_inject(&value));
        assert!(!KeyPath::from("id").can_inject(&Value::from(5)));
    }

    #[test]
    fn test_multi_entry_index_key() {
        let value = Value::from(json!({ "tags": ["a", "b", "a"] }));
        let key = KeyPath::from("tags").extract_index_key(&value, true).unwrap();
        assert_eq!(key, Key::array(vec![Key::from("a"), Key::from("b")]));
    }
}
