use std::fmt;

use crate::connection::Database;
use crate::cursor::Cursor;
use crate::key::{Key, Value};

/// Outcome of a successful request
#[derive(Clone)]
pub enum RequestResult {
    /// No value: a missing record, a deletion, or a failed request
    Undefined,
    Value(Value),
    Key(Key),
    Count(u64),
    Values(Vec<Value>),
    Keys(Vec<Key>),
    /// The cursor moved onto a record
    Cursor(Cursor),
    /// The cursor ran past its last record
    CursorExhausted,
    Database(Database),
}

impl RequestResult {
    pub fn is_undefined(&self) -> bool {
        matches!(self, RequestResult::Undefined)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            RequestResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            RequestResult::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            RequestResult::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            RequestResult::Count(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_values(&self) -> Option<&[Value]> {
        match self {
            RequestResult::Values(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_keys(&self) -> Option<&[Key]> {
        match self {
            RequestResult::Keys(k) => Some(k),
            _ => None,
        }
    }

    /// The cursor, if it is positioned on a record
    pub fn as_cursor(&self) -> Option<&Cursor> {
        match self {
            RequestResult::Cursor(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_cursor_exhausted(&self) -> bool {
        matches!(self, RequestResult::CursorExhausted)
    }

    pub fn as_database(&self) -> Option<&Database> {
        match self {
            RequestResult::Database(db) => Some(db),
            _ => None,
        }
    }

    /// Plain JSON rendering, as written by the script runner
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            RequestResult::Undefined => json!({ "$undefined": true }),
            RequestResult::Value(v) => v.to_json(),
            RequestResult::Key(k) => k.to_value().to_json(),
            RequestResult::Count(n) => json!(n),
            RequestResult::Values(vs) => vs.iter().map(Value::to_json).collect(),
            RequestResult::Keys(ks) => ks.iter().map(|k| k.to_value().to_json()).collect(),
            RequestResult::Cursor(c) => json!({
                "key": c.key().map(|k| k.to_value().to_json()),
                "primary_key": c.primary_key().map(|k| k.to_value().to_json()),
                "value": c.value().map(|v| v.to_json()),
            }),
            RequestResult::CursorExhausted => serde_json::Value::Null,
            RequestResult::Database(db) => json!({ "name": db.name(), "version": db.version() }),
        }
    }
}

impl fmt::Debug for RequestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestResult::Undefined => f.write_str("Undefined"),
            RequestResult::Value(v) => f.debug_tuple("Value").field(v).finish(),
            RequestResult::Key(k) => f.debug_tuple("Key").field(k).finish(),
            RequestResult::Count(n) => f.debug_tuple("Count").field(n).finish(),
            RequestResult::Values(v) => f.debug_tuple("Values").field(v).finish(),
            RequestResult::Keys(k) => f.debug_tuple("Keys").field(k).finish(),
            RequestResult::Cursor(c) => f.debug_tuple("Cursor").field(&c.key()).finish(),
            RequestResult::CursorExhausted => f.write_str("CursorExhausted"),
            RequestResult::Database(db) => f.debug_tuple("Database").field(&db.name()).finish(),
        }
    }
}
