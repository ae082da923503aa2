//! Key ranges
//!
//! A range is an interval over the key order; either bound may be absent.
//! A range whose bounds are equal with an open side is legal but empty.

use std::cmp::Ordering;

use super::model::{compare, to_key, Key};
use super::value::Value;
use crate::errors::{DbError, DbResult};

/// Interval over keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl KeyRange {
    /// The unbounded range
    pub fn all() -> Self {
        Self {
            lower: None,
            upper: None,
            lower_open: false,
            upper_open: false,
        }
    }

    /// Range containing exactly `key`
    pub fn only(key: Key) -> Self {
        Self {
            lower: Some(key.clone()),
            upper: Some(key),
            lower_open: false,
            upper_open: false,
        }
    }

    pub fn lower_bound(key: Key, open: bool) -> Self {
        Self {
            lower: Some(key),
            upper: None,
            lower_open: open,
            upper_open: false,
        }
    }

    pub fn upper_bound(key: Key, open: bool) -> Self {
        Self {
            lower: None,
            upper: Some(key),
            lower_open: false,
            upper_open: open,
        }
    }

    /// Range with both bounds; fails with `RangeInvalid` if `lower > upper`
    pub fn bound(lower: Key, upper: Key, lower_open: bool, upper_open: bool) -> DbResult<Self> {
        if compare(&lower, &upper) == Ordering::Greater {
            return Err(DbError::range_invalid(format!(
                "lower bound {} is greater than upper bound {}",
                lower, upper
            )));
        }
        Ok(Self {
            lower: Some(lower),
            upper: Some(upper),
            lower_open,
            upper_open,
        })
    }

    pub fn lower(&self) -> Option<&Key> {
        self.lower.as_ref()
    }

    pub fn upper(&self) -> Option<&Key> {
        self.upper.as_ref()
    }

    pub fn lower_open(&self) -> bool {
        self.lower_open
    }

    pub fn upper_open(&self) -> bool {
        self.upper_open
    }

    /// Returns true if `key` lies inside the range
    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            None => true,
            Some(lower) => match compare(lower, key) {
                Ordering::Less => true,
                Ordering::Equal => !self.lower_open,
                Ordering::Greater => false,
            },
        };
        let below_upper = match &self.upper {
            None => true,
            Some(upper) => match compare(upper, key) {
                Ordering::Greater => true,
                Ordering::Equal => !self.upper_open,
                Ordering::Less => false,
            },
        };
        above_lower && below_upper
    }

    /// Returns true if this range selects exactly one key
    pub fn is_only(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => !self.lower_open && !self.upper_open && l == u,
            _ => false,
        }
    }
}

/// A query argument: a single key or a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Key(Key),
    Range(KeyRange),
}

impl Query {
    /// Convert an application value into a single-key query
    pub fn from_value(value: &Value) -> DbResult<Self> {
        to_key(value)
            .map(Query::Key)
            .map_err(|e| DbError::data(e.message()))
    }

    /// The range this query selects
    pub fn into_range(self) -> KeyRange {
        match self {
            Query::Key(key) => KeyRange::only(key),
            Query::Range(range) => range,
        }
    }
}

impl From<Key> for Query {
    fn from(key: Key) -> Self {
        Query::Key(key)
    }
}

impl From<KeyRange> for Query {
    fn from(range: KeyRange) -> Self {
        Query::Range(range)
    }
}

impl From<i64> for Query {
    fn from(n: i64) -> Self {
        Query::Key(Key::from(n))
    }
}

impl From<i32> for Query {
    fn from(n: i32) -> Self {
        Query::Key(Key::from(n))
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::Key(Key::from(s))
    }
}

/// Range selected by an optional query; `None` selects everything
pub(crate) fn range_of(query: Option<Query>) -> KeyRange {
    query.map(Query::into_range).unwrap_or_else(KeyRange::all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(v: i64) -> Key {
        Key::from(v)
    }

    #[test]
    fn test_only() {
        let range = KeyRange::only(n(5));
        assert!(range.includes(&n(5)));
        assert!(!range.includes(&n(4)));
        assert!(range.is_only());
    }

    #[test]
    fn test_bound_open_closed() {
        let range = KeyRange::bound(n(2), n(5), true, false).unwrap();
        assert!(!range.includes(&n(2)));
        assert!(range.includes(&n(3)));
        assert!(range.includes(&n(5)));
        assert!(!range.includes(&n(6)));
    }

    #[test]
    fn test_bound_rejects_inverted() {
        let err = KeyRange::bound(n(5), n(2), false, false).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::RangeInvalid);
    }

    #[test]
    fn test_equal_open_bounds_is_empty_not_error() {
        let range = KeyRange::bound(n(3), n(3), true, false).unwrap();
        assert!(!range.includes(&n(3)));
    }

    #[test]
    fn test_half_bounded() {
        let lower = KeyRange::lower_bound(n(10), true);
        assert!(!lower.includes(&n(10)));
        assert!(lower.includes(&Key::string("any string is above numbers")));

        let upper = KeyRange::upper_bound(Key::string("m"), false);
        assert!(upper.includes(&Key::string("m")));
        assert!(upper.includes(&n(1_000_000)));
        assert!(!upper.includes(&Key::array(vec![])));
    }

    #[test]
    fn test_query_from_value_rejects_non_keys() {
        let err = Query::from_value(&Value::Bool(true)).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Data);
    }
}
