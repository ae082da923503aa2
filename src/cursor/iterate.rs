//! Cursor step selection
//!
//! Pure selection of the next record over the full ordered record set of
//! a source. Records are sorted by key, then by primary key; for object
//! store sources the primary key is the key itself.
//!
//! | direction    | picks                                                       |
//! |--------------|-------------------------------------------------------------|
//! | `Next`       | first record past the position                              |
//! | `NextUnique` | first record whose key is past the position key             |
//! | `Prev`       | last record before the position                             |
//! | `PrevUnique` | lowest primary key among the last key before the position   |
//!
//! "Past the position" for index sources compares `(key, primary_key)`
//! pairs, so a cursor walks every duplicate of an index key.

use std::cmp::Ordering;

use super::Direction;
use crate::key::{compare, Key, KeyRange};

/// One entry of a cursor source
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CursorRecord {
    pub(crate) key: Key,
    pub(crate) primary_key: Key,
    pub(crate) value: Vec<u8>,
}

/// Everything a single step depends on
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepQuery<'a> {
    pub(crate) direction: Direction,
    pub(crate) range: &'a KeyRange,
    pub(crate) is_index: bool,
    /// Key of the record the cursor is on
    pub(crate) position: Option<&'a Key>,
    /// Primary key of that record (index sources)
    pub(crate) object_store_position: Option<&'a Key>,
    /// Target of `continue`
    pub(crate) key: Option<&'a Key>,
    /// Target of `continue_primary_key`
    pub(crate) primary_key: Option<&'a Key>,
}

/// Index into `records` of the record the step lands on
pub(crate) fn find_record(records: &[CursorRecord], query: &StepQuery<'_>) -> Option<usize> {
    match query.direction {
        Direction::Next => records.iter().position(|r| {
            at_or_after_target(r, query) && after_position(r, query) && query.range.includes(&r.key)
        }),
        Direction::NextUnique => records.iter().position(|r| {
            query.key.map_or(true, |k| compare(&r.key, k) != Ordering::Less)
                && query.position.map_or(true, |p| compare(&r.key, p) == Ordering::Greater)
                && query.range.includes(&r.key)
        }),
        Direction::Prev => records.iter().rposition(|r| {
            at_or_before_target(r, query)
                && before_position(r, query)
                && query.range.includes(&r.key)
        }),
        Direction::PrevUnique => {
            let last = records.iter().rposition(|r| {
                query.key.map_or(true, |k| compare(&r.key, k) != Ordering::Greater)
                    && query.position.map_or(true, |p| compare(&r.key, p) == Ordering::Less)
                    && query.range.includes(&r.key)
            })?;
            records.iter().position(|r| r.key == records[last].key)
        }
    }
}

fn at_or_after_target(r: &CursorRecord, query: &StepQuery<'_>) -> bool {
    let Some(key) = query.key else {
        return true;
    };
    match (compare(&r.key, key), query.primary_key) {
        (Ordering::Less, _) => false,
        (Ordering::Greater, _) | (Ordering::Equal, None) => true,
        (Ordering::Equal, Some(pk)) => compare(&r.primary_key, pk) != Ordering::Less,
    }
}

fn at_or_before_target(r: &CursorRecord, query: &StepQuery<'_>) -> bool {
    let Some(key) = query.key else {
        return true;
    };
    match (compare(&r.key, key), query.primary_key) {
        (Ordering::Greater, _) => false,
        (Ordering::Less, _) | (Ordering::Equal, None) => true,
        (Ordering::Equal, Some(pk)) => compare(&r.primary_key, pk) != Ordering::Greater,
    }
}

fn after_position(r: &CursorRecord, query: &StepQuery<'_>) -> bool {
    let Some(position) = query.position else {
        return true;
    };
    match (compare(&r.key, position), query.is_index, query.object_store_position) {
        (Ordering::Greater, _, _) => true,
        (Ordering::Equal, true, Some(osp)) => compare(&r.primary_key, osp) == Ordering::Greater,
        _ => false,
    }
}

fn before_position(r: &CursorRecord, query: &StepQuery<'_>) -> bool {
    let Some(position) = query.position else {
        return true;
    };
    match (compare(&r.key, position), query.is_index, query.object_store_position) {
        (Ordering::Less, _, _) => true,
        (Ordering::Equal, true, Some(osp)) => compare(&r.primary_key, osp) == Ordering::Less,
        _ => false,
    }
}
