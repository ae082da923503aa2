//! Cursors
//!
//! A cursor walks the records of a store or index in one direction inside
//! a key range. Every movement re-enqueues the cursor's single request,
//! which settles with the cursor itself, or with
//! [`RequestResult::CursorExhausted`] once no record is left.

mod iterate;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use iterate::{find_record, CursorRecord, StepQuery};

use crate::errors::{DbError, DbResult};
use crate::key::{compare, Extracted, Key, KeyRange, Value};
use crate::request::{ReadyState, Request, RequestResult, RequestSource};
use crate::store::catalog::decode;
use crate::store::{Index, ObjectStore};
use crate::transaction::Transaction;

/// Iteration order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::NextUnique => "nextunique",
            Direction::Prev => "prev",
            Direction::PrevUnique => "prevunique",
        }
    }

    fn is_forward(&self) -> bool {
        matches!(self, Direction::Next | Direction::NextUnique)
    }
}

impl FromStr for Direction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Direction::Next),
            "nextunique" => Ok(Direction::NextUnique),
            "prev" => Ok(Direction::Prev),
            "prevunique" => Ok(Direction::PrevUnique),
            other => Err(DbError::type_error(format!("unknown cursor direction '{}'", other))),
        }
    }
}

/// What a cursor iterates over
#[derive(Clone)]
pub enum CursorSource {
    Store(ObjectStore),
    Index(Index),
}

impl CursorSource {
    fn store(&self) -> ObjectStore {
        match self {
            CursorSource::Store(store) => store.clone(),
            CursorSource::Index(index) => index.object_store(),
        }
    }

    fn is_index(&self) -> bool {
        matches!(self, CursorSource::Index(_))
    }

    /// Ordered records of the source; fails once the source is deleted
    fn records(&self, txn: &Transaction) -> DbResult<Vec<CursorRecord>> {
        let runtime = txn.runtime();
        let backend = runtime.backend_ref();
        match self {
            CursorSource::Store(store) => {
                let meta = store.meta()?;
                let records = backend.scan_records(txn.handle(), &meta.name)?;
                Ok(records
                    .into_iter()
                    .map(|(key, value)| CursorRecord {
                        primary_key: key.clone(),
                        key,
                        value,
                    })
                    .collect())
            }
            CursorSource::Index(index) => {
                let (meta, info) = index.info()?;
                let records = backend.scan_index(txn.handle(), &meta.name, &info.name)?;
                Ok(records
                    .into_iter()
                    .map(|r| CursorRecord {
                        key: r.key,
                        primary_key: r.primary_key,
                        value: r.value,
                    })
                    .collect())
            }
        }
    }
}

impl fmt::Debug for CursorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CursorSource::Store(store) => write!(f, "Store({})", store.name()),
            CursorSource::Index(index) => write!(f, "Index({})", index.name()),
        }
    }
}

struct CursorInner {
    transaction: Transaction,
    source: CursorSource,
    direction: Direction,
    range: KeyRange,
    position: Option<Key>,
    object_store_position: Option<Key>,
    key: Option<Key>,
    primary_key: Option<Key>,
    value: Option<Value>,
    key_only: bool,
    got_value: bool,
    request: Option<Request>,
}

/// Handle to a cursor
#[derive(Clone)]
pub struct Cursor(Rc<RefCell<CursorInner>>);

impl Cursor {
    /// Create a cursor and queue its first step
    pub(crate) fn open(
        txn: &Transaction,
        source: CursorSource,
        range: KeyRange,
        direction: Direction,
        key_only: bool,
    ) -> DbResult<Request> {
        txn.ensure_active()?;
        let request_source = match &source {
            CursorSource::Store(store) => RequestSource::Store(store.clone()),
            CursorSource::Index(index) => RequestSource::Index(index.clone()),
        };
        let request = txn.new_request(request_source);
        let cursor = Cursor(Rc::new(RefCell::new(CursorInner {
            transaction: txn.clone(),
            source,
            direction,
            range,
            position: None,
            object_store_position: None,
            key: None,
            primary_key: None,
            value: None,
            key_only,
            got_value: false,
            request: Some(request.clone()),
        })));
        txn.register_cursor(cursor.clone());
        cursor.enqueue_step(txn, request, None, None, 1)
    }

    // Accessors

    /// Key at the current position; index key for index cursors
    pub fn key(&self) -> Option<Key> {
        self.0.borrow().key.clone()
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.0.borrow().primary_key.clone()
    }

    /// Current value; always `None` for key cursors
    pub fn value(&self) -> Option<Value> {
        self.0.borrow().value.clone()
    }

    pub fn direction(&self) -> Direction {
        self.0.borrow().direction
    }

    pub fn source(&self) -> CursorSource {
        self.0.borrow().source.clone()
    }

    pub fn range(&self) -> KeyRange {
        self.0.borrow().range.clone()
    }

    pub fn transaction(&self) -> Transaction {
        self.0.borrow().transaction.clone()
    }

    /// The request every step settles; `None` once the transaction finished
    pub fn request(&self) -> Option<Request> {
        self.0.borrow().request.clone()
    }

    pub fn got_value(&self) -> bool {
        self.0.borrow().got_value
    }

    pub fn is_key_only(&self) -> bool {
        self.0.borrow().key_only
    }

    // Movement

    /// Skip `count` records
    pub fn advance(&self, count: u32) -> DbResult<()> {
        if count == 0 {
            return Err(DbError::type_error("advance count must be greater than zero"));
        }
        let (txn, request) = self.movable()?;
        self.restep(&txn, request, None, None, count)
    }

    /// Move to the next record, or to the first one at or beyond `key`
    pub fn continue_(&self, key: Option<Key>) -> DbResult<()> {
        let (txn, request) = self.movable()?;
        if let Some(target) = &key {
            let inner = self.0.borrow();
            if let Some(position) = &inner.position {
                let order = compare(target, position);
                let behind = if inner.direction.is_forward() {
                    order != Ordering::Greater
                } else {
                    order != Ordering::Less
                };
                if behind {
                    return Err(DbError::data(
                        "the key is not beyond the cursor position in its direction",
                    ));
                }
            }
        }
        self.restep(&txn, request, key, None, 1)
    }

    /// Move to the first index entry at or beyond `(key, primary_key)`
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> DbResult<()> {
        let (txn, request) = self.movable()?;
        {
            let inner = self.0.borrow();
            if !inner.source.is_index() {
                return Err(DbError::invalid_access(
                    "continue_primary_key needs an index cursor",
                ));
            }
            if !matches!(inner.direction, Direction::Next | Direction::Prev) {
                return Err(DbError::invalid_access(
                    "continue_primary_key is not available for unique directions",
                ));
            }
            if let (Some(position), Some(osp)) = (&inner.position, &inner.object_store_position) {
                let behind = match (inner.direction.is_forward(), compare(&key, position)) {
                    (true, Ordering::Less) | (false, Ordering::Greater) => true,
                    (true, Ordering::Equal) => compare(&primary_key, osp) != Ordering::Greater,
                    (false, Ordering::Equal) => compare(&primary_key, osp) != Ordering::Less,
                    _ => false,
                };
                if behind {
                    return Err(DbError::data(
                        "the key pair is not beyond the cursor position in its direction",
                    ));
                }
            }
        }
        self.restep(&txn, request, Some(key), Some(primary_key), 1)
    }

    // Mutation at the current position

    /// Replace the record under the cursor
    pub fn update(&self, value: impl Into<Value>) -> DbResult<Request> {
        let value = value.into();
        let (txn, store, primary_key) = self.writable_position()?;
        let meta = store.meta()?;

        let key = match &meta.key_path {
            Some(path) => {
                match path.extract_key(&value) {
                    Extracted::Key(key) if key == primary_key => {}
                    _ => {
                        return Err(DbError::data(
                            "the in-line key of the new value differs from the cursor's key",
                        ))
                    }
                }
                None
            }
            None => Some(primary_key),
        };
        store.enqueue_put(&txn, value, key, false, RequestSource::Cursor(self.clone()))
    }

    /// Delete the record under the cursor
    pub fn delete(&self) -> DbResult<Request> {
        let (txn, store, primary_key) = self.writable_position()?;
        store.enqueue_delete(
            &txn,
            KeyRange::only(primary_key),
            RequestSource::Cursor(self.clone()),
        )
    }

    // Internals

    /// Drop the request once the transaction is over
    pub(crate) fn detach(&self) {
        let request = self.0.borrow_mut().request.take();
        if let Some(request) = request {
            request.clear_handlers();
        }
    }

    fn movable(&self) -> DbResult<(Transaction, Request)> {
        let (txn, request) = {
            let inner = self.0.borrow();
            (inner.transaction.clone(), inner.request.clone())
        };
        txn.ensure_active()?;
        let request = request.ok_or_else(|| DbError::invalid_state("the cursor is no longer usable"))?;
        if request.ready_state() == ReadyState::Pending {
            return Err(DbError::invalid_state("the cursor is already moving"));
        }
        self.source().store().meta()?;
        Ok((txn, request))
    }

    fn writable_position(&self) -> DbResult<(Transaction, ObjectStore, Key)> {
        let (txn, source, got_value, key_only, primary_key) = {
            let inner = self.0.borrow();
            (
                inner.transaction.clone(),
                inner.source.clone(),
                inner.got_value,
                inner.key_only,
                inner.primary_key.clone(),
            )
        };
        txn.ensure_active()?;
        txn.ensure_writable()?;
        let store = source.store();
        store.meta()?;
        if let CursorSource::Index(index) = &source {
            index.info()?;
        }
        let primary_key = match primary_key {
            Some(pk) if got_value => pk,
            _ => return Err(DbError::invalid_state("the cursor has no current record")),
        };
        if key_only {
            return Err(DbError::invalid_state("key cursors cannot modify records"));
        }
        Ok((txn, store, primary_key))
    }

    fn restep(
        &self,
        txn: &Transaction,
        request: Request,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    ) -> DbResult<()> {
        self.0.borrow_mut().got_value = false;
        request.rearm();
        self.enqueue_step(txn, request, key, primary_key, count)?;
        Ok(())
    }

    fn enqueue_step(
        &self,
        txn: &Transaction,
        request: Request,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    ) -> DbResult<Request> {
        let cursor = self.clone();
        txn.enqueue(
            request,
            Box::new(move |txn: &Transaction| cursor.step(txn, key, primary_key, count)),
        )
    }

    /// Move `count` records, aiming the first move at the continue target
    fn step(
        &self,
        txn: &Transaction,
        key: Option<Key>,
        primary_key: Option<Key>,
        count: u32,
    ) -> DbResult<RequestResult> {
        let source = self.source();
        let records = source.records(txn)?;
        let (direction, range, mut position, mut osp) = {
            let inner = self.0.borrow();
            (
                inner.direction,
                inner.range.clone(),
                inner.position.clone(),
                inner.object_store_position.clone(),
            )
        };

        let mut found = None;
        for i in 0..count {
            let query = StepQuery {
                direction,
                range: &range,
                is_index: source.is_index(),
                position: position.as_ref(),
                object_store_position: osp.as_ref(),
                key: if i == 0 { key.as_ref() } else { None },
                primary_key: if i == 0 { primary_key.as_ref() } else { None },
            };
            found = find_record(&records, &query);
            let Some(at) = found else {
                break;
            };
            txn.runtime().metrics().increment_cursor_steps();
            position = Some(records[at].key.clone());
            osp = Some(records[at].primary_key.clone());
        }

        let mut inner = self.0.borrow_mut();
        match found {
            None => {
                if let Some(last) = position {
                    inner.position = Some(last);
                }
                inner.object_store_position = None;
                inner.key = None;
                inner.primary_key = None;
                inner.value = None;
                inner.got_value = false;
                Ok(RequestResult::CursorExhausted)
            }
            Some(at) => {
                let record = &records[at];
                inner.value = if inner.key_only {
                    None
                } else {
                    Some(decode(&record.value)?)
                };
                inner.position = Some(record.key.clone());
                inner.object_store_position = Some(record.primary_key.clone());
                inner.key = Some(record.key.clone());
                inner.primary_key = Some(record.primary_key.clone());
                inner.got_value = true;
                drop(inner);
                Ok(RequestResult::Cursor(self.clone()))
            }
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Cursor")
            .field("source", &inner.source)
            .field("direction", &inner.direction)
            .field("key", &inner.key)
            .field("primary_key", &inner.primary_key)
            .field("got_value", &inner.got_value)
            .finish()
    }
}
