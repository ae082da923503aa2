use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::catalog::{decode, StoreMeta};
use super::object_store::ObjectStore;
use crate::backend::IndexInfo;
use crate::cursor::{Cursor, CursorSource, Direction};
use crate::errors::{DbError, DbResult};
use crate::key::{range_of, KeyPath, Query};
use crate::request::{Request, RequestResult, RequestSource};
use crate::transaction::Transaction;

struct IndexInner {
    store: ObjectStore,
    name: String,
    deleted: bool,
}

/// Handle to an index within one transaction.
///
/// Reads resolve index keys to records of the owning store; results come
/// in index key order, ties broken by primary key.
#[derive(Clone)]
pub struct Index(Rc<RefCell<IndexInner>>);

impl Index {
    pub(crate) fn new(store: ObjectStore, name: &str) -> Self {
        Self(Rc::new(RefCell::new(IndexInner {
            store,
            name: name.to_string(),
            deleted: false,
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn object_store(&self) -> ObjectStore {
        self.0.borrow().store.clone()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.info().ok().map(|(_, info)| info.key_path)
    }

    pub fn unique(&self) -> bool {
        self.info().map(|(_, info)| info.unique).unwrap_or(false)
    }

    pub fn multi_entry(&self) -> bool {
        self.info().map(|(_, info)| info.multi_entry).unwrap_or(false)
    }

    /// Value of the first record whose index key matches `query`
    pub fn get(&self, query: impl Into<Query>) -> DbResult<Request> {
        let range = query.into().into_range();
        self.submit(move |txn, meta, info| {
            let records = txn.runtime().backend_ref().get_index_records(
                txn.handle(),
                &meta.name,
                &info.name,
                &range,
                Some(1),
            )?;
            match records.into_iter().next() {
                Some(record) => Ok(RequestResult::Value(decode(&record.value)?)),
                None => Ok(RequestResult::Undefined),
            }
        })
    }

    /// Primary key of the first record whose index key matches `query`
    pub fn get_key(&self, query: impl Into<Query>) -> DbResult<Request> {
        let range = query.into().into_range();
        self.submit(move |txn, meta, info| {
            let records = txn.runtime().backend_ref().get_index_records(
                txn.handle(),
                &meta.name,
                &info.name,
                &range,
                Some(1),
            )?;
            Ok(records
                .into_iter()
                .next()
                .map_or(RequestResult::Undefined, |r| RequestResult::Key(r.primary_key)))
        })
    }

    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta, info| {
            let records = txn.runtime().backend_ref().get_index_records(
                txn.handle(),
                &meta.name,
                &info.name,
                &range,
                count,
            )?;
            let values = records
                .iter()
                .map(|r| decode(&r.value))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(RequestResult::Values(values))
        })
    }

    /// Primary keys of the matching records
    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta, info| {
            let records = txn.runtime().backend_ref().get_index_records(
                txn.handle(),
                &meta.name,
                &info.name,
                &range,
                count,
            )?;
            Ok(RequestResult::Keys(
                records.into_iter().map(|r| r.primary_key).collect(),
            ))
        })
    }

    pub fn count(&self, query: Option<Query>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta, info| {
            let count = txn.runtime().backend_ref().count_index_records(
                txn.handle(),
                &meta.name,
                &info.name,
                &range,
            )?;
            Ok(RequestResult::Count(count))
        })
    }

    pub fn open_cursor(&self, query: Option<Query>, direction: Direction) -> DbResult<Request> {
        let txn = self.usable()?;
        Cursor::open(&txn, CursorSource::Index(self.clone()), range_of(query), direction, false)
    }

    pub fn open_key_cursor(&self, query: Option<Query>, direction: Direction) -> DbResult<Request> {
        let txn = self.usable()?;
        Cursor::open(&txn, CursorSource::Index(self.clone()), range_of(query), direction, true)
    }

    /// Rename within a version change transaction
    pub fn rename(&self, new_name: &str) -> DbResult<()> {
        let store = self.object_store();
        let txn = store.transaction();
        txn.ensure_upgrade()?;
        let (meta, info) = self.info()?;
        txn.ensure_active()?;
        if info.name == new_name {
            return Ok(());
        }
        if meta.indexes.contains_key(new_name) {
            return Err(DbError::constraint(format!("index '{}' already exists", new_name)));
        }

        txn.runtime()
            .backend()
            .rename_index(txn.handle(), &meta.name, &info.name, new_name)?;
        txn.database().update_store(&meta.name, |m| {
            if let Some(mut renamed) = m.indexes.remove(&info.name) {
                renamed.name = new_name.to_string();
                m.indexes.insert(new_name.to_string(), renamed);
            }
        });
        self.0.borrow_mut().name = new_name.to_string();
        Ok(())
    }

    // Internals

    /// Store metadata and this index's description
    pub(crate) fn info(&self) -> DbResult<(StoreMeta, IndexInfo)> {
        let (store, name, deleted) = {
            let inner = self.0.borrow();
            (inner.store.clone(), inner.name.clone(), inner.deleted)
        };
        let missing = || DbError::invalid_state(format!("index '{}' has been deleted", name));
        if deleted {
            return Err(missing());
        }
        let meta = store.meta()?;
        let info = meta.indexes.get(&name).cloned().ok_or_else(missing)?;
        Ok((meta, info))
    }

    fn usable(&self) -> DbResult<Transaction> {
        self.info()?;
        let txn = self.object_store().transaction();
        txn.ensure_active()?;
        Ok(txn)
    }

    fn submit(
        &self,
        op: impl FnOnce(&Transaction, &StoreMeta, &IndexInfo) -> DbResult<RequestResult> + 'static,
    ) -> DbResult<Request> {
        let txn = self.usable()?;
        let index = self.clone();
        let request = txn.new_request(RequestSource::Index(self.clone()));
        txn.enqueue(
            request,
            Box::new(move |txn: &Transaction| {
                let (meta, info) = index.info()?;
                op(txn, &meta, &info)
            }),
        )
    }

    pub(crate) fn mark_deleted(&self) {
        self.0.borrow_mut().deleted = true;
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Index")
            .field("name", &inner.name)
            .field("deleted", &inner.deleted)
            .finish()
    }
}
