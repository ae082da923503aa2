use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::catalog::{decode, encode, index_entry_keys, StoreMeta};
use super::index::Index;
use super::IndexParameters;
use crate::backend::{IndexInfo, RecordWrite};
use crate::cursor::{Cursor, CursorSource, Direction};
use crate::errors::{DbError, DbResult};
use crate::key::{range_of, to_key, Extracted, Key, KeyPath, KeyRange, Query, Value};
use crate::request::{Request, RequestResult, RequestSource};
use crate::transaction::{Transaction, TransactionState};

struct ObjectStoreInner {
    transaction: Transaction,
    name: String,
    deleted: bool,
    indexes: Vec<Index>,
}

/// Handle to an object store within one transaction
#[derive(Clone)]
pub struct ObjectStore(Rc<RefCell<ObjectStoreInner>>);

impl ObjectStore {
    pub(crate) fn new(transaction: Transaction, name: &str) -> Self {
        Self(Rc::new(RefCell::new(ObjectStoreInner {
            transaction,
            name: name.to_string(),
            deleted: false,
            indexes: Vec::new(),
        })))
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn transaction(&self) -> Transaction {
        self.0.borrow().transaction.clone()
    }

    pub fn key_path(&self) -> Option<KeyPath> {
        self.meta().ok().and_then(|m| m.key_path)
    }

    pub fn auto_increment(&self) -> bool {
        self.meta().map(|m| m.auto_increment).unwrap_or(false)
    }

    /// Index names, sorted
    pub fn index_names(&self) -> Vec<String> {
        self.meta()
            .map(|m| m.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    // Reads

    /// Value of the first record matching `query`, or `Undefined`
    pub fn get(&self, query: impl Into<Query>) -> DbResult<Request> {
        let range = query.into().into_range();
        self.submit(move |txn, meta| {
            let records = txn
                .runtime()
                .backend_ref()
                .get_records(txn.handle(), &meta.name, &range, Some(1))?;
            match records.into_iter().next() {
                Some((_, bytes)) => Ok(RequestResult::Value(decode(&bytes)?)),
                None => Ok(RequestResult::Undefined),
            }
        })
    }

    /// Key of the first record matching `query`, or `Undefined`
    pub fn get_key(&self, query: impl Into<Query>) -> DbResult<Request> {
        let range = query.into().into_range();
        self.submit(move |txn, meta| {
            let records = txn
                .runtime()
                .backend_ref()
                .get_records(txn.handle(), &meta.name, &range, Some(1))?;
            Ok(records
                .into_iter()
                .next()
                .map_or(RequestResult::Undefined, |(key, _)| RequestResult::Key(key)))
        })
    }

    /// Values of every record matching `query`, at most `count` (0 or `None` is unlimited)
    pub fn get_all(&self, query: Option<Query>, count: Option<u32>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta| {
            let records = txn
                .runtime()
                .backend_ref()
                .get_records(txn.handle(), &meta.name, &range, count)?;
            let values = records
                .iter()
                .map(|(_, bytes)| decode(bytes))
                .collect::<DbResult<Vec<_>>>()?;
            Ok(RequestResult::Values(values))
        })
    }

    pub fn get_all_keys(&self, query: Option<Query>, count: Option<u32>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta| {
            let records = txn
                .runtime()
                .backend_ref()
                .get_records(txn.handle(), &meta.name, &range, count)?;
            Ok(RequestResult::Keys(records.into_iter().map(|(k, _)| k).collect()))
        })
    }

    pub fn count(&self, query: Option<Query>) -> DbResult<Request> {
        let range = range_of(query);
        self.submit(move |txn, meta| {
            let count = txn
                .runtime()
                .backend_ref()
                .count_records(txn.handle(), &meta.name, &range)?;
            Ok(RequestResult::Count(count))
        })
    }

    pub fn open_cursor(&self, query: Option<Query>, direction: Direction) -> DbResult<Request> {
        let txn = self.usable()?.0;
        Cursor::open(&txn, CursorSource::Store(self.clone()), range_of(query), direction, false)
    }

    pub fn open_key_cursor(&self, query: Option<Query>, direction: Direction) -> DbResult<Request> {
        let txn = self.usable()?.0;
        Cursor::open(&txn, CursorSource::Store(self.clone()), range_of(query), direction, true)
    }

    // Writes

    /// Insert or replace a record; resolves to its key
    pub fn put(&self, value: impl Into<Value>, key: Option<Key>) -> DbResult<Request> {
        self.add_or_put(value.into(), key, false)
    }

    /// Insert a record; an existing key fails the request with `ConstraintError`
    pub fn add(&self, value: impl Into<Value>, key: Option<Key>) -> DbResult<Request> {
        self.add_or_put(value.into(), key, true)
    }

    pub fn delete(&self, query: impl Into<Query>) -> DbResult<Request> {
        let (txn, _) = self.usable()?;
        txn.ensure_writable()?;
        self.enqueue_delete(&txn, query.into().into_range(), RequestSource::Store(self.clone()))
    }

    pub fn clear(&self) -> DbResult<Request> {
        let (txn, _) = self.usable()?;
        txn.ensure_writable()?;
        self.submit(|txn, meta| {
            txn.runtime().backend().clear_store(txn.handle(), &meta.name)?;
            Ok(RequestResult::Undefined)
        })
    }

    fn add_or_put(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> DbResult<Request> {
        let (txn, meta) = self.usable()?;
        txn.ensure_writable()?;

        match (&meta.key_path, &key, &meta.generator) {
            (Some(_), Some(_), _) => {
                return Err(DbError::data(
                    "the object store uses in-line keys and a key was supplied",
                ))
            }
            (None, None, None) => {
                return Err(DbError::data(
                    "the object store uses out-of-line keys and has no key generator",
                ))
            }
            _ => {}
        }
        if let Some(key) = &key {
            to_key(&key.to_value())?;
        }
        if let Some(path) = &meta.key_path {
            match path.extract_key(&value) {
                Extracted::Key(_) => {}
                Extracted::Invalid => {
                    return Err(DbError::data("the key path yielded an invalid key"));
                }
                Extracted::Missing if meta.generator.is_none() => {
                    return Err(DbError::data("the key path yielded no key"));
                }
                Extracted::Missing if !path.can_inject(&value) => {
                    return Err(DbError::data("a generated key cannot be stored in the value"));
                }
                Extracted::Missing => {}
            }
        }

        self.enqueue_put(&txn, value, key, no_overwrite, RequestSource::Store(self.clone()))
    }

    pub(crate) fn enqueue_put(
        &self,
        txn: &Transaction,
        value: Value,
        key: Option<Key>,
        no_overwrite: bool,
        source: RequestSource,
    ) -> DbResult<Request> {
        let store = self.clone();
        let request = txn.new_request(source);
        txn.enqueue(
            request,
            Box::new(move |txn: &Transaction| {
                store.store_record(txn, value, key, no_overwrite)
            }),
        )
    }

    pub(crate) fn enqueue_delete(
        &self,
        txn: &Transaction,
        range: KeyRange,
        source: RequestSource,
    ) -> DbResult<Request> {
        let store = self.clone();
        let request = txn.new_request(source);
        txn.enqueue(
            request,
            Box::new(move |txn: &Transaction| {
                let meta = store.meta()?;
                txn.runtime()
                    .backend()
                    .delete_records(txn.handle(), &meta.name, &range)?;
                Ok(RequestResult::Undefined)
            }),
        )
    }

    /// Resolve the record key, run the key generator, compute index keys and write
    fn store_record(
        &self,
        txn: &Transaction,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> DbResult<RequestResult> {
        let meta = self.meta()?;
        let runtime = txn.runtime();

        let inline = match &meta.key_path {
            Some(path) if key.is_none() => match path.extract_key(&value) {
                Extracted::Key(key) => Some(key),
                _ => None,
            },
            _ => None,
        };

        let key = match key.or(inline) {
            Some(key) => {
                if let Some(generator) = &meta.generator {
                    generator.borrow_mut().possibly_update(&key);
                }
                key
            }
            None => {
                let generator = meta
                    .generator
                    .as_ref()
                    .ok_or_else(|| DbError::data("the record has no key"))?;
                let generated = generator.borrow_mut().generate_key()?;
                runtime.metrics().increment_keys_generated();
                let key = Key::from(generated);
                if let Some(path) = &meta.key_path {
                    path.inject(&mut value, &key)?;
                }
                key
            }
        };

        let record = RecordWrite {
            key: key.clone(),
            value: encode(&value)?,
            index_keys: meta.index_keys(&value),
        };
        runtime
            .backend()
            .put_record(txn.handle(), &meta.name, record, no_overwrite)?;
        Ok(RequestResult::Key(key))
    }

    // Schema, version change transactions only

    /// Create an index and populate it from the records already stored
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        params: IndexParameters,
    ) -> DbResult<Index> {
        let txn = self.transaction();
        txn.ensure_upgrade()?;
        let meta = self.meta()?;
        txn.ensure_active()?;

        if meta.indexes.contains_key(name) {
            return Err(DbError::constraint(format!("index '{}' already exists", name)));
        }
        let key_path = key_path.into();
        key_path.validate()?;
        if key_path.is_sequence() && params.multi_entry {
            return Err(DbError::invalid_access(
                "a multi-entry index cannot use a sequence key path",
            ));
        }

        let info = IndexInfo {
            name: name.to_string(),
            key_path,
            unique: params.unique,
            multi_entry: params.multi_entry,
        };
        let populated = self.populate_index(&txn, &meta, &info);
        txn.database()
            .update_store(&meta.name, |m| {
                m.indexes.insert(info.name.clone(), info.clone());
            });

        // A population failure (duplicate keys in a unique index) aborts
        // the upgrade asynchronously, like any failed request
        if let Err(error) = populated {
            let request = txn.new_request(RequestSource::Store(self.clone()));
            txn.enqueue(request, Box::new(move |_: &Transaction| Err(error)))?;
        }

        let index = Index::new(self.clone(), name);
        self.0.borrow_mut().indexes.push(index.clone());
        Ok(index)
    }

    fn populate_index(&self, txn: &Transaction, meta: &StoreMeta, info: &IndexInfo) -> DbResult<()> {
        let runtime = txn.runtime();
        let records = runtime.backend_ref().scan_records(txn.handle(), &meta.name)?;
        let mut entries = Vec::new();
        for (primary_key, bytes) in records {
            let value = decode(&bytes)?;
            for key in index_entry_keys(info, &value) {
                entries.push((key, primary_key.clone()));
            }
        }
        runtime
            .backend()
            .create_index(txn.handle(), &meta.name, info, entries)?;
        Ok(())
    }

    pub fn delete_index(&self, name: &str) -> DbResult<()> {
        let txn = self.transaction();
        txn.ensure_upgrade()?;
        let meta = self.meta()?;
        txn.ensure_active()?;
        if !meta.indexes.contains_key(name) {
            return Err(DbError::not_found(format!("index '{}' does not exist", name)));
        }

        txn.runtime()
            .backend()
            .delete_index(txn.handle(), &meta.name, name)?;
        txn.database().update_store(&meta.name, |m| {
            m.indexes.remove(name);
        });

        let mut inner = self.0.borrow_mut();
        if let Some(pos) = inner.indexes.iter().position(|i| i.name() == name) {
            inner.indexes.remove(pos).mark_deleted();
        }
        Ok(())
    }

    /// Handle for an index of this store; the same handle every time
    pub fn index(&self, name: &str) -> DbResult<Index> {
        let txn = self.transaction();
        if txn.state() == TransactionState::Finished {
            return Err(DbError::invalid_state("the transaction has finished"));
        }
        let meta = self.meta()?;
        if !meta.indexes.contains_key(name) {
            return Err(DbError::not_found(format!("index '{}' does not exist", name)));
        }

        let cached = self
            .0
            .borrow()
            .indexes
            .iter()
            .find(|i| i.name() == name)
            .cloned();
        if let Some(index) = cached {
            return Ok(index);
        }
        let index = Index::new(self.clone(), name);
        self.0.borrow_mut().indexes.push(index.clone());
        Ok(index)
    }

    pub fn rename(&self, new_name: &str) -> DbResult<()> {
        let txn = self.transaction();
        txn.ensure_upgrade()?;
        let meta = self.meta()?;
        txn.ensure_active()?;
        if meta.name == new_name {
            return Ok(());
        }
        let database = txn.database();
        if database.has_store(new_name) {
            return Err(DbError::constraint(format!(
                "object store '{}' already exists",
                new_name
            )));
        }

        txn.runtime()
            .backend()
            .rename_object_store(txn.handle(), &meta.name, new_name)?;
        database.rename_store(&meta.name, new_name);
        self.0.borrow_mut().name = new_name.to_string();
        Ok(())
    }

    // Internals

    /// Current metadata; `InvalidStateError` once the store is deleted
    pub(crate) fn meta(&self) -> DbResult<StoreMeta> {
        let inner = self.0.borrow();
        if inner.deleted {
            return Err(DbError::invalid_state(format!(
                "object store '{}' has been deleted",
                inner.name
            )));
        }
        inner
            .transaction
            .database()
            .store_meta(&inner.name)
            .ok_or_else(|| {
                DbError::invalid_state(format!("object store '{}' has been deleted", inner.name))
            })
    }

    /// Store exists and the transaction is active
    pub(crate) fn usable(&self) -> DbResult<(Transaction, StoreMeta)> {
        let meta = self.meta()?;
        let txn = self.transaction();
        txn.ensure_active()?;
        Ok((txn, meta))
    }

    fn submit(
        &self,
        op: impl FnOnce(&Transaction, &StoreMeta) -> DbResult<RequestResult> + 'static,
    ) -> DbResult<Request> {
        let (txn, _) = self.usable()?;
        let store = self.clone();
        let request = txn.new_request(RequestSource::Store(self.clone()));
        txn.enqueue(
            request,
            Box::new(move |txn: &Transaction| {
                let meta = store.meta()?;
                op(txn, &meta)
            }),
        )
    }

    pub(crate) fn mark_deleted(&self) {
        let indexes = {
            let mut inner = self.0.borrow_mut();
            inner.deleted = true;
            std::mem::take(&mut inner.indexes)
        };
        for index in indexes {
            index.mark_deleted();
        }
    }

    /// Drop cached index handles when the transaction finishes
    pub(crate) fn release_indexes(&self) {
        self.0.borrow_mut().indexes.clear();
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("ObjectStore")
            .field("name", &inner.name)
            .field("deleted", &inner.deleted)
            .finish()
    }
}
