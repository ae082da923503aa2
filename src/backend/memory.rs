//! In-memory storage backend
//!
//! Each transaction works on copy-on-write snapshots of the stores it
//! writes: the first write to a store clones its committed state into the
//! transaction's working set, later reads and writes in that transaction go
//! to the copy. Commit publishes the working set; abort drops it.
//!
//! Every committed store carries a generation number. A commit whose
//! working copy was taken from an older generation than the one currently
//! published fails with a conflict instead of silently losing updates.
//! A single factory never hits this: it holds overlapping writers back
//! until earlier ones finish, so each copy is taken after the previous
//! commit. Conflicts only arise between factories sharing a backend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use super::errors::{BackendError, BackendResult};
use super::{
    DatabaseInfo, IndexInfo, IndexRecord, RecordWrite, StorageBackend, StoreInfo,
    TransactionHandle,
};
use crate::key::{Key, KeyRange};
use crate::transaction::{Durability, TransactionMode};

/// Smallest possible key: dates sort below every other type
fn min_key() -> Key {
    Key::lowest()
}

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Vec<u8>,
    index_keys: Vec<(String, Vec<Key>)>,
}

#[derive(Debug, Clone)]
struct StoreData {
    info: StoreInfo,
    generation: u64,
    records: BTreeMap<Key, StoredRecord>,
    /// Index name to (index key, primary key) entries
    indexes: BTreeMap<String, BTreeSet<(Key, Key)>>,
}

impl StoreData {
    fn new(info: StoreInfo) -> Self {
        let indexes = info
            .indexes
            .iter()
            .map(|i| (i.name.clone(), BTreeSet::new()))
            .collect();
        Self {
            info,
            generation: 0,
            records: BTreeMap::new(),
            indexes,
        }
    }

    fn index_info(&self, name: &str) -> Option<&IndexInfo> {
        self.info.indexes.iter().find(|i| i.name == name)
    }

    fn index_entries(&self, name: &str) -> BackendResult<&BTreeSet<(Key, Key)>> {
        self.indexes
            .get(name)
            .ok_or_else(|| BackendError::not_found(format!("index '{}'", name)))
    }

    fn unlink(&mut self, primary_key: &Key, index_keys: &[(String, Vec<Key>)]) {
        for (name, keys) in index_keys {
            if let Some(entries) = self.indexes.get_mut(name) {
                for key in keys {
                    entries.remove(&(key.clone(), primary_key.clone()));
                }
            }
        }
    }

    /// True if `key` is already taken in the index by a record other than `primary_key`
    fn unique_violation(&self, index: &str, key: &Key, primary_key: &Key) -> bool {
        let Some(entries) = self.indexes.get(index) else {
            return false;
        };
        entries
            .range((key.clone(), min_key())..)
            .take_while(|(k, _)| k == key)
            .any(|(_, pk)| pk != primary_key)
    }
}

#[derive(Debug, Clone, Default)]
struct DatabaseData {
    version: u64,
    stores: BTreeMap<String, StoreData>,
}

#[derive(Debug)]
struct WorkingStore {
    base_generation: Option<u64>,
    /// `None` once the store is deleted in this transaction
    data: Option<StoreData>,
}

#[derive(Debug)]
struct TxnState {
    db: String,
    mode: TransactionMode,
    version: Option<u64>,
    working: BTreeMap<String, WorkingStore>,
}

/// Volatile backend keeping everything in process memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    databases: BTreeMap<String, DatabaseData>,
    transactions: HashMap<TransactionHandle, TxnState>,
    next_generation: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions neither committed nor aborted
    pub fn live_transactions(&self) -> usize {
        self.transactions.len()
    }

    fn txn(&self, handle: TransactionHandle) -> BackendResult<&TxnState> {
        self.transactions
            .get(&handle)
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))
    }

    fn read_store(&self, handle: TransactionHandle, store: &str) -> BackendResult<&StoreData> {
        let txn = self.txn(handle)?;
        let found = match txn.working.get(store) {
            Some(working) => working.data.as_ref(),
            None => self
                .databases
                .get(&txn.db)
                .and_then(|db| db.stores.get(store)),
        };
        found.ok_or_else(|| BackendError::not_found(format!("object store '{}'", store)))
    }

    fn writable_txn(&mut self, handle: TransactionHandle) -> BackendResult<&mut TxnState> {
        let txn = self
            .transactions
            .get_mut(&handle)
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))?;
        if txn.mode == TransactionMode::ReadOnly {
            return Err(BackendError::read_only("write through a read-only transaction"));
        }
        Ok(txn)
    }

    fn schema_txn(&mut self, handle: TransactionHandle) -> BackendResult<&mut TxnState> {
        let txn = self.writable_txn(handle)?;
        if txn.mode != TransactionMode::VersionChange {
            return Err(BackendError::internal("schema change outside a version change transaction"));
        }
        Ok(txn)
    }

    fn write_store(&mut self, handle: TransactionHandle, store: &str) -> BackendResult<&mut StoreData> {
        self.writable_txn(handle)?;
        let Self {
            databases,
            transactions,
            ..
        } = self;
        let txn = transactions
            .get_mut(&handle)
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))?;

        if !txn.working.contains_key(store) {
            let base = databases
                .get(&txn.db)
                .and_then(|db| db.stores.get(store))
                .ok_or_else(|| BackendError::not_found(format!("object store '{}'", store)))?;
            txn.working.insert(
                store.to_string(),
                WorkingStore {
                    base_generation: Some(base.generation),
                    data: Some(base.clone()),
                },
            );
        }

        txn.working
            .get_mut(store)
            .and_then(|working| working.data.as_mut())
            .ok_or_else(|| BackendError::not_found(format!("object store '{}'", store)))
    }

    fn store_exists(&self, handle: TransactionHandle, store: &str) -> BackendResult<bool> {
        match self.read_store(handle, store) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == super::BackendErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Replace the working entry for `store`, remembering the committed generation it shadows
    fn set_working(&mut self, handle: TransactionHandle, store: &str, data: Option<StoreData>) -> BackendResult<()> {
        let Self {
            databases,
            transactions,
            ..
        } = self;
        let txn = transactions
            .get_mut(&handle)
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))?;
        let base_generation = match txn.working.get(store) {
            Some(existing) => existing.base_generation,
            None => databases
                .get(&txn.db)
                .and_then(|db| db.stores.get(store))
                .map(|s| s.generation),
        };
        txn.working.insert(
            store.to_string(),
            WorkingStore {
                base_generation,
                data,
            },
        );
        Ok(())
    }
}

fn range_bounds(range: &KeyRange) -> Option<(Bound<&Key>, Bound<&Key>)> {
    if let (Some(lower), Some(upper)) = (range.lower(), range.upper()) {
        if lower > upper || (lower == upper && (range.lower_open() || range.upper_open())) {
            return None;
        }
    }
    let lower = match range.lower() {
        None => Bound::Unbounded,
        Some(k) if range.lower_open() => Bound::Excluded(k),
        Some(k) => Bound::Included(k),
    };
    let upper = match range.upper() {
        None => Bound::Unbounded,
        Some(k) if range.upper_open() => Bound::Excluded(k),
        Some(k) => Bound::Included(k),
    };
    Some((lower, upper))
}

fn records_in<'a>(
    data: &'a StoreData,
    range: &KeyRange,
) -> Box<dyn Iterator<Item = (&'a Key, &'a StoredRecord)> + 'a> {
    match range_bounds(range) {
        Some(bounds) => Box::new(data.records.range::<Key, _>(bounds)),
        None => Box::new(std::iter::empty()),
    }
}

fn take_limit<T>(iter: impl Iterator<Item = T>, limit: Option<u32>) -> Vec<T> {
    match limit {
        Some(n) if n > 0 => iter.take(n as usize).collect(),
        _ => iter.collect(),
    }
}

fn join_index<'a>(
    data: &'a StoreData,
    entries: impl Iterator<Item = &'a (Key, Key)> + 'a,
) -> impl Iterator<Item = IndexRecord> + 'a {
    entries.filter_map(move |(key, primary_key)| {
        data.records.get(primary_key).map(|record| IndexRecord {
            key: key.clone(),
            primary_key: primary_key.clone(),
            value: record.value.clone(),
        })
    })
}

impl StorageBackend for MemoryBackend {
    fn open_database(&mut self, name: &str, version: Option<u64>) -> BackendResult<(u64, u64)> {
        let db = self.databases.entry(name.to_string()).or_default();
        let stored = db.version;
        let assigned = version.unwrap_or_else(|| stored.max(1));
        Ok((assigned, stored))
    }

    fn delete_database(&mut self, name: &str) -> BackendResult<u64> {
        Ok(self.databases.remove(name).map(|db| db.version).unwrap_or(0))
    }

    fn list_databases(&self) -> BackendResult<Vec<DatabaseInfo>> {
        Ok(self
            .databases
            .iter()
            .filter(|(_, db)| db.version > 0)
            .map(|(name, db)| DatabaseInfo {
                name: name.clone(),
                version: db.version,
            })
            .collect())
    }

    fn object_stores(&self, db: &str) -> BackendResult<Vec<StoreInfo>> {
        let data = self
            .databases
            .get(db)
            .ok_or_else(|| BackendError::not_found(format!("database '{}'", db)))?;
        Ok(data.stores.values().map(|s| s.info.clone()).collect())
    }

    fn transaction_create(
        &mut self,
        db: &str,
        mode: TransactionMode,
        _durability: Durability,
    ) -> BackendResult<TransactionHandle> {
        if !self.databases.contains_key(db) {
            return Err(BackendError::not_found(format!("database '{}'", db)));
        }
        let handle = TransactionHandle::new();
        self.transactions.insert(
            handle,
            TxnState {
                db: db.to_string(),
                mode,
                version: None,
                working: BTreeMap::new(),
            },
        );
        Ok(handle)
    }

    fn transaction_commit(&mut self, handle: TransactionHandle) -> BackendResult<()> {
        let txn = self
            .transactions
            .remove(&handle)
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))?;
        let Self {
            databases,
            next_generation,
            ..
        } = self;
        let db = databases
            .get_mut(&txn.db)
            .ok_or_else(|| BackendError::invalid_handle(format!("database '{}' was deleted", txn.db)))?;

        for (name, working) in &txn.working {
            let published = db.stores.get(name).map(|s| s.generation);
            if published != working.base_generation {
                return Err(BackendError::conflict(format!(
                    "object store '{}' was modified by a concurrent transaction",
                    name
                )));
            }
        }

        for (name, working) in txn.working {
            match working.data {
                Some(mut data) => {
                    *next_generation += 1;
                    data.generation = *next_generation;
                    db.stores.insert(name, data);
                }
                None => {
                    db.stores.remove(&name);
                }
            }
        }
        if let Some(version) = txn.version {
            db.version = version;
        }
        Ok(())
    }

    fn transaction_abort(&mut self, handle: TransactionHandle) -> BackendResult<()> {
        self.transactions
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| BackendError::invalid_handle(format!("transaction {}", handle)))
    }

    fn set_version(&mut self, handle: TransactionHandle, version: u64) -> BackendResult<()> {
        self.schema_txn(handle)?.version = Some(version);
        Ok(())
    }

    fn create_object_store(&mut self, handle: TransactionHandle, store: &StoreInfo) -> BackendResult<()> {
        self.schema_txn(handle)?;
        if self.store_exists(handle, &store.name)? {
            return Err(BackendError::constraint(format!("object store '{}' already exists", store.name)));
        }
        self.set_working(handle, &store.name, Some(StoreData::new(store.clone())))
    }

    fn delete_object_store(&mut self, handle: TransactionHandle, name: &str) -> BackendResult<()> {
        self.schema_txn(handle)?;
        if !self.store_exists(handle, name)? {
            return Err(BackendError::not_found(format!("object store '{}'", name)));
        }
        self.set_working(handle, name, None)
    }

    fn rename_object_store(&mut self, handle: TransactionHandle, old: &str, new: &str) -> BackendResult<()> {
        self.schema_txn(handle)?;
        if self.store_exists(handle, new)? {
            return Err(BackendError::constraint(format!("object store '{}' already exists", new)));
        }
        let mut data = self.read_store(handle, old)?.clone();
        data.info.name = new.to_string();
        self.set_working(handle, old, None)?;
        self.set_working(handle, new, Some(data))
    }

    fn create_index(
        &mut self,
        handle: TransactionHandle,
        store: &str,
        index: &IndexInfo,
        entries: Vec<(Key, Key)>,
    ) -> BackendResult<()> {
        self.schema_txn(handle)?;
        let data = self.write_store(handle, store)?;
        if data.index_info(&index.name).is_some() {
            return Err(BackendError::constraint(format!("index '{}' already exists", index.name)));
        }

        let mut set = BTreeSet::new();
        for (key, primary_key) in entries {
            if index.unique
                && set
                    .range((key.clone(), min_key())..)
                    .take_while(|(k, _): &&(Key, Key)| *k == key)
                    .any(|(_, pk)| *pk != primary_key)
            {
                return Err(BackendError::constraint(format!(
                    "unique index '{}' has duplicate key {}",
                    index.name, key
                )));
            }
            if let Some(record) = data.records.get_mut(&primary_key) {
                match record.index_keys.iter_mut().find(|(name, _)| *name == index.name) {
                    Some((_, keys)) => keys.push(key.clone()),
                    None => record.index_keys.push((index.name.clone(), vec![key.clone()])),
                }
            }
            set.insert((key, primary_key));
        }

        data.info.indexes.push(index.clone());
        data.indexes.insert(index.name.clone(), set);
        Ok(())
    }

    fn delete_index(&mut self, handle: TransactionHandle, store: &str, name: &str) -> BackendResult<()> {
        self.schema_txn(handle)?;
        let data = self.write_store(handle, store)?;
        if data.index_info(name).is_none() {
            return Err(BackendError::not_found(format!("index '{}'", name)));
        }
        data.info.indexes.retain(|i| i.name != name);
        data.indexes.remove(name);
        for record in data.records.values_mut() {
            record.index_keys.retain(|(index, _)| index != name);
        }
        Ok(())
    }

    fn rename_index(&mut self, handle: TransactionHandle, store: &str, old: &str, new: &str) -> BackendResult<()> {
        self.schema_txn(handle)?;
        let data = self.write_store(handle, store)?;
        if data.index_info(new).is_some() {
            return Err(BackendError::constraint(format!("index '{}' already exists", new)));
        }
        let info = data
            .info
            .indexes
            .iter_mut()
            .find(|i| i.name == old)
            .ok_or_else(|| BackendError::not_found(format!("index '{}'", old)))?;
        info.name = new.to_string();
        if let Some(entries) = data.indexes.remove(old) {
            data.indexes.insert(new.to_string(), entries);
        }
        for record in data.records.values_mut() {
            for (index, _) in record.index_keys.iter_mut() {
                if index == old {
                    *index = new.to_string();
                }
            }
        }
        Ok(())
    }

    fn put_record(
        &mut self,
        handle: TransactionHandle,
        store: &str,
        record: RecordWrite,
        no_overwrite: bool,
    ) -> BackendResult<()> {
        let data = self.write_store(handle, store)?;
        if no_overwrite && data.records.contains_key(&record.key) {
            return Err(BackendError::constraint(format!(
                "a record with key {} already exists",
                record.key
            )));
        }

        let index_keys: Vec<(String, Vec<Key>)> = record
            .index_keys
            .into_iter()
            .filter(|(name, _)| data.index_info(name).is_some())
            .collect();

        for (name, keys) in &index_keys {
            let unique = data.index_info(name).map(|i| i.unique).unwrap_or(false);
            if !unique {
                continue;
            }
            if let Some(key) = keys.iter().find(|k| data.unique_violation(name, k, &record.key)) {
                return Err(BackendError::constraint(format!(
                    "unique index '{}' already contains key {}",
                    name, key
                )));
            }
        }

        if let Some(old) = data.records.remove(&record.key) {
            data.unlink(&record.key, &old.index_keys);
        }
        for (name, keys) in &index_keys {
            let entries = data.indexes.entry(name.clone()).or_default();
            for key in keys {
                entries.insert((key.clone(), record.key.clone()));
            }
        }
        data.records.insert(
            record.key,
            StoredRecord {
                value: record.value,
                index_keys,
            },
        );
        Ok(())
    }

    fn delete_records(&mut self, handle: TransactionHandle, store: &str, range: &KeyRange) -> BackendResult<u64> {
        let data = self.write_store(handle, store)?;
        let doomed: Vec<Key> = records_in(data, range).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            if let Some(old) = data.records.remove(key) {
                data.unlink(key, &old.index_keys);
            }
        }
        Ok(doomed.len() as u64)
    }

    fn clear_store(&mut self, handle: TransactionHandle, store: &str) -> BackendResult<()> {
        let data = self.write_store(handle, store)?;
        data.records.clear();
        for entries in data.indexes.values_mut() {
            entries.clear();
        }
        Ok(())
    }

    fn get_records(
        &self,
        handle: TransactionHandle,
        store: &str,
        range: &KeyRange,
        limit: Option<u32>,
    ) -> BackendResult<Vec<(Key, Vec<u8>)>> {
        let data = self.read_store(handle, store)?;
        let iter = records_in(data, range).map(|(k, r)| (k.clone(), r.value.clone()));
        Ok(take_limit(iter, limit))
    }

    fn count_records(&self, handle: TransactionHandle, store: &str, range: &KeyRange) -> BackendResult<u64> {
        let data = self.read_store(handle, store)?;
        Ok(records_in(data, range).count() as u64)
    }

    fn scan_records(&self, handle: TransactionHandle, store: &str) -> BackendResult<Vec<(Key, Vec<u8>)>> {
        let data = self.read_store(handle, store)?;
        Ok(data
            .records
            .iter()
            .map(|(k, r)| (k.clone(), r.value.clone()))
            .collect())
    }

    fn get_index_records(
        &self,
        handle: TransactionHandle,
        store: &str,
        index: &str,
        range: &KeyRange,
        limit: Option<u32>,
    ) -> BackendResult<Vec<IndexRecord>> {
        let data = self.read_store(handle, store)?;
        let entries = data
            .index_entries(index)?
            .iter()
            .filter(|(key, _)| range.includes(key));
        Ok(take_limit(join_index(data, entries), limit))
    }

    fn count_index_records(
        &self,
        handle: TransactionHandle,
        store: &str,
        index: &str,
        range: &KeyRange,
    ) -> BackendResult<u64> {
        let data = self.read_store(handle, store)?;
        Ok(data
            .index_entries(index)?
            .iter()
            .filter(|(key, _)| range.includes(key))
            .count() as u64)
    }

    fn scan_index(&self, handle: TransactionHandle, store: &str, index: &str) -> BackendResult<Vec<IndexRecord>> {
        let data = self.read_store(handle, store)?;
        Ok(join_index(data, data.index_entries(index)?.iter()).collect())
    }
}
