//! Storage backend boundary
//!
//! The coordinator never touches physical storage. Everything persistent
//! goes through [`StorageBackend`], a narrow synchronous interface:
//! - Every call either completes or returns a [`BackendError`]
//! - Data calls are scoped by a [`TransactionHandle`]
//! - Commit publishes a transaction's effects, abort discards them
//! - Serializing overlapping read-write transactions is the backend's job
//!
//! Values cross the boundary already serialized; keys cross as [`Key`].

mod errors;
mod memory;

pub use errors::{BackendError, BackendErrorKind, BackendResult};
pub use memory::MemoryBackend;

use std::fmt;

use uuid::Uuid;

use crate::key::{Key, KeyPath, KeyRange};
use crate::transaction::{Durability, TransactionMode};

/// Backend-side transaction identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(Uuid);

impl TransactionHandle {
    /// Allocate a fresh handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TransactionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name and version of a stored database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

/// Persistent description of an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

/// Persistent description of an object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub indexes: Vec<IndexInfo>,
}

/// A record write, with index keys already computed by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub key: Key,
    pub value: Vec<u8>,
    /// Index name to the keys this record contributes to it
    pub index_keys: Vec<(String, Vec<Key>)>,
}

/// One entry of an index, joined with the referenced record
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub key: Key,
    pub primary_key: Key,
    pub value: Vec<u8>,
}

/// Physical storage collaborator
pub trait StorageBackend {
    /// Ensure the database exists; returns `(assigned_version, stored_version)`.
    ///
    /// A database that was never committed reports stored version 0. The
    /// assigned version is the requested one, or the stored one (at least 1).
    fn open_database(&mut self, name: &str, version: Option<u64>) -> BackendResult<(u64, u64)>;

    /// Delete a database; returns the version it had (0 if absent)
    fn delete_database(&mut self, name: &str) -> BackendResult<u64>;

    /// All databases with a committed version
    fn list_databases(&self) -> BackendResult<Vec<DatabaseInfo>>;

    /// Committed schema of a database
    fn object_stores(&self, db: &str) -> BackendResult<Vec<StoreInfo>>;

    fn transaction_create(
        &mut self,
        db: &str,
        mode: TransactionMode,
        durability: Durability,
    ) -> BackendResult<TransactionHandle>;

    fn transaction_commit(&mut self, txn: TransactionHandle) -> BackendResult<()>;

    fn transaction_abort(&mut self, txn: TransactionHandle) -> BackendResult<()>;

    /// Record a new database version as part of a version-change transaction
    fn set_version(&mut self, txn: TransactionHandle, version: u64) -> BackendResult<()>;

    fn create_object_store(&mut self, txn: TransactionHandle, store: &StoreInfo) -> BackendResult<()>;

    fn delete_object_store(&mut self, txn: TransactionHandle, name: &str) -> BackendResult<()>;

    fn rename_object_store(&mut self, txn: TransactionHandle, old: &str, new: &str) -> BackendResult<()>;

    /// Create an index populated with `(index_key, primary_key)` entries
    fn create_index(
        &mut self,
        txn: TransactionHandle,
        store: &str,
        index: &IndexInfo,
        entries: Vec<(Key, Key)>,
    ) -> BackendResult<()>;

    fn delete_index(&mut self, txn: TransactionHandle, store: &str, name: &str) -> BackendResult<()>;

    fn rename_index(
        &mut self,
        txn: TransactionHandle,
        store: &str,
        old: &str,
        new: &str,
    ) -> BackendResult<()>;

    /// Add or replace a record; `no_overwrite` turns an existing key into a constraint error
    fn put_record(
        &mut self,
        txn: TransactionHandle,
        store: &str,
        record: RecordWrite,
        no_overwrite: bool,
    ) -> BackendResult<()>;

    /// Delete every record in range; returns how many were removed
    fn delete_records(&mut self, txn: TransactionHandle, store: &str, range: &KeyRange) -> BackendResult<u64>;

    fn clear_store(&mut self, txn: TransactionHandle, store: &str) -> BackendResult<()>;

    /// Records in range, ascending by key
    fn get_records(
        &self,
        txn: TransactionHandle,
        store: &str,
        range: &KeyRange,
        limit: Option<u32>,
    ) -> BackendResult<Vec<(Key, Vec<u8>)>>;

    fn count_records(&self, txn: TransactionHandle, store: &str, range: &KeyRange) -> BackendResult<u64>;

    /// Every record of the store, ascending by key
    fn scan_records(&self, txn: TransactionHandle, store: &str) -> BackendResult<Vec<(Key, Vec<u8>)>>;

    /// Index entries in range, ascending by index key then primary key
    fn get_index_records(
        &self,
        txn: TransactionHandle,
        store: &str,
        index: &str,
        range: &KeyRange,
        limit: Option<u32>,
    ) -> BackendResult<Vec<IndexRecord>>;

    fn count_index_records(
        &self,
        txn: TransactionHandle,
        store: &str,
        index: &str,
        range: &KeyRange,
    ) -> BackendResult<u64>;

    /// Every entry of the index, ascending by index key then primary key
    fn scan_index(&self, txn: TransactionHandle, store: &str, index: &str) -> BackendResult<Vec<IndexRecord>>;
}
