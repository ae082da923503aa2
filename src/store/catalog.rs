//! Connection-side schema metadata
//!
//! Each connection keeps the schema it saw when it opened, plus whatever an
//! upgrade transaction changed since. Store handles read it at call time
//! and again at execution time.

use std::collections::BTreeMap;

use crate::backend::{IndexInfo, StoreInfo};
use crate::errors::{DbError, DbResult};
use crate::key::{Key, KeyPath, Value};
use crate::runtime::SharedGenerator;

/// Metadata of one object store
#[derive(Clone)]
pub(crate) struct StoreMeta {
    pub(crate) name: String,
    pub(crate) key_path: Option<KeyPath>,
    pub(crate) auto_increment: bool,
    /// Authoritative generator, shared by every connection to the database
    pub(crate) generator: Option<SharedGenerator>,
    pub(crate) indexes: BTreeMap<String, IndexInfo>,
}

impl StoreMeta {
    pub(crate) fn from_info(info: StoreInfo, generator: Option<SharedGenerator>) -> Self {
        Self {
            name: info.name,
            key_path: info.key_path,
            auto_increment: info.auto_increment,
            generator,
            indexes: info
                .indexes
                .into_iter()
                .map(|index| (index.name.clone(), index))
                .collect(),
        }
    }

    /// Keys `value` contributes to each index of the store
    pub(crate) fn index_keys(&self, value: &Value) -> Vec<(String, Vec<Key>)> {
        self.indexes
            .values()
            .map(|index| (index.name.clone(), index_entry_keys(index, value)))
            .filter(|(_, keys)| !keys.is_empty())
            .collect()
    }
}

/// Schema of a database as seen by one connection
pub(crate) type Catalog = BTreeMap<String, StoreMeta>;

/// Keys a value contributes to one index.
///
/// A value whose key path does not resolve to a valid key is simply not
/// indexed. Multi-entry indexes get one entry per distinct array element.
pub(crate) fn index_entry_keys(index: &IndexInfo, value: &Value) -> Vec<Key> {
    match index.key_path.extract_index_key(value, index.multi_entry) {
        None => Vec::new(),
        Some(key) if index.multi_entry && key.as_array().is_some() => {
            key.into_array().unwrap_or_default()
        }
        Some(key) => vec![key],
    }
}

/// Decode a stored record value
pub(crate) fn decode(bytes: &[u8]) -> DbResult<Value> {
    Value::from_bytes(bytes).map_err(|e| DbError::data(format!("stored value is corrupt: {}", e)))
}

/// Encode a record value for the backend
pub(crate) fn encode(value: &Value) -> DbResult<Vec<u8>> {
    value
        .to_bytes()
        .map_err(|e| DbError::data(format!("value cannot be serialized: {}", e)))
}
