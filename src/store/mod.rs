//! Object store and index handles
//!
//! Handles are bound to one transaction. Every call validates its arguments
//! and the transaction state synchronously, with no side effects on
//! failure, then queues the backend work as a request.

pub(crate) mod catalog;
mod index;
mod object_store;

pub use index::Index;
pub use object_store::ObjectStore;

use crate::key::KeyPath;

/// Options for `Database::create_object_store`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStoreParameters {
    /// In-line key path; `None` for out-of-line keys
    pub key_path: Option<KeyPath>,
    /// Attach a key generator
    pub auto_increment: bool,
}

impl ObjectStoreParameters {
    pub fn key_path(path: impl Into<KeyPath>) -> Self {
        Self {
            key_path: Some(path.into()),
            auto_increment: false,
        }
    }

    pub fn auto_increment() -> Self {
        Self {
            key_path: None,
            auto_increment: true,
        }
    }

    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }
}

/// Options for `ObjectStore::create_index`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexParameters {
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexParameters {
    pub fn unique() -> Self {
        Self {
            unique: true,
            multi_entry: false,
        }
    }

    pub fn multi_entry() -> Self {
        Self {
            unique: false,
            multi_entry: true,
        }
    }
}
