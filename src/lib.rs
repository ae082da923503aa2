//! aerostore - a transactional object store coordinator
//!
//! Object stores, indexes, key ranges and cursors with atomic, ordered,
//! auto-committing transactions, over a pluggable [`StorageBackend`].
//!
//! Everything is single-threaded and deterministic: operations queue
//! requests, and [`Factory::run_until_idle`] runs them.
//!
//! ```no_run
//! use aerostore::{Factory, ObjectStoreParameters, TransactionMode, TransactionOptions, Value};
//!
//! let factory = Factory::in_memory();
//! let open = factory.open("library", Some(1)).unwrap();
//! open.set_on_upgrade_needed(|req, _| {
//!     let db = req.database().unwrap();
//!     db.create_object_store("books", ObjectStoreParameters::key_path("isbn")).unwrap();
//! });
//! factory.run_until_idle();
//!
//! let db = open.database().unwrap();
//! let txn = db.transaction(["books"], TransactionMode::ReadWrite, TransactionOptions::default()).unwrap();
//! let books = txn.object_store("books").unwrap();
//! books.put(Value::object([("isbn", Value::from("0441013597"))]), None).unwrap();
//! factory.run_until_idle();
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod errors;
pub mod key;
pub mod observability;
pub mod request;
pub(crate) mod runtime;
pub mod store;
pub mod transaction;

pub use backend::{MemoryBackend, StorageBackend};
pub use config::{ConfigError, FactoryConfig};
pub use connection::{Database, Factory};
pub use cursor::{Cursor, CursorSource, Direction};
pub use errors::{DbError, DbResult, ErrorKind};
pub use key::{Key, KeyGenerator, KeyPath, KeyRange, Query, Value};
pub use request::{ErrorDisposition, ReadyState, Request, RequestResult, RequestSource, VersionChangeEvent};
pub use store::{Index, IndexParameters, ObjectStore, ObjectStoreParameters};
pub use transaction::{Durability, Transaction, TransactionMode, TransactionOptions, TransactionState};
