use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::backend::StoreInfo;
use crate::errors::{DbError, DbResult};
use crate::key::KeyGenerator;
use crate::observability::{log_event_with_fields, Event, Logger};
use crate::request::VersionChangeEvent;
use crate::runtime::{Runtime, SharedGenerator};
use crate::store::catalog::{Catalog, StoreMeta};
use crate::store::{ObjectStore, ObjectStoreParameters};
use crate::transaction::{Durability, Transaction, TransactionMode, TransactionOptions};

type VersionChangeHandler = Box<dyn FnMut(&Database, &VersionChangeEvent)>;

struct DatabaseInner {
    id: u64,
    name: String,
    version: u64,
    runtime: Rc<Runtime>,
    catalog: Catalog,
    close_pending: bool,
    closed: bool,
    live_transactions: usize,
    upgrade_transaction: Option<Transaction>,
    /// Generators as they were before the running upgrade
    upgrade_generators: Vec<(String, SharedGenerator)>,
    on_version_change: Option<VersionChangeHandler>,
}

/// A connection to one database.
///
/// The connection carries its own view of the schema. Only a version
/// change transaction running on this connection can alter it.
#[derive(Clone)]
pub struct Database(Rc<RefCell<DatabaseInner>>);

/// Non-owning reference to a connection
#[derive(Clone)]
pub struct WeakDatabase(Weak<RefCell<DatabaseInner>>);

impl WeakDatabase {
    pub fn upgrade(&self) -> Option<Database> {
        self.0.upgrade().map(Database)
    }
}

impl Database {
    /// Connect at `version`, loading the committed schema
    pub(crate) fn connect(runtime: &Rc<Runtime>, name: &str, version: u64) -> DbResult<Database> {
        let catalog = load_catalog(runtime, name)?;
        let db = Database(Rc::new(RefCell::new(DatabaseInner {
            id: runtime.next_id(),
            name: name.to_string(),
            version,
            runtime: Rc::clone(runtime),
            catalog,
            close_pending: false,
            closed: false,
            live_transactions: 0,
            upgrade_transaction: None,
            upgrade_generators: Vec::new(),
            on_version_change: None,
        })));
        runtime.register_connection(&db);
        Ok(db)
    }

    // Accessors

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn version(&self) -> u64 {
        self.0.borrow().version
    }

    /// Store names, sorted
    pub fn object_store_names(&self) -> Vec<String> {
        self.0.borrow().catalog.keys().cloned().collect()
    }

    /// Closed, with every transaction finished
    pub fn is_closed(&self) -> bool {
        self.0.borrow().closed
    }

    /// `close` was called
    pub fn is_close_pending(&self) -> bool {
        self.0.borrow().close_pending
    }

    /// Called when another connection wants to upgrade or delete the database
    pub fn set_on_version_change(&self, handler: impl FnMut(&Database, &VersionChangeEvent) + 'static) {
        self.0.borrow_mut().on_version_change = Some(Box::new(handler));
    }

    // Operations

    /// Start a transaction over `scope`
    pub fn transaction<I, S>(
        &self,
        scope: I,
        mode: TransactionMode,
        options: TransactionOptions,
    ) -> DbResult<Transaction>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let runtime = {
            let inner = self.0.borrow();
            if inner.close_pending {
                return Err(DbError::invalid_state("the connection is closing"));
            }
            if inner.upgrade_transaction.is_some() {
                return Err(DbError::invalid_state(
                    "a version change transaction is running on this connection",
                ));
            }
            Rc::clone(&inner.runtime)
        };
        if mode == TransactionMode::VersionChange {
            return Err(DbError::type_error(
                "version change transactions are only created by open",
            ));
        }

        let scope: BTreeSet<String> = scope.into_iter().map(|s| s.as_ref().to_string()).collect();
        if scope.is_empty() {
            return Err(DbError::invalid_access("the transaction scope is empty"));
        }
        if let Some(missing) = scope.iter().find(|name| !self.has_store(name)) {
            return Err(DbError::not_found(format!("object store '{}' does not exist", missing)));
        }

        let durability = options
            .durability
            .unwrap_or(runtime.config().default_durability);
        Transaction::begin(&runtime, self, scope, mode, durability)
    }

    /// Create a store inside the running version change transaction
    pub fn create_object_store(&self, name: &str, params: ObjectStoreParameters) -> DbResult<ObjectStore> {
        let txn = self.running_upgrade()?;
        txn.ensure_active()?;
        if let Some(path) = &params.key_path {
            path.validate()?;
        }
        if self.has_store(name) {
            return Err(DbError::constraint(format!("object store '{}' already exists", name)));
        }
        if params.auto_increment {
            if let Some(path) = &params.key_path {
                if path.is_empty_path() || path.is_sequence() {
                    return Err(DbError::invalid_access(
                        "auto increment needs a non-empty single key path",
                    ));
                }
            }
        }

        let info = StoreInfo {
            name: name.to_string(),
            key_path: params.key_path,
            auto_increment: params.auto_increment,
            indexes: Vec::new(),
        };
        let runtime = self.runtime();
        let db_name = self.name();
        runtime.backend().create_object_store(txn.handle(), &info)?;

        let generator = info
            .auto_increment
            .then(|| runtime.reset_generator(&db_name, name));
        self.0
            .borrow_mut()
            .catalog
            .insert(name.to_string(), StoreMeta::from_info(info, generator));
        txn.add_to_scope(name);
        txn.object_store(name)
    }

    /// Delete a store inside the running version change transaction
    pub fn delete_object_store(&self, name: &str) -> DbResult<()> {
        let txn = self.running_upgrade()?;
        txn.ensure_active()?;
        if !self.has_store(name) {
            return Err(DbError::not_found(format!("object store '{}' does not exist", name)));
        }

        let runtime = self.runtime();
        runtime.backend().delete_object_store(txn.handle(), name)?;
        runtime.remove_generator(&self.name(), name);
        self.0.borrow_mut().catalog.remove(name);
        txn.forget_store(name);
        Ok(())
    }

    /// Close once every transaction of this connection has finished
    pub fn close(&self) {
        self.0.borrow_mut().close_pending = true;
        self.maybe_finish_close();
    }

    pub fn downgrade(&self) -> WeakDatabase {
        WeakDatabase(Rc::downgrade(&self.0))
    }

    // Catalog access for store handles

    pub(crate) fn has_store(&self, name: &str) -> bool {
        self.0.borrow().catalog.contains_key(name)
    }

    pub(crate) fn store_meta(&self, name: &str) -> Option<StoreMeta> {
        self.0.borrow().catalog.get(name).cloned()
    }

    pub(crate) fn update_store(&self, name: &str, f: impl FnOnce(&mut StoreMeta)) {
        if let Some(meta) = self.0.borrow_mut().catalog.get_mut(name) {
            f(meta);
        }
    }

    pub(crate) fn rename_store(&self, old: &str, new: &str) {
        let runtime = {
            let mut inner = self.0.borrow_mut();
            if let Some(mut meta) = inner.catalog.remove(old) {
                meta.name = new.to_string();
                inner.catalog.insert(new.to_string(), meta);
            }
            Rc::clone(&inner.runtime)
        };
        runtime.rename_generator(&self.name(), old, new);
    }

    // Upgrade bookkeeping

    pub(crate) fn begin_upgrade(&self, txn: &Transaction, version: u64) {
        let snapshot = self.runtime().snapshot_generators(&self.name());
        let mut inner = self.0.borrow_mut();
        inner.upgrade_transaction = Some(txn.clone());
        inner.upgrade_generators = snapshot;
        inner.version = version;
    }

    /// Undo an aborted upgrade: previous version, committed schema
    pub(crate) fn revert_upgrade(&self, version: u64) {
        let (runtime, name, generators) = {
            let mut inner = self.0.borrow_mut();
            inner.version = version;
            (
                Rc::clone(&inner.runtime),
                inner.name.clone(),
                std::mem::take(&mut inner.upgrade_generators),
            )
        };
        runtime.restore_generators(&name, generators);
        match load_catalog(&runtime, &name) {
            Ok(catalog) => self.0.borrow_mut().catalog = catalog,
            Err(e) => Logger::warn(
                "CATALOG_RELOAD_FAILED",
                &[("db", name.as_str()), ("reason", e.message())],
            ),
        }
    }

    pub(crate) fn notify_version_change(&self, event: &VersionChangeEvent) {
        let handler = self.0.borrow_mut().on_version_change.take();
        if let Some(mut handler) = handler {
            handler(self, event);
            let mut inner = self.0.borrow_mut();
            if inner.on_version_change.is_none() {
                inner.on_version_change = Some(handler);
            }
        }
    }

    // Transaction bookkeeping

    pub(crate) fn transaction_started(&self) {
        self.0.borrow_mut().live_transactions += 1;
    }

    pub(crate) fn transaction_finished(&self, txn: &Transaction) {
        {
            let mut inner = self.0.borrow_mut();
            inner.live_transactions = inner.live_transactions.saturating_sub(1);
            if inner
                .upgrade_transaction
                .as_ref()
                .is_some_and(|running| running.ptr_eq(txn))
            {
                inner.upgrade_transaction = None;
                inner.upgrade_generators.clear();
            }
        }
        self.maybe_finish_close();
    }

    fn maybe_finish_close(&self) {
        let (runtime, name) = {
            let mut inner = self.0.borrow_mut();
            if !inner.close_pending || inner.closed || inner.live_transactions > 0 {
                return;
            }
            inner.closed = true;
            inner.on_version_change = None;
            (Rc::clone(&inner.runtime), inner.name.clone())
        };
        log_event_with_fields(
            Event::ConnectionClosed,
            &[("connection", self.id().to_string().as_str()), ("db", name.as_str())],
        );
        runtime.connection_closed(&name);
    }

    fn runtime(&self) -> Rc<Runtime> {
        Rc::clone(&self.0.borrow().runtime)
    }

    fn running_upgrade(&self) -> DbResult<Transaction> {
        self.0
            .borrow()
            .upgrade_transaction
            .clone()
            .ok_or_else(|| DbError::invalid_state("only allowed in a version change transaction"))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Database")
            .field("id", &inner.id)
            .field("name", &inner.name)
            .field("version", &inner.version)
            .field("closed", &inner.closed)
            .finish()
    }
}

/// Committed schema of `name`, with the authoritative generator of every
/// auto-increment store
fn load_catalog(runtime: &Runtime, name: &str) -> DbResult<Catalog> {
    let stores = runtime.backend_ref().object_stores(name)?;
    let mut catalog = Catalog::new();
    for info in stores {
        let generator = if info.auto_increment {
            Some(match runtime.generator(name, &info.name) {
                Some(generator) => generator,
                None => seed_generator(runtime, name, &info.name)?,
            })
        } else {
            None
        };
        catalog.insert(info.name.clone(), StoreMeta::from_info(info, generator));
    }
    Ok(catalog)
}

/// Rebuild a generator no connection has seen yet from the stored keys
fn seed_generator(runtime: &Runtime, db: &str, store: &str) -> DbResult<SharedGenerator> {
    let handle = runtime
        .backend()
        .transaction_create(db, TransactionMode::ReadOnly, Durability::Relaxed)?;
    let scanned = runtime.backend_ref().scan_records(handle, store);
    if let Err(e) = runtime.backend().transaction_abort(handle) {
        Logger::warn("SEED_ABORT_FAILED", &[("db", db), ("reason", e.message())]);
    }

    let mut generator = KeyGenerator::new();
    for (key, _) in scanned? {
        generator.possibly_update(&key);
    }
    let generator = Rc::new(RefCell::new(generator));
    runtime.install_generator(db, store, Rc::clone(&generator));
    Ok(generator)
}
