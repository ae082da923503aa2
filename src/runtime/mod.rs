//! Shared coordinator state
//!
//! One [`Runtime`] sits behind a factory and every handle derived from it:
//! - the cooperative event loop
//! - the storage backend
//! - counters and configuration
//! - the authoritative key generator of each auto-increment store
//! - the open queue and the registry of live connections
//! - the live transactions, in creation order, for start ordering

mod event_loop;
mod open_queue;

pub use event_loop::EventLoop;

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use open_queue::{OpenQueue, StartTask};

use crate::backend::StorageBackend;
use crate::config::FactoryConfig;
use crate::connection::{Database, WeakDatabase};
use crate::key::KeyGenerator;
use crate::observability::MetricsRegistry;
use crate::transaction::{Transaction, TransactionMode};

pub(crate) type SharedBackend = Rc<RefCell<dyn StorageBackend>>;
pub(crate) type SharedGenerator = Rc<RefCell<KeyGenerator>>;

pub(crate) struct Runtime {
    event_loop: EventLoop,
    backend: SharedBackend,
    metrics: MetricsRegistry,
    config: FactoryConfig,
    generators: RefCell<HashMap<(String, String), SharedGenerator>>,
    open_queue: OpenQueue,
    connections: RefCell<Vec<WeakDatabase>>,
    blocked: RefCell<HashMap<String, StartTask>>,
    transactions: RefCell<Vec<Transaction>>,
    next_id: Cell<u64>,
}

impl Runtime {
    pub(crate) fn new(backend: SharedBackend, config: FactoryConfig) -> Rc<Self> {
        Rc::new(Self {
            event_loop: EventLoop::new(),
            backend,
            metrics: MetricsRegistry::new(),
            config,
            generators: RefCell::new(HashMap::new()),
            open_queue: OpenQueue::new(),
            connections: RefCell::new(Vec::new()),
            blocked: RefCell::new(HashMap::new()),
            transactions: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
        })
    }

    pub(crate) fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub(crate) fn schedule(&self, task: impl FnOnce() + 'static) {
        self.event_loop.schedule(task);
    }

    pub(crate) fn backend(&self) -> RefMut<'_, dyn StorageBackend> {
        self.backend.borrow_mut()
    }

    pub(crate) fn backend_ref(&self) -> Ref<'_, dyn StorageBackend> {
        self.backend.borrow()
    }

    pub(crate) fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub(crate) fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// Process-unique id for connections, transactions and requests
    pub(crate) fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    // Key generators

    pub(crate) fn generator(&self, db: &str, store: &str) -> Option<SharedGenerator> {
        self.generators
            .borrow()
            .get(&(db.to_string(), store.to_string()))
            .cloned()
    }

    /// Install a fresh generator, replacing any previous one for the store
    pub(crate) fn reset_generator(&self, db: &str, store: &str) -> SharedGenerator {
        let generator = Rc::new(RefCell::new(KeyGenerator::new()));
        self.generators
            .borrow_mut()
            .insert((db.to_string(), store.to_string()), Rc::clone(&generator));
        generator
    }

    pub(crate) fn install_generator(&self, db: &str, store: &str, generator: SharedGenerator) {
        self.generators
            .borrow_mut()
            .insert((db.to_string(), store.to_string()), generator);
    }

    pub(crate) fn remove_generator(&self, db: &str, store: &str) {
        self.generators
            .borrow_mut()
            .remove(&(db.to_string(), store.to_string()));
    }

    pub(crate) fn rename_generator(&self, db: &str, old: &str, new: &str) {
        let mut generators = self.generators.borrow_mut();
        if let Some(generator) = generators.remove(&(db.to_string(), old.to_string())) {
            generators.insert((db.to_string(), new.to_string()), generator);
        }
    }

    /// Generators of every store of `db`, for restoring after an aborted upgrade
    pub(crate) fn snapshot_generators(&self, db: &str) -> Vec<(String, SharedGenerator)> {
        self.generators
            .borrow()
            .iter()
            .filter(|((name, _), _)| name == db)
            .map(|((_, store), generator)| (store.clone(), Rc::clone(generator)))
            .collect()
    }

    pub(crate) fn restore_generators(&self, db: &str, snapshot: Vec<(String, SharedGenerator)>) {
        self.drop_generators(db);
        let mut generators = self.generators.borrow_mut();
        for (store, generator) in snapshot {
            generators.insert((db.to_string(), store), generator);
        }
    }

    pub(crate) fn drop_generators(&self, db: &str) {
        self.generators.borrow_mut().retain(|(name, _), _| name != db);
    }

    // Open queue

    /// Queue an open or delete request; it starts once every earlier
    /// request for the same name has released the queue
    pub(crate) fn enqueue_open(&self, name: &str, start: impl FnOnce() + 'static) {
        if let Some(start) = self.open_queue.enqueue(name, Box::new(start)) {
            self.schedule(start);
        }
    }

    pub(crate) fn release_open(&self, name: &str) {
        if let Some(next) = self.open_queue.release(name) {
            self.schedule(next);
        }
    }

    // Connections

    pub(crate) fn register_connection(&self, db: &Database) {
        let mut connections = self.connections.borrow_mut();
        connections.retain(|weak| weak.upgrade().is_some());
        connections.push(db.downgrade());
    }

    /// Live, not fully closed connections to `name`
    pub(crate) fn connections_to(&self, name: &str) -> Vec<Database> {
        self.connections
            .borrow()
            .iter()
            .filter_map(WeakDatabase::upgrade)
            .filter(|db| db.name() == name && !db.is_closed())
            .collect()
    }

    /// Park the continuation of a blocked open or delete until every
    /// other connection to `name` has closed
    pub(crate) fn wait_for_close(&self, name: &str, resume: impl FnOnce() + 'static) {
        self.blocked
            .borrow_mut()
            .insert(name.to_string(), Box::new(resume));
        self.connection_closed(name);
    }

    /// Called whenever a connection finishes closing
    pub(crate) fn connection_closed(&self, name: &str) {
        if !self.connections_to(name).is_empty() {
            return;
        }
        let resume = self.blocked.borrow_mut().remove(name);
        if let Some(resume) = resume {
            self.schedule(resume);
        }
    }

    // Transactions

    /// Whether a new transaction has to hold its requests behind a live one
    pub(crate) fn must_wait(&self, db: &str, scope: &BTreeSet<String>, mode: TransactionMode) -> bool {
        self.transactions
            .borrow()
            .iter()
            .any(|txn| txn.holds_back(db, scope, mode))
    }

    pub(crate) fn register_transaction(&self, txn: &Transaction) {
        self.transactions.borrow_mut().push(txn.clone());
    }

    /// Forget a finished transaction and start every waiting one that no
    /// earlier live transaction holds back any more
    pub(crate) fn transaction_finished(&self, txn: &Transaction) {
        let ready: Vec<Transaction> = {
            let mut live = self.transactions.borrow_mut();
            live.retain(|t| !t.ptr_eq(txn));
            let live = &*live;
            let ready = live
                .iter()
                .enumerate()
                .filter(|(i, t)| !t.is_started() && !live[..*i].iter().any(|earlier| t.waits_for(earlier)))
                .map(|(_, t)| t.clone())
                .collect();
            ready
        };
        for txn in ready {
            txn.start();
        }
    }
}
