//! Transactions
//!
//! A transaction owns a scope of object stores, a mode and a FIFO queue of
//! in-flight requests, and drives the commit/abort protocol:
//!
//! - Created `Active`; a task scheduled at creation makes it `Inactive`
//!   once the creating task is over.
//! - Each completion callback runs with the transaction `Active`, so the
//!   callback can enqueue follow-up requests, and returns it to `Inactive`
//!   afterwards unless the callback finished it.
//! - When the queue empties while `Inactive`, commit starts by itself.
//!   A follow-up enqueued from a callback keeps the queue non-empty and so
//!   defers the commit.
//! - An operation failure that no error callback handles aborts the whole
//!   transaction: the backend discards its effects and every request still
//!   queued settles with `AbortError`.
//! - A transaction whose scope overlaps an unfinished earlier one on the
//!   same database, where either side writes, holds its requests until
//!   that earlier transaction finishes. Writers therefore reach the
//!   backend in creation order.

mod state;

pub use state::{Durability, TransactionMode, TransactionState};

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use crate::backend::TransactionHandle;
use crate::connection::Database;
use crate::cursor::Cursor;
use crate::errors::{DbError, DbResult};
use crate::observability::{log_event_with_fields, Event, Logger, ObservationScope};
use crate::request::{ErrorDisposition, Request, RequestResult, RequestSource};
use crate::runtime::Runtime;
use crate::store::ObjectStore;

/// Deferred request body, run against the transaction when its turn comes
pub(crate) type Operation = Box<dyn FnOnce(&Transaction) -> DbResult<RequestResult>>;

type TransactionHandler = Box<dyn FnMut(&Transaction)>;
type TransactionErrorHandler = Box<dyn FnMut(&Transaction, &DbError)>;
type FinishHook = Box<dyn FnOnce(&Transaction, bool)>;

/// Options accepted by `Database::transaction`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// `None` uses the factory's configured default
    pub durability: Option<Durability>,
}

struct TransactionInner {
    id: u64,
    runtime: Rc<Runtime>,
    handle: TransactionHandle,
    mode: TransactionMode,
    durability: Durability,
    scope: BTreeSet<String>,
    state: TransactionState,
    /// Cleared while an overlapping earlier transaction is unfinished
    started: bool,
    /// Operations enqueued before the transaction started
    held: Vec<(u64, Operation)>,
    queue: VecDeque<(u64, Request)>,
    next_ticket: u64,
    error: Option<DbError>,
    database: Database,
    /// Version to restore if an upgrade aborts
    upgrade_from: Option<u64>,
    stores: Vec<ObjectStore>,
    cursors: Vec<Cursor>,
    on_complete: Option<TransactionHandler>,
    on_abort: Option<TransactionHandler>,
    on_error: Option<TransactionErrorHandler>,
    finish_hooks: Vec<FinishHook>,
}

/// Handle to a transaction
#[derive(Clone)]
pub struct Transaction(Rc<RefCell<TransactionInner>>);

impl Transaction {
    /// Create a transaction on the backend and schedule its deactivation
    pub(crate) fn begin(
        runtime: &Rc<Runtime>,
        database: &Database,
        scope: BTreeSet<String>,
        mode: TransactionMode,
        durability: Durability,
    ) -> DbResult<Transaction> {
        let handle = runtime
            .backend()
            .transaction_create(&database.name(), mode, durability)?;
        let id = runtime.next_id();
        let started = !runtime.must_wait(&database.name(), &scope, mode);

        let txn = Transaction(Rc::new(RefCell::new(TransactionInner {
            id,
            runtime: Rc::clone(runtime),
            handle,
            mode,
            durability,
            scope,
            state: TransactionState::Active,
            started,
            held: Vec::new(),
            queue: VecDeque::new(),
            next_ticket: 0,
            error: None,
            database: database.clone(),
            upgrade_from: None,
            stores: Vec::new(),
            cursors: Vec::new(),
            on_complete: None,
            on_abort: None,
            on_error: None,
            finish_hooks: Vec::new(),
        })));

        database.transaction_started();
        runtime.register_transaction(&txn);
        runtime.metrics().increment_transactions_started();
        log_event_with_fields(
            Event::TransactionBegin,
            &[
                ("db", database.name().as_str()),
                ("backend_txn", handle.as_uuid().to_string().as_str()),
                ("mode", mode.as_str()),
                ("txn", id.to_string().as_str()),
            ],
        );

        let deactivate = txn.clone();
        runtime.schedule(move || deactivate.deactivate());
        Ok(txn)
    }

    // Accessors

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn mode(&self) -> TransactionMode {
        self.0.borrow().mode
    }

    pub fn durability(&self) -> Durability {
        self.0.borrow().durability
    }

    pub fn state(&self) -> TransactionState {
        self.0.borrow().state
    }

    /// Error that aborted the transaction; `None` for an explicit abort
    pub fn error(&self) -> Option<DbError> {
        self.0.borrow().error.clone()
    }

    pub fn database(&self) -> Database {
        self.0.borrow().database.clone()
    }

    /// Names of the stores in scope, sorted
    pub fn object_store_names(&self) -> Vec<String> {
        let inner = self.0.borrow();
        match inner.mode {
            TransactionMode::VersionChange => inner.database.object_store_names(),
            _ => inner.scope.iter().cloned().collect(),
        }
    }

    /// Number of requests queued and not yet settled
    pub fn pending_requests(&self) -> usize {
        self.0.borrow().queue.len()
    }

    pub fn set_on_complete(&self, handler: impl FnMut(&Transaction) + 'static) {
        self.0.borrow_mut().on_complete = Some(Box::new(handler));
    }

    pub fn set_on_abort(&self, handler: impl FnMut(&Transaction) + 'static) {
        self.0.borrow_mut().on_abort = Some(Box::new(handler));
    }

    /// Called when a request failure escalates to this transaction
    pub fn set_on_error(&self, handler: impl FnMut(&Transaction, &DbError) + 'static) {
        self.0.borrow_mut().on_error = Some(Box::new(handler));
    }

    // Public operations

    /// Handle for a store in scope; the same handle is returned every time
    pub fn object_store(&self, name: &str) -> DbResult<ObjectStore> {
        let (state, in_scope, cached) = {
            let inner = self.0.borrow();
            let in_scope = match inner.mode {
                TransactionMode::VersionChange => inner.database.has_store(name),
                _ => inner.scope.contains(name),
            };
            let cached = inner.stores.iter().find(|s| s.name() == name).cloned();
            (inner.state, in_scope, cached)
        };

        if state == TransactionState::Finished {
            return Err(DbError::invalid_state("the transaction has finished"));
        }
        if !in_scope {
            return Err(DbError::not_found(format!(
                "object store '{}' is not in the transaction scope",
                name
            )));
        }
        if let Some(store) = cached {
            return Ok(store);
        }

        let store = ObjectStore::new(self.clone(), name);
        self.0.borrow_mut().stores.push(store.clone());
        Ok(store)
    }

    /// Commit once every queued request has settled
    pub fn commit(&self) -> DbResult<()> {
        let empty = {
            let mut inner = self.0.borrow_mut();
            if inner.state != TransactionState::Active {
                return Err(DbError::invalid_state(format!(
                    "cannot commit a transaction that is {}",
                    inner.state
                )));
            }
            inner.state = TransactionState::Committing;
            inner.started && inner.queue.is_empty()
        };
        if empty {
            self.schedule_commit();
        }
        Ok(())
    }

    /// Abort, discarding every effect of this transaction
    pub fn abort(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Committing | TransactionState::Finished => Err(DbError::invalid_state(
                "the transaction is committing or has finished",
            )),
            TransactionState::Active | TransactionState::Inactive => {
                self.abort_with(None, false);
                Ok(())
            }
        }
    }

    // Crate-internal surface

    pub(crate) fn runtime(&self) -> Rc<Runtime> {
        Rc::clone(&self.0.borrow().runtime)
    }

    pub(crate) fn handle(&self) -> TransactionHandle {
        self.0.borrow().handle
    }

    pub(crate) fn database_name(&self) -> String {
        self.0.borrow().database.name()
    }

    pub(crate) fn ensure_active(&self) -> DbResult<()> {
        match self.state() {
            TransactionState::Active => Ok(()),
            other => Err(DbError::transaction_inactive(format!(
                "the transaction is {}",
                other
            ))),
        }
    }

    pub(crate) fn ensure_writable(&self) -> DbResult<()> {
        if self.mode().is_writable() {
            Ok(())
        } else {
            Err(DbError::read_only("the transaction is read-only"))
        }
    }

    pub(crate) fn ensure_upgrade(&self) -> DbResult<()> {
        if self.mode() == TransactionMode::VersionChange {
            Ok(())
        } else {
            Err(DbError::invalid_state("only allowed in a version change transaction"))
        }
    }

    pub(crate) fn new_request(&self, source: RequestSource) -> Request {
        let id = self.0.borrow().runtime.next_id();
        Request::new(id, source, Some(self.clone()))
    }

    /// Queue `operation` for execution behind every earlier request
    pub(crate) fn enqueue(&self, request: Request, operation: Operation) -> DbResult<Request> {
        self.ensure_active()?;
        let (ticket, runtime) = {
            let mut inner = self.0.borrow_mut();
            inner.next_ticket += 1;
            let ticket = inner.next_ticket;
            inner.queue.push_back((ticket, request.clone()));
            if !inner.started {
                inner.held.push((ticket, operation));
                return Ok(request);
            }
            (ticket, Rc::clone(&inner.runtime))
        };

        let txn = self.clone();
        runtime.schedule(move || txn.execute(ticket, operation));
        Ok(request)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.0.borrow().started
    }

    /// Release the requests held while an overlapping transaction ran
    pub(crate) fn start(&self) {
        let (held, runtime) = {
            let mut inner = self.0.borrow_mut();
            inner.started = true;
            (std::mem::take(&mut inner.held), Rc::clone(&inner.runtime))
        };
        for (ticket, operation) in held {
            let txn = self.clone();
            runtime.schedule(move || txn.execute(ticket, operation));
        }
        self.maybe_commit();
    }

    /// Whether a new transaction over `scope` on `db` has to wait for this one
    pub(crate) fn holds_back(&self, db: &str, scope: &BTreeSet<String>, mode: TransactionMode) -> bool {
        if mode == TransactionMode::VersionChange || self.database_name() != db {
            return false;
        }
        let inner = self.0.borrow();
        if inner.state == TransactionState::Finished {
            return false;
        }
        if !inner.mode.is_writable() && !mode.is_writable() {
            return false;
        }
        inner.mode == TransactionMode::VersionChange || !inner.scope.is_disjoint(scope)
    }

    /// Whether this transaction has to wait for `earlier`
    pub(crate) fn waits_for(&self, earlier: &Transaction) -> bool {
        let (scope, mode) = {
            let inner = self.0.borrow();
            (inner.scope.clone(), inner.mode)
        };
        earlier.holds_back(&self.database_name(), &scope, mode)
    }

    pub(crate) fn register_cursor(&self, cursor: Cursor) {
        self.0.borrow_mut().cursors.push(cursor);
    }

    /// Invalidate the cached handle of a store deleted by this transaction
    pub(crate) fn forget_store(&self, name: &str) {
        let removed: Vec<ObjectStore> = {
            let mut inner = self.0.borrow_mut();
            let (removed, kept) = std::mem::take(&mut inner.stores)
                .into_iter()
                .partition(|s| s.name() == name);
            inner.stores = kept;
            removed
        };
        for store in removed {
            store.mark_deleted();
        }
    }

    pub(crate) fn add_to_scope(&self, name: &str) {
        self.0.borrow_mut().scope.insert(name.to_string());
    }

    pub(crate) fn set_upgrade_from(&self, version: u64) {
        self.0.borrow_mut().upgrade_from = Some(version);
    }

    /// Run `hook` after the transaction finishes; the flag says whether it committed
    pub(crate) fn on_finish(&self, hook: impl FnOnce(&Transaction, bool) + 'static) {
        self.0.borrow_mut().finish_hooks.push(Box::new(hook));
    }

    pub(crate) fn ptr_eq(&self, other: &Transaction) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    // Lifecycle

    fn set_state(&self, state: TransactionState) {
        self.0.borrow_mut().state = state;
    }

    fn log_fields(&self) -> (String, String) {
        let inner = self.0.borrow();
        (inner.id.to_string(), inner.database.name())
    }

    /// End of the creating task
    fn deactivate(&self) {
        if self.state() == TransactionState::Active {
            self.set_state(TransactionState::Inactive);
            self.maybe_commit();
        }
    }

    /// Run `f` with the transaction active if it was inactive
    fn with_active<R>(&self, f: impl FnOnce() -> R) -> R {
        let reactivate = self.state() == TransactionState::Inactive;
        if reactivate {
            self.set_state(TransactionState::Active);
        }
        let outcome = f();
        if reactivate && self.state() == TransactionState::Active {
            self.set_state(TransactionState::Inactive);
        }
        outcome
    }

    fn queued(&self, ticket: u64) -> Option<Request> {
        self.0
            .borrow()
            .queue
            .iter()
            .find(|(t, _)| *t == ticket)
            .map(|(_, r)| r.clone())
    }

    fn dequeue(&self, ticket: u64) {
        self.0.borrow_mut().queue.retain(|(t, _)| *t != ticket);
    }

    fn execute(&self, ticket: u64, operation: Operation) {
        // An abort already settled the request
        let Some(request) = self.queued(ticket) else {
            return;
        };
        if self.state() == TransactionState::Finished {
            return;
        }

        let runtime = self.runtime();
        match operation(self) {
            Ok(result) => {
                runtime.metrics().increment_requests_executed();
                if runtime.config().trace_requests {
                    let (txn, db) = self.log_fields();
                    log_event_with_fields(
                        Event::RequestExecuted,
                        &[
                            ("db", db.as_str()),
                            ("request", request.id().to_string().as_str()),
                            ("txn", txn.as_str()),
                        ],
                    );
                }
                // Settled requests leave the queue before their callback
                // runs, so an abort from the callback leaves them alone
                self.dequeue(ticket);
                request.settle_success(result);
                self.with_active(|| request.notify_success());
            }
            Err(error) => {
                runtime.metrics().increment_requests_failed();
                let (txn, db) = self.log_fields();
                log_event_with_fields(
                    Event::RequestFailed,
                    &[
                        ("db", db.as_str()),
                        ("error", error.name()),
                        ("message", error.message()),
                        ("txn", txn.as_str()),
                    ],
                );

                // Past commit() nobody can handle the failure
                if self.state() == TransactionState::Committing {
                    self.dequeue(ticket);
                    request.settle_error(error.clone());
                    self.abort_with(Some(error), false);
                    return;
                }

                self.dequeue(ticket);
                request.settle_error(error.clone());
                let disposition = self.with_active(|| request.notify_error(&error));
                if disposition == ErrorDisposition::Propagate
                    && self.state() != TransactionState::Finished
                {
                    self.notify_error(&error);
                    self.abort_with(Some(error), false);
                    return;
                }
            }
        }

        self.maybe_commit();
    }

    /// Start or finish committing once the queue is empty
    fn maybe_commit(&self) {
        let (state, empty) = {
            let inner = self.0.borrow();
            if !inner.started {
                return;
            }
            (inner.state, inner.queue.is_empty())
        };
        match state {
            TransactionState::Inactive if empty => {
                self.set_state(TransactionState::Committing);
                self.schedule_commit();
            }
            TransactionState::Committing if empty => self.schedule_commit(),
            _ => {}
        }
    }

    fn schedule_commit(&self) {
        let txn = self.clone();
        self.runtime().schedule(move || txn.finalize_commit());
    }

    fn finalize_commit(&self) {
        let (handle, runtime) = {
            let inner = self.0.borrow();
            if inner.state != TransactionState::Committing || !inner.queue.is_empty() {
                return;
            }
            (inner.handle, Rc::clone(&inner.runtime))
        };

        let (txn_id, db) = self.log_fields();
        let scope = ObservationScope::begin(
            Event::TransactionCommit,
            &[("db", db.as_str()), ("txn", txn_id.as_str())],
        );
        let outcome = runtime.backend().transaction_commit(handle);
        match outcome {
            Ok(()) => {
                scope.complete();
                self.set_state(TransactionState::Finished);
                runtime.metrics().increment_transactions_committed();

                let handler = self.0.borrow_mut().on_complete.take();
                if let Some(mut handler) = handler {
                    handler(self);
                }
                self.finish(true);
            }
            Err(e) => {
                scope.fail(e.message());
                self.abort_with(Some(e.into()), true);
            }
        }
    }

    fn notify_error(&self, error: &DbError) {
        let handler = self.0.borrow_mut().on_error.take();
        if let Some(mut handler) = handler {
            handler(self, error);
            let mut inner = self.0.borrow_mut();
            if inner.on_error.is_none() {
                inner.on_error = Some(handler);
            }
        }
    }

    /// Abort procedure. `backend_released` is set when the backend already
    /// dropped the transaction (a failed commit).
    pub(crate) fn abort_with(&self, error: Option<DbError>, backend_released: bool) {
        let (handle, runtime, pending, upgrade_from, database) = {
            let mut inner = self.0.borrow_mut();
            if inner.state == TransactionState::Finished {
                return;
            }
            if error.is_some() {
                inner.error = error;
            }
            inner.state = TransactionState::Inactive;
            let pending: Vec<Request> = inner.queue.drain(..).map(|(_, r)| r).collect();
            (
                inner.handle,
                Rc::clone(&inner.runtime),
                pending,
                inner.upgrade_from,
                inner.database.clone(),
            )
        };

        if !backend_released {
            let outcome = runtime.backend().transaction_abort(handle);
            if let Err(e) = outcome {
                Logger::warn("TXN_BACKEND_ABORT_FAILED", &[("reason", e.message())]);
            }
        }

        let aborted = DbError::aborted();
        for request in pending.into_iter().filter(|r| !r.is_done()) {
            request.settle_error(aborted.clone());
            request.notify_error(&aborted);
        }

        self.set_state(TransactionState::Finished);
        runtime.metrics().increment_transactions_aborted();
        let (txn_id, db) = self.log_fields();
        let reason = self.error().map(|e| e.name()).unwrap_or("explicit");
        log_event_with_fields(
            Event::TransactionAbort,
            &[("db", db.as_str()), ("reason", reason), ("txn", txn_id.as_str())],
        );

        if let Some(version) = upgrade_from {
            database.revert_upgrade(version);
        }

        let handler = self.0.borrow_mut().on_abort.take();
        if let Some(mut handler) = handler {
            handler(self);
        }
        self.finish(false);
    }

    /// Release everything a finished transaction holds
    fn finish(&self, committed: bool) {
        let (hooks, database, stores, cursors, runtime) = {
            let mut inner = self.0.borrow_mut();
            inner.on_complete = None;
            inner.on_abort = None;
            inner.on_error = None;
            inner.held.clear();
            (
                std::mem::take(&mut inner.finish_hooks),
                inner.database.clone(),
                std::mem::take(&mut inner.stores),
                std::mem::take(&mut inner.cursors),
                Rc::clone(&inner.runtime),
            )
        };

        for cursor in cursors {
            cursor.detach();
        }
        for store in stores {
            store.release_indexes();
        }
        database.transaction_finished(self);
        runtime.transaction_finished(self);
        for hook in hooks {
            hook(self, committed);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Transaction")
            .field("id", &inner.id)
            .field("mode", &inner.mode)
            .field("state", &inner.state)
            .field("scope", &inner.scope)
            .field("pending", &inner.queue.len())
            .finish()
    }
}
