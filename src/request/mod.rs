//! Requests
//!
//! A request is one asynchronous operation and its outcome. It is created
//! pending, settled exactly once per execution (cursor requests are re-armed
//! and settled again for every step), and reports its outcome through
//! completion callbacks:
//! - `on_success(&Request)`
//! - `on_error(&Request, &DbError) -> ErrorDisposition`
//!
//! Returning [`ErrorDisposition::Handled`] from an error callback keeps the
//! failure local to the request; [`ErrorDisposition::Propagate`] (the
//! default when no callback is set) aborts the owning transaction.

mod result;

pub use result::RequestResult;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::connection::Database;
use crate::cursor::Cursor;
use crate::errors::{DbError, DbResult};
use crate::store::{Index, ObjectStore};
use crate::transaction::Transaction;

/// Whether a request has settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Pending,
    Done,
}

/// What an error callback decided about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The failure stays with the request; the transaction goes on
    Handled,
    /// The failure aborts the transaction
    Propagate,
}

/// Object a request was issued against
#[derive(Clone)]
pub enum RequestSource {
    /// Open and delete requests
    Factory,
    Store(ObjectStore),
    Index(Index),
    Cursor(Cursor),
}

impl fmt::Debug for RequestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestSource::Factory => f.write_str("Factory"),
            RequestSource::Store(store) => write!(f, "Store({})", store.name()),
            RequestSource::Index(index) => write!(f, "Index({})", index.name()),
            RequestSource::Cursor(_) => f.write_str("Cursor"),
        }
    }
}

/// Old and new version carried by version-change notifications.
///
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    pub old_version: u64,
    pub new_version: Option<u64>,
}

type SuccessHandler = Box<dyn FnMut(&Request)>;
type ErrorHandler = Box<dyn FnMut(&Request, &DbError) -> ErrorDisposition>;
type VersionHandler = Box<dyn FnMut(&Request, &VersionChangeEvent)>;

struct RequestInner {
    id: u64,
    source: RequestSource,
    ready_state: ReadyState,
    result: Option<RequestResult>,
    error: Option<DbError>,
    transaction: Option<Transaction>,
    on_success: Option<SuccessHandler>,
    on_error: Option<ErrorHandler>,
    on_upgrade_needed: Option<VersionHandler>,
    on_blocked: Option<VersionHandler>,
}

/// Handle to a request
#[derive(Clone)]
pub struct Request(Rc<RefCell<RequestInner>>);

impl Request {
    pub(crate) fn new(id: u64, source: RequestSource, transaction: Option<Transaction>) -> Self {
        Self(Rc::new(RefCell::new(RequestInner {
            id,
            source,
            ready_state: ReadyState::Pending,
            result: None,
            error: None,
            transaction,
            on_success: None,
            on_error: None,
            on_upgrade_needed: None,
            on_blocked: None,
        })))
    }

    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn source(&self) -> RequestSource {
        self.0.borrow().source.clone()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.0.borrow().ready_state
    }

    pub fn is_done(&self) -> bool {
        self.ready_state() == ReadyState::Done
    }

    /// Result of a settled request; `InvalidStateError` while pending.
    ///
    /// A failed request has the result `Undefined`.
    pub fn result(&self) -> DbResult<RequestResult> {
        let inner = self.0.borrow();
        match inner.ready_state {
            ReadyState::Pending => Err(DbError::invalid_state("the request has not finished")),
            ReadyState::Done => Ok(inner.result.clone().unwrap_or(RequestResult::Undefined)),
        }
    }

    /// Error of a settled request; `InvalidStateError` while pending
    pub fn error(&self) -> DbResult<Option<DbError>> {
        let inner = self.0.borrow();
        match inner.ready_state {
            ReadyState::Pending => Err(DbError::invalid_state("the request has not finished")),
            ReadyState::Done => Ok(inner.error.clone()),
        }
    }

    /// Owning transaction; open requests only have one during an upgrade
    pub fn transaction(&self) -> Option<Transaction> {
        self.0.borrow().transaction.clone()
    }

    pub fn set_on_success(&self, handler: impl FnMut(&Request) + 'static) {
        self.0.borrow_mut().on_success = Some(Box::new(handler));
    }

    pub fn set_on_error(&self, handler: impl FnMut(&Request, &DbError) -> ErrorDisposition + 'static) {
        self.0.borrow_mut().on_error = Some(Box::new(handler));
    }

    /// Called with the upgrade transaction active when an open request
    /// raises the version of a database
    pub fn set_on_upgrade_needed(&self, handler: impl FnMut(&Request, &VersionChangeEvent) + 'static) {
        self.0.borrow_mut().on_upgrade_needed = Some(Box::new(handler));
    }

    /// Called when an open or delete waits on other connections to close
    pub fn set_on_blocked(&self, handler: impl FnMut(&Request, &VersionChangeEvent) + 'static) {
        self.0.borrow_mut().on_blocked = Some(Box::new(handler));
    }

    /// Drop every callback
    pub fn clear_handlers(&self) {
        let mut inner = self.0.borrow_mut();
        inner.on_success = None;
        inner.on_error = None;
        inner.on_upgrade_needed = None;
        inner.on_blocked = None;
    }

    // Settlement

    pub(crate) fn set_transaction(&self, transaction: Option<Transaction>) {
        self.0.borrow_mut().transaction = transaction;
    }

    /// Return to pending before the request is executed again
    pub(crate) fn rearm(&self) {
        let mut inner = self.0.borrow_mut();
        inner.ready_state = ReadyState::Pending;
        inner.result = None;
        inner.error = None;
    }

    pub(crate) fn settle_success(&self, result: RequestResult) {
        let mut inner = self.0.borrow_mut();
        inner.ready_state = ReadyState::Done;
        inner.result = Some(result);
        inner.error = None;
    }

    pub(crate) fn settle_error(&self, error: DbError) {
        let mut inner = self.0.borrow_mut();
        inner.ready_state = ReadyState::Done;
        inner.result = None;
        inner.error = Some(error);
    }

    // Notification. Callbacks are taken out of the cell while they run so
    // they may use this request freely; a callback installed meanwhile wins.

    pub(crate) fn notify_success(&self) {
        let handler = self.0.borrow_mut().on_success.take();
        if let Some(mut handler) = handler {
            handler(self);
            let mut inner = self.0.borrow_mut();
            if inner.on_success.is_none() {
                inner.on_success = Some(handler);
            }
        }
    }

    pub(crate) fn notify_error(&self, error: &DbError) -> ErrorDisposition {
        let handler = self.0.borrow_mut().on_error.take();
        match handler {
            Some(mut handler) => {
                let disposition = handler(self, error);
                let mut inner = self.0.borrow_mut();
                if inner.on_error.is_none() {
                    inner.on_error = Some(handler);
                }
                disposition
            }
            None => ErrorDisposition::Propagate,
        }
    }

    pub(crate) fn notify_upgrade_needed(&self, event: &VersionChangeEvent) {
        let handler = self.0.borrow_mut().on_upgrade_needed.take();
        if let Some(mut handler) = handler {
            handler(self, event);
            let mut inner = self.0.borrow_mut();
            if inner.on_upgrade_needed.is_none() {
                inner.on_upgrade_needed = Some(handler);
            }
        }
    }

    pub(crate) fn notify_blocked(&self, event: &VersionChangeEvent) {
        let handler = self.0.borrow_mut().on_blocked.take();
        if let Some(mut handler) = handler {
            handler(self, event);
            let mut inner = self.0.borrow_mut();
            if inner.on_blocked.is_none() {
                inner.on_blocked = Some(handler);
            }
        }
    }

    /// Database produced by a settled open request
    pub fn database(&self) -> Option<Database> {
        match self.0.borrow().result.as_ref() {
            Some(RequestResult::Database(db)) => Some(db.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Request")
            .field("id", &inner.id)
            .field("source", &inner.source)
            .field("ready_state", &inner.ready_state)
            .field("error", &inner.error)
            .finish()
    }
}
