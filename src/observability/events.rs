//! Observable events
//!
//! Events are explicit and typed; each maps to a stable upper-case name.

use std::fmt;

use super::logger::Severity;

/// Observable coordinator events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Factory
    /// Configuration loaded
    ConfigLoaded,

    // Open queue
    /// Open request started processing
    OpenBegin,
    /// Connection handed to the application
    OpenComplete,
    /// Open request failed
    OpenFailed,
    /// Open or delete waits for other connections to close
    OpenBlocked,
    /// Version change transaction started
    UpgradeBegin,
    /// Database deleted
    DatabaseDeleted,
    /// Connection closed
    ConnectionClosed,

    // Transactions
    /// Transaction created
    TransactionBegin,
    /// Transaction committed
    TransactionCommit,
    /// Transaction aborted
    TransactionAbort,

    // Requests
    /// Request operation executed
    RequestExecuted,
    /// Request operation failed
    RequestFailed,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::OpenBegin => "OPEN_BEGIN",
            Event::OpenComplete => "OPEN_COMPLETE",
            Event::OpenFailed => "OPEN_FAILED",
            Event::OpenBlocked => "OPEN_BLOCKED",
            Event::UpgradeBegin => "UPGRADE_BEGIN",
            Event::DatabaseDeleted => "DATABASE_DELETED",
            Event::ConnectionClosed => "CONNECTION_CLOSED",
            Event::TransactionBegin => "TXN_BEGIN",
            Event::TransactionCommit => "TXN_COMMIT",
            Event::TransactionAbort => "TXN_ABORT",
            Event::RequestExecuted => "REQUEST_EXECUTED",
            Event::RequestFailed => "REQUEST_FAILED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::TransactionBegin | Event::RequestExecuted => Severity::Trace,
            Event::OpenFailed | Event::OpenBlocked | Event::TransactionAbort | Event::RequestFailed => {
                Severity::Warn
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
