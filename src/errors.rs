//! Error taxonomy for the object-store coordinator
//!
//! Every error carries an [`ErrorKind`] and a human-readable message; kind
//! names are the familiar exception names (`DataError`, `AbortError`, ...).
//!
//! Propagation rules:
//! - Validation errors are returned synchronously from the API call and
//!   leave no side effects behind.
//! - Operation errors are delivered through the failing request's error
//!   handler and, unless handled, abort the whole transaction.

use thiserror::Error;

use crate::backend::{BackendError, BackendErrorKind};

/// Result type used throughout the crate
pub type DbResult<T> = Result<T, DbError>;

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A value cannot be converted to a key where one is required
    InvalidKey,
    /// Range lower bound is greater than its upper bound
    RangeInvalid,
    /// Operation issued while the transaction is not active
    TransactionInactive,
    /// Mutation attempted in a read-only transaction
    ReadOnly,
    /// Operation on a finished or wrong-state object
    InvalidState,
    /// Referenced store, index or database is absent
    NotFound,
    /// Key generator exhausted, duplicate key or uniqueness violation
    Constraint,
    /// Delivered to in-flight requests after an abort
    Abort,
    /// Key or key path mismatch
    Data,
    /// Requested version is lower than the stored version
    Version,
    /// Invalid combination of parameters
    InvalidAccess,
    /// Malformed key path
    Syntax,
    /// Argument outside its allowed domain
    Type,
    /// Unclassified backend failure
    Unknown,
}

impl ErrorKind {
    /// Returns the exception name for this kind
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidKey => "InvalidKey",
            ErrorKind::RangeInvalid => "RangeInvalid",
            ErrorKind::TransactionInactive => "TransactionInactiveError",
            ErrorKind::ReadOnly => "ReadOnlyError",
            ErrorKind::InvalidState => "InvalidStateError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::Abort => "AbortError",
            ErrorKind::Data => "DataError",
            ErrorKind::Version => "VersionError",
            ErrorKind::InvalidAccess => "InvalidAccessError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Unknown => "UnknownError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Coordinator error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DbError {
    kind: ErrorKind,
    message: String,
}

impl DbError {
    /// Create an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidKey, message)
    }

    pub fn range_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RangeInvalid, message)
    }

    pub fn transaction_inactive(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransactionInactive, message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReadOnly, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }

    /// The error delivered to requests still pending when their transaction aborts
    pub fn aborted() -> Self {
        Self::new(ErrorKind::Abort, "the transaction was aborted")
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Data, message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Version, message)
    }

    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidAccess, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// Returns the error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the exception name
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BackendError> for DbError {
    fn from(e: BackendError) -> Self {
        let kind = match e.kind() {
            BackendErrorKind::Constraint => ErrorKind::Constraint,
            BackendErrorKind::NotFound => ErrorKind::NotFound,
            BackendErrorKind::Version => ErrorKind::Version,
            BackendErrorKind::ReadOnly => ErrorKind::ReadOnly,
            BackendErrorKind::InvalidHandle => ErrorKind::InvalidState,
            BackendErrorKind::Conflict => ErrorKind::Unknown,
            BackendErrorKind::Serialization => ErrorKind::Data,
            BackendErrorKind::Internal => ErrorKind::Unknown,
        };
        DbError::new(kind, e.message())
    }
}
