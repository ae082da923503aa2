//! Storage backend error types
//!
//! Error codes:
//! - AERO_BACKEND_CONSTRAINT
//! - AERO_BACKEND_NOT_FOUND
//! - AERO_BACKEND_VERSION
//! - AERO_BACKEND_READ_ONLY
//! - AERO_BACKEND_INVALID_HANDLE
//! - AERO_BACKEND_CONFLICT
//! - AERO_BACKEND_SERIALIZATION
//! - AERO_BACKEND_INTERNAL

use std::fmt;

/// Backend error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Duplicate primary key or unique index violation
    Constraint,
    /// Database, store or index does not exist
    NotFound,
    /// Version downgrade requested
    Version,
    /// Write issued through a read-only transaction
    ReadOnly,
    /// Unknown or already finished transaction handle
    InvalidHandle,
    /// Store changed underneath the transaction by another commit
    Conflict,
    /// Stored bytes could not be decoded
    Serialization,
    /// Anything else
    Internal,
}

impl BackendErrorKind {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            BackendErrorKind::Constraint => "AEROSTORE_BACKEND_CONSTRAINT",
            BackendErrorKind::NotFound => "AEROSTORE_BACKEND_NOT_FOUND",
            BackendErrorKind::Version => "AEROSTORE_BACKEND_VERSION",
            BackendErrorKind::ReadOnly => "AEROSTORE_BACKEND_READ_ONLY",
            BackendErrorKind::InvalidHandle => "AEROSTORE_BACKEND_INVALID_HANDLE",
            BackendErrorKind::Conflict => "AEROSTORE_BACKEND_CONFLICT",
            BackendErrorKind::Serialization => "AEROSTORE_BACKEND_SERIALIZATION",
            BackendErrorKind::Internal => "AEROSTORE_BACKEND_INTERNAL",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error raised by a storage backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Constraint, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn read_only(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ReadOnly, message)
    }

    pub fn invalid_handle(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::InvalidHandle, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Conflict, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Serialization, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Internal, message)
    }

    /// Returns the error kind
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for BackendError {}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::serialization(e.to_string())
    }
}

/// Result type for backend calls
pub type BackendResult<T> = Result<T, BackendError>;
