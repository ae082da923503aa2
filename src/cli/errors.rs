//! CLI errors
//!
//! A `CliError` ends the process with a stable code. Failures of single
//! script steps are results, not CLI errors.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::errors::DbError;

/// What went wrong, as reported in the `code` field of the error line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file missing or invalid
    Config,
    /// Reading a file or writing output failed
    Io,
    /// Script or argument is not valid JSON of the expected shape
    Script,
    /// The coordinator refused an operation outside a script step
    Store,
}

impl CliErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "AEROSTORE_CLI_CONFIG_ERROR",
            Self::Io => "AEROSTORE_CLI_IO_ERROR",
            Self::Script => "AEROSTORE_CLI_SCRIPT_ERROR",
            Self::Store => "AEROSTORE_CLI_STORE_ERROR",
        }
    }
}

#[derive(Debug, Error)]
#[error("{}: {message}", .code.as_str())]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn script_error(message: impl Into<String>) -> Self {
        Self::new(CliErrorCode::Script, message)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::new(CliErrorCode::Io, e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(CliErrorCode::Io, format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::new(CliErrorCode::Config, e.to_string())
    }
}

impl From<DbError> for CliError {
    fn from(e: DbError) -> Self {
        Self::new(CliErrorCode::Store, e.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;
