//! Transaction states, modes and durability hints

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a transaction
///
/// ```text
/// Active <-> Inactive -> Committing -> Finished
///    \__________\_____________________/ (abort)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Requests may be enqueued
    Active,
    /// Waiting for requests to settle; enqueueing is rejected
    Inactive,
    /// Commit requested; remaining requests drain, then the backend commits
    Committing,
    /// Committed or aborted
    Finished,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Active => "active",
            TransactionState::Inactive => "inactive",
            TransactionState::Committing => "committing",
            TransactionState::Finished => "finished",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Access mode of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    #[serde(rename = "readonly")]
    ReadOnly,
    #[serde(rename = "readwrite")]
    ReadWrite,
    /// Only created internally while upgrading a database
    #[serde(rename = "versionchange")]
    VersionChange,
}

impl TransactionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::ReadOnly => "readonly",
            TransactionMode::ReadWrite => "readwrite",
            TransactionMode::VersionChange => "versionchange",
        }
    }

    /// Returns true if records may be written
    pub fn is_writable(&self) -> bool {
        !matches!(self, TransactionMode::ReadOnly)
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(TransactionMode::ReadOnly),
            "readwrite" => Ok(TransactionMode::ReadWrite),
            "versionchange" => Ok(TransactionMode::VersionChange),
            other => Err(format!("unknown transaction mode '{}'", other)),
        }
    }
}

/// Durability hint forwarded to the backend on commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    #[default]
    Default,
    Strict,
    Relaxed,
}

impl Durability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Durability::Default => "default",
            Durability::Strict => "strict",
            Durability::Relaxed => "relaxed",
        }
    }
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("readwrite".parse::<TransactionMode>().unwrap(), TransactionMode::ReadWrite);
        assert_eq!(TransactionMode::ReadOnly.to_string(), "readonly");
        assert!("write".parse::<TransactionMode>().is_err());
    }

    #[test]
    fn test_only_read_only_is_not_writable() {
        assert!(!TransactionMode::ReadOnly.is_writable());
        assert!(TransactionMode::ReadWrite.is_writable());
        assert!(TransactionMode::VersionChange.is_writable());
    }

    #[test]
    fn test_durability_serde() {
        let d: Durability = serde_json::from_str("\"relaxed\"").unwrap();
        assert_eq!(d, Durability::Relaxed);
        assert_eq!(serde_json::to_string(&Durability::default()).unwrap(), "\"default\"");
    }
}
