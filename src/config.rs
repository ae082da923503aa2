//! Factory configuration
//!
//! Loaded from a JSON file; every field has a default so `{}` is a valid
//! configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Severity;
use crate::transaction::Durability;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Minimum log severity (trace, info, warn, error, fatal)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Durability used when a transaction does not ask for one
    #[serde(default)]
    pub default_durability: Durability,

    /// Log every executed request at TRACE
    #[serde(default)]
    pub trace_requests: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            default_durability: Durability::default(),
            trace_requests: false,
        }
    }
}

impl FactoryConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: FactoryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.severity().map(|_| ())
    }

    /// Parsed `log_level`
    pub fn severity(&self) -> Result<Severity, ConfigError> {
        self.log_level.parse::<Severity>().map_err(ConfigError::Invalid)
    }
}
