//! Key generator for auto-increment object stores
//!
//! - Starts at 1
//! - `generate_key` hands out the current value and advances
//! - `possibly_update` raises the floor past caller-supplied numeric keys
//! - `current` never decreases
//! - Ceiling is 2^53; generating past it is a `ConstraintError`

use super::model::Key;
use crate::errors::{DbError, DbResult};

/// Largest integer exactly representable as an f64
pub const MAX_GENERATED_KEY: u64 = 1 << 53;

/// Per-store monotonic key counter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyGenerator {
    current: u64,
}

impl KeyGenerator {
    /// Create a generator starting at 1
    pub fn new() -> Self {
        Self { current: 1 }
    }

    /// Next key that would be generated
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Generate a key.
    ///
    /// Fails once every key up to the ceiling has been issued; the counter
    /// is left unchanged in that case.
    pub fn generate_key(&mut self) -> DbResult<u64> {
        if self.current > MAX_GENERATED_KEY {
            return Err(DbError::constraint("key generator has reached its maximum value"));
        }
        let key = self.current;
        self.current += 1;
        Ok(key)
    }

    /// Observe an explicitly supplied key.
    ///
    /// Only number keys move the generator; fractional keys are floored and
    /// keys past the ceiling exhaust it.
    pub fn possibly_update(&mut self, key: &Key) {
        let Some(n) = key.as_number() else {
            return;
        };
        let value = n.min(MAX_GENERATED_KEY as f64).floor();
        if value < self.current as f64 {
            return;
        }
        self.current = value as u64 + 1;
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
