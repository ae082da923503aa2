//! Key model
//!
//! - `Value`: application values
//! - `Key`: typed keys with a total order
//! - `KeyRange` / `Query`: intervals over keys
//! - `KeyPath`: deriving keys from values
//! - `KeyGenerator`: auto-increment counters

mod generator;
mod model;
mod path;
mod range;
mod value;

pub use generator::{KeyGenerator, MAX_GENERATED_KEY};
pub use model::{compare, multi_entry_key, to_key, Key, KeyKind};
pub use path::{Extracted, KeyPath};
pub use range::{KeyRange, Query};
pub use value::Value;

pub(crate) use range::range_of;
