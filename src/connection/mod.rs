//! Connections and the open queue
//!
//! Open and delete requests for one database name run strictly one after
//! another. An open that asks for a higher version than the stored one
//! first notifies every other connection, waits for them to close, then
//! runs a version change transaction; the open request succeeds only
//! after that transaction commits.

mod database;
mod factory;

pub use database::{Database, WeakDatabase};
pub use factory::Factory;
