//! Observability for the coordinator
//!
//! JSON line logging, typed lifecycle events, begin/outcome scopes and
//! monotonic counters. Nothing here feeds back into scheduling.
//!
//! ```ignore
//! log_event_with_fields(Event::TransactionAbort, &[("db", "library"), ("txn", "4")]);
//! runtime.metrics().increment_transactions_aborted();
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
