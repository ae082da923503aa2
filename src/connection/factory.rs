use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use super::database::Database;
use crate::backend::{DatabaseInfo, MemoryBackend, StorageBackend};
use crate::config::FactoryConfig;
use crate::errors::{DbError, DbResult};
use crate::key::{compare, to_key, Value};
use crate::observability::{log_event_with_fields, Event, Logger, MetricsSnapshot};
use crate::request::{Request, RequestResult, RequestSource, VersionChangeEvent};
use crate::runtime::Runtime;
use crate::transaction::{Transaction, TransactionMode};

/// Entry point: opens and deletes databases and drives the event loop.
///
/// Nothing runs until the embedder calls [`Factory::run_until_idle`];
/// every request created by a call settles inside that loop.
pub struct Factory {
    runtime: Rc<Runtime>,
}

impl Factory {
    pub fn new(backend: impl StorageBackend + 'static, config: FactoryConfig) -> Self {
        Self::with_shared_backend(Rc::new(RefCell::new(backend)), config)
    }

    /// Factory over a backend that other factories may use too
    pub fn with_shared_backend(backend: Rc<RefCell<dyn StorageBackend>>, config: FactoryConfig) -> Self {
        if let Ok(severity) = config.severity() {
            Logger::set_min_severity(severity);
        }
        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("default_durability", config.default_durability.as_str()),
                ("log_level", config.log_level.as_str()),
            ],
        );
        Self {
            runtime: Runtime::new(backend, config),
        }
    }

    /// Factory over a fresh [`MemoryBackend`] with default configuration
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new(), FactoryConfig::default())
    }

    pub fn config(&self) -> &FactoryConfig {
        self.runtime.config()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.runtime.metrics().snapshot()
    }

    /// Run queued tasks until none is left; returns how many ran
    pub fn run_until_idle(&self) -> u64 {
        self.runtime.event_loop().run_until_idle()
    }

    /// Open a connection, upgrading first when `version` is above the stored one.
    ///
    /// `None` opens the current version, or version 1 for a new database.
    pub fn open(&self, name: &str, version: Option<u64>) -> DbResult<Request> {
        if version == Some(0) {
            return Err(DbError::type_error("the version must be at least 1"));
        }
        let request = Request::new(self.runtime.next_id(), RequestSource::Factory, None);
        let runtime = Rc::clone(&self.runtime);
        let pending = request.clone();
        let db_name = name.to_string();
        self.runtime
            .enqueue_open(name, move || start_open(runtime, db_name, version, pending));
        Ok(request)
    }

    /// Delete a database once every connection to it has closed
    pub fn delete_database(&self, name: &str) -> DbResult<Request> {
        let request = Request::new(self.runtime.next_id(), RequestSource::Factory, None);
        let runtime = Rc::clone(&self.runtime);
        let pending = request.clone();
        let db_name = name.to_string();
        self.runtime
            .enqueue_open(name, move || start_delete(runtime, db_name, pending));
        Ok(request)
    }

    /// Databases with a committed version
    pub fn databases(&self) -> DbResult<Vec<DatabaseInfo>> {
        Ok(self.runtime.backend_ref().list_databases()?)
    }

    /// Compare two values as keys: -1, 0 or 1
    pub fn cmp(&self, a: &Value, b: &Value) -> DbResult<i32> {
        let (a, b) = (to_key(a)?, to_key(b)?);
        Ok(compare(&a, &b) as i32)
    }
}

// Open

fn start_open(runtime: Rc<Runtime>, name: String, requested: Option<u64>, request: Request) {
    let requested_str = requested.map_or_else(|| "none".to_string(), |v| v.to_string());
    log_event_with_fields(
        Event::OpenBegin,
        &[("db", name.as_str()), ("version", requested_str.as_str())],
    );

    let opened = runtime.backend().open_database(&name, requested);
    let (assigned, stored) = match opened {
        Ok(versions) => versions,
        Err(e) => return fail_open(&runtime, &name, &request, e.into()),
    };
    if assigned < stored {
        let error = DbError::version(format!(
            "requested version {} is lower than the stored version {}",
            assigned, stored
        ));
        return fail_open(&runtime, &name, &request, error);
    }

    if assigned == stored {
        match Database::connect(&runtime, &name, stored) {
            Ok(db) => {
                log_open_complete(&name, stored);
                request.settle_success(RequestResult::Database(db));
                request.notify_success();
                runtime.release_open(&name);
            }
            Err(e) => fail_open(&runtime, &name, &request, e),
        }
        return;
    }

    let event = VersionChangeEvent {
        old_version: stored,
        new_version: Some(assigned),
    };
    let resume_runtime = Rc::clone(&runtime);
    let resume_name = name.clone();
    let resume_request = request.clone();
    wait_for_others(&runtime, &name, &request, &event, move || {
        start_upgrade(resume_runtime, resume_name, stored, assigned, resume_request)
    });
}

/// Tell the other connections about the version change, report `blocked`
/// if any stays open, and run `resume` once all of them are closed
fn wait_for_others(
    runtime: &Runtime,
    name: &str,
    request: &Request,
    event: &VersionChangeEvent,
    resume: impl FnOnce() + 'static,
) {
    for db in runtime.connections_to(name) {
        if !db.is_close_pending() {
            db.notify_version_change(event);
        }
    }
    if !runtime.connections_to(name).is_empty() {
        let old = event.old_version.to_string();
        log_event_with_fields(
            Event::OpenBlocked,
            &[("db", name), ("old_version", old.as_str())],
        );
        request.notify_blocked(event);
    }
    runtime.wait_for_close(name, resume);
}

fn start_upgrade(runtime: Rc<Runtime>, name: String, stored: u64, assigned: u64, request: Request) {
    let db = match Database::connect(&runtime, &name, stored) {
        Ok(db) => db,
        Err(e) => return fail_open(&runtime, &name, &request, e),
    };
    let durability = runtime.config().default_durability;
    let txn = match Transaction::begin(&runtime, &db, BTreeSet::new(), TransactionMode::VersionChange, durability) {
        Ok(txn) => txn,
        Err(e) => {
            db.close();
            return fail_open(&runtime, &name, &request, e);
        }
    };

    let (from, to) = (stored.to_string(), assigned.to_string());
    log_event_with_fields(
        Event::UpgradeBegin,
        &[("db", name.as_str()), ("from", from.as_str()), ("to", to.as_str())],
    );
    runtime.metrics().increment_upgrades();

    db.begin_upgrade(&txn, assigned);
    txn.set_upgrade_from(stored);
    request.set_transaction(Some(txn.clone()));
    request.settle_success(RequestResult::Database(db.clone()));

    let finish_runtime = Rc::clone(&runtime);
    let finish_request = request.clone();
    let finish_db = db.clone();
    txn.on_finish(move |_, committed| {
        finish_upgrade(&finish_runtime, &name, &finish_request, &finish_db, assigned, committed)
    });

    let versioned = runtime.backend().set_version(txn.handle(), assigned);
    match versioned {
        Ok(()) => request.notify_upgrade_needed(&VersionChangeEvent {
            old_version: stored,
            new_version: Some(assigned),
        }),
        Err(e) => txn.abort_with(Some(e.into()), false),
    }
}

fn finish_upgrade(
    runtime: &Runtime,
    name: &str,
    request: &Request,
    db: &Database,
    version: u64,
    committed: bool,
) {
    request.set_transaction(None);
    if committed && !db.is_close_pending() {
        log_open_complete(name, version);
        request.settle_success(RequestResult::Database(db.clone()));
        request.notify_success();
    } else {
        db.close();
        let error = DbError::aborted();
        log_event_with_fields(
            Event::OpenFailed,
            &[("db", name), ("error", error.name())],
        );
        request.settle_error(error.clone());
        request.notify_error(&error);
    }
    runtime.release_open(name);
}

fn fail_open(runtime: &Runtime, name: &str, request: &Request, error: DbError) {
    log_event_with_fields(
        Event::OpenFailed,
        &[("db", name), ("error", error.name()), ("message", error.message())],
    );
    request.settle_error(error.clone());
    request.notify_error(&error);
    runtime.release_open(name);
}

fn log_open_complete(name: &str, version: u64) {
    let version = version.to_string();
    log_event_with_fields(
        Event::OpenComplete,
        &[("db", name), ("version", version.as_str())],
    );
}

// Delete

fn start_delete(runtime: Rc<Runtime>, name: String, request: Request) {
    let listed = runtime.backend_ref().list_databases();
    let old_version = match listed {
        Ok(databases) => databases
            .iter()
            .find(|db| db.name == name)
            .map_or(0, |db| db.version),
        Err(e) => return fail_open(&runtime, &name, &request, e.into()),
    };

    let event = VersionChangeEvent {
        old_version,
        new_version: None,
    };
    let resume_runtime = Rc::clone(&runtime);
    let resume_name = name.clone();
    let resume_request = request.clone();
    wait_for_others(&runtime, &name, &request, &event, move || {
        finish_delete(resume_runtime, resume_name, resume_request)
    });
}

fn finish_delete(runtime: Rc<Runtime>, name: String, request: Request) {
    let deleted = runtime.backend().delete_database(&name);
    match deleted {
        Ok(version) => {
            runtime.drop_generators(&name);
            runtime.metrics().increment_databases_deleted();
            let version = version.to_string();
            log_event_with_fields(
                Event::DatabaseDeleted,
                &[("db", name.as_str()), ("old_version", version.as_str())],
            );
            request.settle_success(RequestResult::Undefined);
            request.notify_success();
            runtime.release_open(&name);
        }
        Err(e) => fail_open(&runtime, &name, &request, e.into()),
    }
}
