//! Shared helpers for integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use aerostore::{
    Database, DbError, ErrorDisposition, Factory, Request, RequestResult, Transaction,
    TransactionMode, TransactionOptions, Value,
};

/// Open `name` at `version`, running `upgrade` in the version change
/// transaction. Panics if the open fails.
pub fn open_with(
    factory: &Factory,
    name: &str,
    version: u64,
    upgrade: impl FnOnce(&Database, &Transaction) + 'static,
) -> Database {
    let request = factory.open(name, Some(version)).unwrap();
    let mut upgrade = Some(upgrade);
    request.set_on_upgrade_needed(move |req, _| {
        let db = req.database().unwrap();
        let txn = req.transaction().unwrap();
        if let Some(upgrade) = upgrade.take() {
            upgrade(&db, &txn);
        }
    });
    factory.run_until_idle();
    if let Some(error) = request.error().unwrap() {
        panic!("open failed: {}", error);
    }
    request.database().unwrap()
}

pub fn read_write(db: &Database, stores: &[&str]) -> Transaction {
    db.transaction(stores.iter().copied(), TransactionMode::ReadWrite, TransactionOptions::default())
        .unwrap()
}

pub fn read_only(db: &Database, stores: &[&str]) -> Transaction {
    db.transaction(stores.iter().copied(), TransactionMode::ReadOnly, TransactionOptions::default())
        .unwrap()
}

/// Object with the given fields
pub fn record(fields: &[(&str, Value)]) -> Value {
    Value::object(fields.iter().map(|(k, v)| (*k, v.clone())))
}

/// Settled result of a request
pub fn result_of(request: &Request) -> RequestResult {
    request.result().unwrap()
}

/// Error of a settled request, if it failed
pub fn error_of(request: &Request) -> Option<DbError> {
    request.error().unwrap()
}

/// Mark the request's failure as handled so the transaction survives it
pub fn handle_errors(request: &Request) {
    request.set_on_error(|_, _| ErrorDisposition::Handled);
}

/// Shared log of strings, for ordering assertions inside callbacks
#[derive(Clone, Default)]
pub struct Trace(Rc<RefCell<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}
