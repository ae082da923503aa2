//! Connection and Upgrade Tests
//!
//! Tests for opening, upgrading and deleting databases:
//! - open creates or upgrades through a version change transaction
//! - a lower requested version fails with VersionError
//! - an aborted upgrade restores the committed version and schema
//! - other connections are told about version changes and can block them
//! - open and delete requests for one name run strictly in order

mod common;

use aerostore::{
    Factory, IndexParameters, Key, ObjectStoreParameters, ReadyState, TransactionMode,
    TransactionOptions, Value,
};
use common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn schema_v1(factory: &Factory) -> aerostore::Database {
    open_with(factory, "db", 1, |db, _| {
        db.create_object_store("s", ObjectStoreParameters::key_path("id"))
            .unwrap();
    })
}

fn versions(factory: &Factory) -> Vec<(String, u64)> {
    factory
        .databases()
        .unwrap()
        .into_iter()
        .map(|info| (info.name, info.version))
        .collect()
}

// =============================================================================
// Open Tests
// =============================================================================

/// Open at version 1, create a store, then read back what was put.
#[test]
fn test_open_create_put_get() {
    let factory = Factory::in_memory();
    let trace = Trace::default();

    let request = factory.open("db", Some(1)).unwrap();
    let t = trace.clone();
    request.set_on_upgrade_needed(move |req, event| {
        t.push(format!("upgrade {}->{:?}", event.old_version, event.new_version));
        let db = req.database().unwrap();
        assert_eq!(req.transaction().unwrap().mode(), TransactionMode::VersionChange);
        db.create_object_store("s", ObjectStoreParameters::key_path("id"))
            .unwrap();
    });
    let t = trace.clone();
    request.set_on_success(move |_| t.push("success"));
    factory.run_until_idle();

    assert_eq!(trace.entries(), vec!["upgrade 0->Some(1)", "success"]);
    let db = request.database().unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["s".to_string()]);
    assert!(request.transaction().is_none());

    let txn = read_write(&db, &["s"]);
    let put = txn
        .object_store("s")
        .unwrap()
        .put(record(&[("id", Value::from(1)), ("title", Value::from("Dune"))]), None)
        .unwrap();
    factory.run_until_idle();
    assert_eq!(result_of(&put).as_key(), Some(&Key::from(1)));

    let txn = read_only(&db, &["s"]);
    let get = txn.object_store("s").unwrap().get(1).unwrap();
    factory.run_until_idle();
    let value = result_of(&get).into_value().unwrap();
    assert_eq!(value.get("title"), Some(&Value::from("Dune")));
}

/// Without a version, open uses the stored one and skips the upgrade.
#[test]
fn test_open_without_version() {
    let factory = Factory::in_memory();
    schema_v1(&factory).close();

    let request = factory.open("db", None).unwrap();
    let trace = Trace::default();
    let t = trace.clone();
    request.set_on_upgrade_needed(move |_, _| t.push("upgrade"));
    factory.run_until_idle();

    assert!(trace.entries().is_empty());
    let db = request.database().unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["s".to_string()]);
}

/// A lower version fails with VersionError; version 0 is a TypeError.
#[test]
fn test_version_errors() {
    let factory = Factory::in_memory();
    open_with(&factory, "db", 3, |_, _| {}).close();

    let request = factory.open("db", Some(2)).unwrap();
    factory.run_until_idle();
    assert_eq!(error_of(&request).unwrap().name(), "VersionError");
    assert!(result_of(&request).is_undefined());
    assert_eq!(versions(&factory), vec![("db".to_string(), 3)]);

    assert_eq!(factory.open("db", Some(0)).unwrap_err().name(), "TypeError");
}

/// A pending open request has no result yet.
#[test]
fn test_pending_open_request() {
    let factory = Factory::in_memory();
    let request = factory.open("db", Some(1)).unwrap();

    assert_eq!(request.ready_state(), ReadyState::Pending);
    assert_eq!(request.result().unwrap_err().name(), "InvalidStateError");
    factory.run_until_idle();
    assert_eq!(request.ready_state(), ReadyState::Done);
}

// =============================================================================
// Upgrade Tests
// =============================================================================

/// Aborting the upgrade leaves the committed version and schema in place.
#[test]
fn test_upgrade_abort_reverts() {
    let factory = Factory::in_memory();
    schema_v1(&factory).close();

    let request = factory.open("db", Some(2)).unwrap();
    request.set_on_upgrade_needed(|req, _| {
        let db = req.database().unwrap();
        db.create_object_store("extra", ObjectStoreParameters::default())
            .unwrap();
        db.delete_object_store("s").unwrap();
        req.transaction().unwrap().abort().unwrap();
    });
    let trace = Trace::default();
    let t = trace.clone();
    request.set_on_success(move |_| t.push("success"));
    factory.run_until_idle();

    assert_eq!(error_of(&request).unwrap().name(), "AbortError");
    assert!(trace.entries().is_empty());
    assert_eq!(versions(&factory), vec![("db".to_string(), 1)]);

    let reopened = factory.open("db", None).unwrap();
    factory.run_until_idle();
    let db = reopened.database().unwrap();
    assert_eq!(db.version(), 1);
    assert_eq!(db.object_store_names(), vec!["s".to_string()]);
}

/// A failing request in the upgrade aborts it like any other transaction.
#[test]
fn test_upgrade_request_failure_aborts() {
    let factory = Factory::in_memory();

    let request = factory.open("db", Some(1)).unwrap();
    request.set_on_upgrade_needed(|req, _| {
        let db = req.database().unwrap();
        let store = db
            .create_object_store("s", ObjectStoreParameters::key_path("id"))
            .unwrap();
        store.add(record(&[("id", Value::from(1))]), None).unwrap();
        store.add(record(&[("id", Value::from(1))]), None).unwrap();
    });
    factory.run_until_idle();

    assert_eq!(error_of(&request).unwrap().name(), "AbortError");
    assert!(versions(&factory).is_empty());
}

/// An aborted upgrade puts back the key generators it replaced.
#[test]
fn test_upgrade_abort_restores_generator() {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "db", 1, |db, _| {
        db.create_object_store("q", ObjectStoreParameters::auto_increment())
            .unwrap();
    });
    let txn = read_write(&db, &["q"]);
    let q = txn.object_store("q").unwrap();
    q.add(Value::from("a"), None).unwrap();
    q.add(Value::from("b"), None).unwrap();
    factory.run_until_idle();
    db.close();

    let request = factory.open("db", Some(2)).unwrap();
    request.set_on_upgrade_needed(|req, _| {
        let db = req.database().unwrap();
        db.delete_object_store("q").unwrap();
        db.create_object_store("q", ObjectStoreParameters::auto_increment())
            .unwrap();
        req.transaction().unwrap().abort().unwrap();
    });
    factory.run_until_idle();
    assert_eq!(error_of(&request).unwrap().name(), "AbortError");

    let reopened = factory.open("db", None).unwrap();
    factory.run_until_idle();
    let db = reopened.database().unwrap();
    let txn = read_write(&db, &["q"]);
    let add = txn.object_store("q").unwrap().add(Value::from("c"), None).unwrap();
    factory.run_until_idle();
    assert_eq!(result_of(&add).as_key(), Some(&Key::from(3)));
}

/// Closing the connection during its upgrade fails the open with AbortError.
#[test]
fn test_close_during_upgrade() {
    let factory = Factory::in_memory();

    let request = factory.open("db", Some(1)).unwrap();
    request.set_on_upgrade_needed(|req, _| {
        let db = req.database().unwrap();
        db.create_object_store("s", ObjectStoreParameters::default())
            .unwrap();
        db.close();
    });
    factory.run_until_idle();

    assert_eq!(error_of(&request).unwrap().name(), "AbortError");
}

/// Schema calls are only valid inside the upgrade.
#[test]
fn test_schema_rules() {
    let factory = Factory::in_memory();
    let trace = Trace::default();

    let t = trace.clone();
    let db = open_with(&factory, "db", 1, move |db, _| {
        db.create_object_store("s", ObjectStoreParameters::key_path("id"))
            .unwrap();
        let err = |r: Result<aerostore::ObjectStore, aerostore::DbError>| r.unwrap_err().name();
        t.push(err(db.create_object_store("s", ObjectStoreParameters::default())));
        t.push(err(db.create_object_store("bad", ObjectStoreParameters::key_path("not a path"))));
        t.push(err(db.create_object_store(
            "auto",
            ObjectStoreParameters::key_path("").with_auto_increment(true),
        )));
        t.push(err(db.create_object_store(
            "auto",
            ObjectStoreParameters::key_path(vec!["a", "b"]).with_auto_increment(true),
        )));
        t.push(db.delete_object_store("missing").unwrap_err().name());
        t.push(
            db.transaction(["s"], TransactionMode::ReadOnly, TransactionOptions::default())
                .unwrap_err()
                .name(),
        );
    });
    assert_eq!(
        trace.entries(),
        vec![
            "ConstraintError",
            "SyntaxError",
            "InvalidAccessError",
            "InvalidAccessError",
            "NotFoundError",
            "InvalidStateError",
        ]
    );

    assert_eq!(
        db.create_object_store("late", ObjectStoreParameters::default())
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
    assert_eq!(db.delete_object_store("s").unwrap_err().name(), "InvalidStateError");
}

/// Stores and indexes can be renamed during an upgrade.
#[test]
fn test_rename_store_and_index() {
    let factory = Factory::in_memory();
    open_with(&factory, "db", 1, |db, _| {
        let store = db
            .create_object_store("books", ObjectStoreParameters::key_path("isbn"))
            .unwrap();
        store
            .create_index("by_author", "author", IndexParameters::default())
            .unwrap();
        store
            .put(
                record(&[("isbn", Value::from("1")), ("author", Value::from("Le Guin"))]),
                None,
            )
            .unwrap();
    })
    .close();

    let db = open_with(&factory, "db", 2, |_, txn| {
        let store = txn.object_store("books").unwrap();
        store.rename("novels").unwrap();
        store.index("by_author").unwrap().rename("author").unwrap();
        assert_eq!(store.name(), "novels");
        assert_eq!(store.index_names(), vec!["author".to_string()]);
    });
    assert_eq!(db.object_store_names(), vec!["novels".to_string()]);

    let txn = read_only(&db, &["novels"]);
    let count = txn
        .object_store("novels")
        .unwrap()
        .index("author")
        .unwrap()
        .count(Some("Le Guin".into()))
        .unwrap();
    factory.run_until_idle();
    assert_eq!(result_of(&count).as_count(), Some(1));
}

// =============================================================================
// Version Change Tests
// =============================================================================

/// An open connection gets versionchange; if it stays open the upgrade is blocked.
#[test]
fn test_blocked_upgrade() {
    let factory = Factory::in_memory();
    let trace = Trace::default();
    let first = schema_v1(&factory);
    let t = trace.clone();
    first.set_on_version_change(move |_, event| {
        t.push(format!("versionchange {}->{:?}", event.old_version, event.new_version));
    });

    let request = factory.open("db", Some(2)).unwrap();
    let t = trace.clone();
    request.set_on_blocked(move |_, event| {
        t.push(format!("blocked {}->{:?}", event.old_version, event.new_version));
    });
    let t = trace.clone();
    request.set_on_upgrade_needed(move |_, _| t.push("upgrade"));
    factory.run_until_idle();

    assert_eq!(
        trace.entries(),
        vec!["versionchange 1->Some(2)", "blocked 1->Some(2)"]
    );
    assert_eq!(request.ready_state(), ReadyState::Pending);

    first.close();
    assert!(first.is_closed());
    factory.run_until_idle();

    assert_eq!(request.database().unwrap().version(), 2);
    assert_eq!(trace.entries().last().map(String::as_str), Some("upgrade"));
    assert_eq!(
        first
            .transaction(["s"], TransactionMode::ReadOnly, TransactionOptions::default())
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
}

/// A connection that closes on versionchange does not block.
#[test]
fn test_close_on_version_change() {
    let factory = Factory::in_memory();
    let trace = Trace::default();
    let first = schema_v1(&factory);
    first.set_on_version_change(|db, _| db.close());

    let request = factory.open("db", Some(2)).unwrap();
    let t = trace.clone();
    request.set_on_blocked(move |_, _| t.push("blocked"));
    factory.run_until_idle();

    assert!(trace.entries().is_empty());
    assert!(first.is_closed());
    assert_eq!(request.database().unwrap().version(), 2);
}

/// Closing waits for the connection's running transactions.
#[test]
fn test_close_waits_for_transactions() {
    let factory = Factory::in_memory();
    let db = schema_v1(&factory);

    let txn = read_write(&db, &["s"]);
    let put = txn
        .object_store("s")
        .unwrap()
        .put(record(&[("id", Value::from(1))]), None)
        .unwrap();
    db.close();
    assert!(db.is_close_pending());
    assert!(!db.is_closed());

    factory.run_until_idle();
    assert!(error_of(&put).is_none());
    assert!(db.is_closed());
}

// =============================================================================
// Delete and Ordering Tests
// =============================================================================

/// Deleting a database notifies open connections and removes everything.
#[test]
fn test_delete_database() {
    let factory = Factory::in_memory();
    let trace = Trace::default();
    let db = schema_v1(&factory);
    let t = trace.clone();
    db.set_on_version_change(move |db, event| {
        t.push(format!("versionchange {:?}", event.new_version));
        db.close();
    });

    let request = factory.delete_database("db").unwrap();
    factory.run_until_idle();

    assert!(error_of(&request).is_none());
    assert!(result_of(&request).is_undefined());
    assert_eq!(trace.entries(), vec!["versionchange None"]);
    assert!(versions(&factory).is_empty());
    assert_eq!(factory.metrics().databases_deleted, 1);

    let reopened = open_with(&factory, "db", 1, |_, _| {});
    assert!(reopened.object_store_names().is_empty());
}

/// Open and delete requests for one name complete in the order they were made.
#[test]
fn test_open_queue_order() {
    let factory = Factory::in_memory();
    let trace = Trace::default();

    let first = factory.open("db", Some(1)).unwrap();
    let t = trace.clone();
    first.set_on_upgrade_needed(move |_, event| t.push(format!("upgrade {}", event.old_version)));
    let t = trace.clone();
    first.set_on_success(move |req| {
        t.push("open 1");
        req.database().unwrap().close();
    });

    let delete = factory.delete_database("db").unwrap();
    let t = trace.clone();
    delete.set_on_success(move |_| t.push("deleted"));

    let second = factory.open("db", None).unwrap();
    let t = trace.clone();
    second.set_on_upgrade_needed(move |_, event| t.push(format!("upgrade {}", event.old_version)));
    let t = trace.clone();
    second.set_on_success(move |_| t.push("open 2"));

    factory.run_until_idle();
    assert_eq!(
        trace.entries(),
        vec!["upgrade 0", "open 1", "deleted", "upgrade 0", "open 2"]
    );
}

/// databases() lists committed databases only.
#[test]
fn test_list_databases() {
    let factory = Factory::in_memory();
    assert!(versions(&factory).is_empty());

    open_with(&factory, "alpha", 2, |_, _| {});
    open_with(&factory, "beta", 1, |_, _| {});
    let pending = factory.open("gamma", Some(1)).unwrap();
    pending.set_on_upgrade_needed(|req, _| req.transaction().unwrap().abort().unwrap());
    factory.run_until_idle();

    assert_eq!(
        versions(&factory),
        vec![("alpha".to_string(), 2), ("beta".to_string(), 1)]
    );
}
