//! Object Store and Index Tests
//!
//! Tests for record and index operations:
//! - key resolution: in-line, out-of-line and generated keys
//! - reads and writes over keys and ranges
//! - index maintenance: unique, multi-entry, creation over existing data
//! - handles of deleted stores and indexes

mod common;

use aerostore::{
    Database, Factory, IndexParameters, Key, KeyRange, ObjectStoreParameters, Query, Value,
};
use common::*;

// =============================================================================
// Helper Functions
// =============================================================================

/// Stores:
/// - "auto": out-of-line keys with a generator
/// - "inline_auto": key path "id" with a generator
/// - "users": key path "id", unique index "by_email", multi-entry index "by_tag"
/// - "plain": out-of-line keys, no generator
fn setup() -> (Factory, Database) {
    let factory = Factory::in_memory();
    let db = open_with(&factory, "db", 1, |db, _| {
        db.create_object_store("auto", ObjectStoreParameters::auto_increment())
            .unwrap();
        db.create_object_store(
            "inline_auto",
            ObjectStoreParameters::key_path("id").with_auto_increment(true),
        )
        .unwrap();
        let users = db
            .create_object_store("users", ObjectStoreParameters::key_path("id"))
            .unwrap();
        users
            .create_index("by_email", "email", IndexParameters::unique())
            .unwrap();
        users
            .create_index("by_tag", "tags", IndexParameters::multi_entry())
            .unwrap();
        db.create_object_store("plain", ObjectStoreParameters::default())
            .unwrap();
    });
    (factory, db)
}

fn user(id: i32, email: &str, tags: &[&str]) -> Value {
    record(&[
        ("id", Value::from(id)),
        ("email", Value::from(email)),
        (
            "tags",
            Value::from(tags.iter().map(|t| Value::from(*t)).collect::<Vec<_>>()),
        ),
    ])
}

fn seed_users(factory: &Factory, db: &Database) {
    let txn = read_write(db, &["users"]);
    let users = txn.object_store("users").unwrap();
    users.put(user(1, "ann@example.com", &["admin", "dev"]), None).unwrap();
    users.put(user(2, "bob@example.com", &["dev"]), None).unwrap();
    users.put(user(3, "cy@example.com", &["ops", "dev", "ops"]), None).unwrap();
    factory.run_until_idle();
    assert!(txn.error().is_none());
}

fn numbers(values: &[i32]) -> Vec<Key> {
    values.iter().map(|n| Key::from(*n)).collect()
}

// =============================================================================
// Key Generator Tests
// =============================================================================

/// add on an auto-increment store resolves to 1, 2, 3.
#[test]
fn test_generated_keys() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["auto"]);
    let store = txn.object_store("auto").unwrap();
    let requests: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|v| store.add(Value::from(*v), None).unwrap())
        .collect();
    factory.run_until_idle();

    let keys: Vec<Key> = requests
        .iter()
        .map(|r| result_of(r).as_key().unwrap().clone())
        .collect();
    assert_eq!(keys, numbers(&[1, 2, 3]));
    assert_eq!(factory.metrics().keys_generated, 3);
}

/// Explicit number keys raise the generator; other keys leave it alone.
#[test]
fn test_explicit_keys_raise_generator() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["auto"]);
    let store = txn.object_store("auto").unwrap();
    store.add(Value::from("a"), None).unwrap();
    store.put(Value::from("b"), Some(Key::from(10))).unwrap();
    store.put(Value::from("c"), Some(Key::from("text"))).unwrap();
    let next = store.add(Value::from("d"), None).unwrap();
    store
        .put(Value::from("e"), Some(Key::number(20.5).unwrap()))
        .unwrap();
    let after_fraction = store.add(Value::from("f"), None).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&next).as_key(), Some(&Key::from(11)));
    assert_eq!(result_of(&after_fraction).as_key(), Some(&Key::from(21)));
}

/// A generated key is written into the value at the key path.
#[test]
fn test_generated_key_injected() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["inline_auto"]);
    let store = txn.object_store("inline_auto").unwrap();
    let add = store.add(record(&[("name", Value::from("x"))]), None).unwrap();
    let get = store.get(1).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&add).as_key(), Some(&Key::from(1)));
    let value = result_of(&get).into_value().unwrap();
    assert_eq!(value.get("id"), Some(&Value::from(1)));
    assert_eq!(value.get("name"), Some(&Value::from("x")));
}

/// The generator continues across transactions and connections.
#[test]
fn test_generator_survives_reopen() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["auto"]);
    txn.object_store("auto").unwrap().add(Value::from("a"), None).unwrap();
    factory.run_until_idle();
    db.close();

    let request = factory.open("db", None).unwrap();
    factory.run_until_idle();
    let db = request.database().unwrap();
    let txn = read_write(&db, &["auto"]);
    let add = txn.object_store("auto").unwrap().add(Value::from("b"), None).unwrap();
    factory.run_until_idle();
    assert_eq!(result_of(&add).as_key(), Some(&Key::from(2)));
}

// =============================================================================
// Key Resolution Tests
// =============================================================================

/// Invalid key combinations fail synchronously with DataError.
#[test]
fn test_key_resolution_errors() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["users", "plain", "inline_auto"]);
    let users = txn.object_store("users").unwrap();
    let plain = txn.object_store("plain").unwrap();
    let inline_auto = txn.object_store("inline_auto").unwrap();

    let cases = [
        users.put(user(1, "a@b", &[]), Some(Key::from(1))),
        users.put(record(&[("email", Value::from("a@b"))]), None),
        users.put(record(&[("id", Value::Null)]), None),
        plain.put(Value::from("v"), None),
        inline_auto.add(Value::from(5), None),
    ];
    for result in cases {
        assert_eq!(result.unwrap_err().name(), "DataError");
    }
    assert_eq!(txn.pending_requests(), 0);

    factory.run_until_idle();
    assert!(txn.error().is_none());
}

/// put replaces, add refuses an existing key.
#[test]
fn test_put_overwrites_add_refuses() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["plain"]);
    let plain = txn.object_store("plain").unwrap();
    plain.put(Value::from("first"), Some(Key::from("k"))).unwrap();
    plain.put(Value::from("second"), Some(Key::from("k"))).unwrap();
    let duplicate = plain.add(Value::from("third"), Some(Key::from("k"))).unwrap();
    handle_errors(&duplicate);
    let get = plain.get("k").unwrap();
    factory.run_until_idle();

    assert_eq!(error_of(&duplicate).unwrap().name(), "ConstraintError");
    assert_eq!(result_of(&get).as_value(), Some(&Value::from("second")));
}

// =============================================================================
// Read Tests
// =============================================================================

/// get, get_key, get_all, get_all_keys and count over keys and ranges.
#[test]
fn test_reads() {
    let (factory, db) = setup();
    let txn = read_write(&db, &["plain"]);
    let plain = txn.object_store("plain").unwrap();
    for n in 1..=5 {
        plain.put(Value::from(n * 10), Some(Key::from(n))).unwrap();
    }
    factory.run_until_idle();

    let txn = read_only(&db, &["plain"]);
    let plain = txn.object_store("plain").unwrap();
    let range = || Query::from(KeyRange::bound(Key::from(2), Key::from(4), false, true).unwrap());
    let get = plain.get(3).unwrap();
    let missing = plain.get(9).unwrap();
    let first_in_range = plain.get(range()).unwrap();
    let key = plain.get_key(KeyRange::lower_bound(Key::from(3), true)).unwrap();
    let all = plain.get_all(Some(range()), None).unwrap();
    let limited = plain.get_all(None, Some(2)).unwrap();
    let all_keys = plain.get_all_keys(None, None).unwrap();
    let count = plain.count(Some(range())).unwrap();
    let total = plain.count(None).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&get).as_value(), Some(&Value::from(30)));
    assert!(result_of(&missing).is_undefined());
    assert_eq!(result_of(&first_in_range).as_value(), Some(&Value::from(20)));
    assert_eq!(result_of(&key).as_key(), Some(&Key::from(4)));
    assert_eq!(
        result_of(&all).as_values().unwrap(),
        &[Value::from(20), Value::from(30)]
    );
    assert_eq!(
        result_of(&limited).as_values().unwrap(),
        &[Value::from(10), Value::from(20)]
    );
    assert_eq!(result_of(&all_keys).as_keys().unwrap(), numbers(&[1, 2, 3, 4, 5]).as_slice());
    assert_eq!(result_of(&count).as_count(), Some(2));
    assert_eq!(result_of(&total).as_count(), Some(5));
}

/// delete over a range and clear.
#[test]
fn test_delete_range_and_clear() {
    let (factory, db) = setup();
    let txn = read_write(&db, &["plain", "auto"]);
    let plain = txn.object_store("plain").unwrap();
    let auto = txn.object_store("auto").unwrap();
    for n in 1..=5 {
        plain.put(Value::from(n), Some(Key::from(n))).unwrap();
        auto.add(Value::from(n), None).unwrap();
    }
    plain
        .delete(KeyRange::bound(Key::from(2), Key::from(4), false, false).unwrap())
        .unwrap();
    auto.clear().unwrap();
    let remaining = plain.get_all_keys(None, None).unwrap();
    let cleared = auto.count(None).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&remaining).as_keys().unwrap(), numbers(&[1, 5]).as_slice());
    assert_eq!(result_of(&cleared).as_count(), Some(0));
}

// =============================================================================
// Index Tests
// =============================================================================

/// Index reads resolve through the primary key.
#[test]
fn test_index_reads() {
    let (factory, db) = setup();
    seed_users(&factory, &db);

    let txn = read_only(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    let by_email = users.index("by_email").unwrap();
    let by_tag = users.index("by_tag").unwrap();
    let value = by_email.get("bob@example.com").unwrap();
    let key = by_email.get_key("cy@example.com").unwrap();
    let devs = by_tag.get_all_keys(Some(Query::from("dev")), None).unwrap();
    let ops = by_tag.count(Some(Query::from("ops"))).unwrap();
    let first_dev = by_tag.get_all(Some(Query::from("dev")), Some(1)).unwrap();
    let entries = by_tag.count(None).unwrap();
    factory.run_until_idle();

    let bob = result_of(&value).into_value().unwrap();
    assert_eq!(bob.get("id"), Some(&Value::from(2)));
    assert_eq!(result_of(&key).as_key(), Some(&Key::from(3)));
    assert_eq!(result_of(&devs).as_keys().unwrap(), numbers(&[1, 2, 3]).as_slice());
    assert_eq!(result_of(&ops).as_count(), Some(1));
    let first = result_of(&first_dev);
    assert_eq!(first.as_values().unwrap().len(), 1);
    assert_eq!(first.as_values().unwrap()[0].get("id"), Some(&Value::from(1)));
    // admin, dev, dev, dev, ops
    assert_eq!(result_of(&entries).as_count(), Some(5));
    assert_eq!(users.index_names(), vec!["by_email".to_string(), "by_tag".to_string()]);
}

/// A unique index rejects a second record with the same index key.
#[test]
fn test_unique_index_violation() {
    let (factory, db) = setup();
    seed_users(&factory, &db);

    let txn = read_write(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    let clash = users.put(user(9, "ann@example.com", &[]), None).unwrap();
    factory.run_until_idle();

    assert_eq!(error_of(&clash).unwrap().name(), "ConstraintError");
    assert_eq!(txn.error().unwrap().name(), "ConstraintError");

    let txn = read_write(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    let same_record = users.put(user(1, "ann@example.com", &["new"]), None).unwrap();
    factory.run_until_idle();
    assert!(error_of(&same_record).is_none());
}

/// Updating a record moves its index entries.
#[test]
fn test_index_follows_updates() {
    let (factory, db) = setup();
    seed_users(&factory, &db);

    let txn = read_write(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    users.put(user(2, "bob@new.example.com", &["ops"]), None).unwrap();
    users.delete(3).unwrap();
    let by_tag = users.index("by_tag").unwrap();
    let devs = by_tag.get_all_keys(Some(Query::from("dev")), None).unwrap();
    let ops = by_tag.get_all_keys(Some(Query::from("ops")), None).unwrap();
    let old_email = users.index("by_email").unwrap().count(Some("bob@example.com".into())).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&devs).as_keys().unwrap(), numbers(&[1]).as_slice());
    assert_eq!(result_of(&ops).as_keys().unwrap(), numbers(&[2]).as_slice());
    assert_eq!(result_of(&old_email).as_count(), Some(0));
}

/// Records whose index key is missing or invalid are left out of the index.
#[test]
fn test_records_without_index_key() {
    let (factory, db) = setup();

    let txn = read_write(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    users.put(record(&[("id", Value::from(1))]), None).unwrap();
    users
        .put(record(&[("id", Value::from(2)), ("email", Value::Null)]), None)
        .unwrap();
    let emails = users.index("by_email").unwrap().count(None).unwrap();
    let total = users.count(None).unwrap();
    factory.run_until_idle();

    assert_eq!(result_of(&emails).as_count(), Some(0));
    assert_eq!(result_of(&total).as_count(), Some(2));
}

/// create_index indexes the records already in the store.
#[test]
fn test_create_index_populates() {
    let (factory, db) = setup();
    seed_users(&factory, &db);
    db.close();

    let db = open_with(&factory, "db", 2, |_, txn| {
        let users = txn.object_store("users").unwrap();
        users
            .create_index("by_id", "id", IndexParameters::default())
            .unwrap();
        assert_eq!(
            users
                .create_index("by_id", "id", IndexParameters::default())
                .unwrap_err()
                .name(),
            "ConstraintError"
        );
        assert_eq!(
            users
                .create_index("pair", vec!["id", "email"], IndexParameters::multi_entry())
                .unwrap_err()
                .name(),
            "InvalidAccessError"
        );
    });

    let txn = read_only(&db, &["users"]);
    let count = txn
        .object_store("users")
        .unwrap()
        .index("by_id")
        .unwrap()
        .count(Some(Query::from(KeyRange::lower_bound(Key::from(2), false))))
        .unwrap();
    factory.run_until_idle();
    assert_eq!(result_of(&count).as_count(), Some(2));
}

/// A unique index over duplicate existing values aborts the upgrade.
#[test]
fn test_create_unique_index_over_duplicates() {
    let (factory, db) = setup();
    seed_users(&factory, &db);
    db.close();

    let request = factory.open("db", Some(2)).unwrap();
    request.set_on_upgrade_needed(|req, _| {
        let users = req.transaction().unwrap().object_store("users").unwrap();
        let params = IndexParameters {
            unique: true,
            multi_entry: true,
        };
        users.create_index("unique_tag", "tags", params).unwrap();
    });
    factory.run_until_idle();

    assert_eq!(error_of(&request).unwrap().name(), "AbortError");
    assert_eq!(factory.databases().unwrap()[0].version, 1);
}

/// delete_index removes the index and invalidates its handle.
#[test]
fn test_delete_index() {
    let (factory, db) = setup();
    db.close();

    let db = open_with(&factory, "db", 2, |_, txn| {
        let users = txn.object_store("users").unwrap();
        let by_tag = users.index("by_tag").unwrap();
        users.delete_index("by_tag").unwrap();
        assert_eq!(by_tag.count(None).unwrap_err().name(), "InvalidStateError");
        assert_eq!(users.index("by_tag").unwrap_err().name(), "NotFoundError");
        assert_eq!(users.delete_index("by_tag").unwrap_err().name(), "NotFoundError");
    });

    let txn = read_only(&db, &["users"]);
    let users = txn.object_store("users").unwrap();
    assert_eq!(users.index_names(), vec!["by_email".to_string()]);
    assert_eq!(
        users
            .create_index("late", "x", IndexParameters::default())
            .unwrap_err()
            .name(),
        "InvalidStateError"
    );
}

/// Handles to a deleted store fail with InvalidStateError.
#[test]
fn test_deleted_store_handle() {
    let (factory, db) = setup();
    db.close();

    open_with(&factory, "db", 2, |db, txn| {
        let plain = txn.object_store("plain").unwrap();
        db.delete_object_store("plain").unwrap();
        assert_eq!(plain.get(1).unwrap_err().name(), "InvalidStateError");
        assert_eq!(
            plain.put(Value::from(1), Some(Key::from(1))).unwrap_err().name(),
            "InvalidStateError"
        );
        assert_eq!(txn.object_store("plain").unwrap_err().name(), "NotFoundError");
        assert!(!db.object_store_names().contains(&"plain".to_string()));
    });
}
