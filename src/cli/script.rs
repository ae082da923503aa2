//! Script replay
//!
//! A script opens one database, creates its schema in the upgrade, then
//! runs each step in a transaction of its own and reports the outcome:
//!
//! ```json
//! {
//!   "database": "library",
//!   "version": 1,
//!   "schema": [
//!     {"name": "books", "key_path": "isbn",
//!      "indexes": [{"name": "by_author", "key_path": "author"}]}
//!   ],
//!   "steps": [
//!     {"op": "put", "store": "books", "value": {"isbn": "1", "author": "Le Guin"}},
//!     {"op": "cursor", "store": "books", "index": "by_author", "direction": "prev"}
//!   ]
//! }
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::connection::{Database, Factory};
use crate::cursor::Direction;
use crate::errors::{DbError, DbResult};
use crate::key::{to_key, Key, KeyPath, KeyRange, Query, Value};
use crate::observability::Logger;
use crate::request::{Request, RequestResult};
use crate::store::{IndexParameters, ObjectStore, ObjectStoreParameters};
use crate::transaction::{TransactionMode, TransactionOptions};

/// A replayable script
#[derive(Debug, Deserialize)]
pub struct Script {
    pub database: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub schema: Vec<StoreSchema>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct StoreSchema {
    pub name: String,
    #[serde(default)]
    pub key_path: Option<KeyPath>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

#[derive(Debug, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub key_path: KeyPath,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

/// Key range in script form; `only` wins over the bounds
#[derive(Debug, Default, Deserialize)]
pub struct RangeArgs {
    #[serde(default)]
    pub only: Option<JsonValue>,
    #[serde(default)]
    pub lower: Option<JsonValue>,
    #[serde(default)]
    pub upper: Option<JsonValue>,
    #[serde(default)]
    pub lower_open: bool,
    #[serde(default)]
    pub upper_open: bool,
}

impl RangeArgs {
    pub fn to_range(&self) -> DbResult<KeyRange> {
        if let Some(only) = &self.only {
            return Ok(KeyRange::only(json_key(only)?));
        }
        let lower = self.lower.as_ref().map(json_key).transpose()?;
        let upper = self.upper.as_ref().map(json_key).transpose()?;
        match (lower, upper) {
            (Some(lower), Some(upper)) => {
                KeyRange::bound(lower, upper, self.lower_open, self.upper_open)
            }
            (Some(lower), None) => Ok(KeyRange::lower_bound(lower, self.lower_open)),
            (None, Some(upper)) => Ok(KeyRange::upper_bound(upper, self.upper_open)),
            (None, None) => Ok(KeyRange::all()),
        }
    }
}

/// One script step
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Put {
        store: String,
        value: JsonValue,
        #[serde(default)]
        key: Option<JsonValue>,
    },
    Add {
        store: String,
        value: JsonValue,
        #[serde(default)]
        key: Option<JsonValue>,
    },
    Get {
        store: String,
        #[serde(default)]
        index: Option<String>,
        key: JsonValue,
    },
    GetAll {
        store: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        range: Option<RangeArgs>,
        #[serde(default)]
        count: Option<u32>,
    },
    GetAllKeys {
        store: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        range: Option<RangeArgs>,
        #[serde(default)]
        count: Option<u32>,
    },
    Count {
        store: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        range: Option<RangeArgs>,
    },
    Delete {
        store: String,
        range: RangeArgs,
    },
    Clear {
        store: String,
    },
    Cursor {
        store: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        range: Option<RangeArgs>,
        #[serde(default)]
        direction: Direction,
        #[serde(default)]
        key_only: bool,
    },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Put { .. } => "put",
            Step::Add { .. } => "add",
            Step::Get { .. } => "get",
            Step::GetAll { .. } => "get_all",
            Step::GetAllKeys { .. } => "get_all_keys",
            Step::Count { .. } => "count",
            Step::Delete { .. } => "delete",
            Step::Clear { .. } => "clear",
            Step::Cursor { .. } => "cursor",
        }
    }

    fn store(&self) -> &str {
        match self {
            Step::Put { store, .. }
            | Step::Add { store, .. }
            | Step::Get { store, .. }
            | Step::GetAll { store, .. }
            | Step::GetAllKeys { store, .. }
            | Step::Count { store, .. }
            | Step::Delete { store, .. }
            | Step::Clear { store }
            | Step::Cursor { store, .. } => store,
        }
    }

    fn mode(&self) -> TransactionMode {
        match self {
            Step::Put { .. } | Step::Add { .. } | Step::Delete { .. } | Step::Clear { .. } => {
                TransactionMode::ReadWrite
            }
            _ => TransactionMode::ReadOnly,
        }
    }
}

fn json_key(json: &JsonValue) -> DbResult<Key> {
    to_key(&Value::from(json.clone()))
}

fn query_of(range: &Option<RangeArgs>) -> DbResult<Option<Query>> {
    range
        .as_ref()
        .map(|def| def.to_range().map(Query::Range))
        .transpose()
}

fn error_json(error: &DbError) -> JsonValue {
    json!({ "name": error.name(), "message": error.message() })
}

/// Open the script's database, creating the schema in the upgrade.
///
/// Returns the open outcome as a report line alongside the connection.
pub fn open_database(factory: &Factory, script: &Script) -> DbResult<(Option<Database>, JsonValue)> {
    let request = factory.open(&script.database, script.version)?;
    let mut schema: Vec<_> = script
        .schema
        .iter()
        .map(|def| {
            let params = ObjectStoreParameters {
                key_path: def.key_path.clone(),
                auto_increment: def.auto_increment,
            };
            let indexes: Vec<_> = def
                .indexes
                .iter()
                .map(|i| {
                    let params = IndexParameters {
                        unique: i.unique,
                        multi_entry: i.multi_entry,
                    };
                    (i.name.clone(), i.key_path.clone(), params)
                })
                .collect();
            (def.name.clone(), params, indexes)
        })
        .collect();

    request.set_on_upgrade_needed(move |req, _| {
        let Some(db) = req.database() else {
            return;
        };
        for (name, params, indexes) in std::mem::take(&mut schema) {
            let created = db.create_object_store(&name, params).and_then(|store| {
                for (index, path, params) in indexes {
                    store.create_index(&index, path, params)?;
                }
                Ok(())
            });
            if let Err(e) = created {
                Logger::error("SCRIPT_SCHEMA_FAILED", &[("reason", e.message()), ("store", name.as_str())]);
                if let Some(txn) = req.transaction() {
                    let _ = txn.abort();
                }
                return;
            }
        }
    });
    factory.run_until_idle();

    match request.error()? {
        Some(error) => Ok((None, json!({ "op": "open", "ok": false, "error": error_json(&error) }))),
        None => {
            let db = request.database();
            let result = request.result()?.to_json();
            Ok((db, json!({ "op": "open", "ok": true, "result": result })))
        }
    }
}

/// Run one step to completion and report it
pub fn run_step(factory: &Factory, db: &Database, index: usize, step: &Step) -> JsonValue {
    let outcome = start_step(db, step).and_then(|(request, rows)| {
        factory.run_until_idle();
        match request.error()? {
            Some(error) => Err(error),
            None => Ok(match rows {
                Some(rows) => JsonValue::Array(rows.borrow().clone()),
                None => request.result()?.to_json(),
            }),
        }
    });
    match outcome {
        Ok(result) => json!({ "step": index, "op": step.name(), "ok": true, "result": result }),
        Err(error) => json!({
            "step": index,
            "op": step.name(),
            "ok": false,
            "error": error_json(&error),
        }),
    }
}

type Rows = Rc<RefCell<Vec<JsonValue>>>;

fn start_step(db: &Database, step: &Step) -> DbResult<(Request, Option<Rows>)> {
    let txn = db.transaction([step.store()], step.mode(), TransactionOptions::default())?;
    let store = txn.object_store(step.store())?;

    let request = match step {
        Step::Put { value, key, .. } => store.put(Value::from(value.clone()), key.as_ref().map(json_key).transpose()?)?,
        Step::Add { value, key, .. } => store.add(Value::from(value.clone()), key.as_ref().map(json_key).transpose()?)?,
        Step::Get { index, key, .. } => {
            let key = json_key(key)?;
            match index {
                Some(index) => store.index(index)?.get(key)?,
                None => store.get(key)?,
            }
        }
        Step::GetAll { index, range, count, .. } => match index {
            Some(index) => store.index(index)?.get_all(query_of(range)?, *count)?,
            None => store.get_all(query_of(range)?, *count)?,
        },
        Step::GetAllKeys { index, range, count, .. } => match index {
            Some(index) => store.index(index)?.get_all_keys(query_of(range)?, *count)?,
            None => store.get_all_keys(query_of(range)?, *count)?,
        },
        Step::Count { index, range, .. } => match index {
            Some(index) => store.index(index)?.count(query_of(range)?)?,
            None => store.count(query_of(range)?)?,
        },
        Step::Delete { range, .. } => store.delete(range.to_range()?)?,
        Step::Clear { .. } => store.clear()?,
        Step::Cursor { index, range, direction, key_only, .. } => {
            return collect_cursor(&store, index.as_deref(), query_of(range)?, *direction, *key_only)
        }
    };
    Ok((request, None))
}

/// Open a cursor that records every position and moves on until exhausted
fn collect_cursor(
    store: &ObjectStore,
    index: Option<&str>,
    query: Option<Query>,
    direction: Direction,
    key_only: bool,
) -> DbResult<(Request, Option<Rows>)> {
    let request = match (index, key_only) {
        (Some(index), false) => store.index(index)?.open_cursor(query, direction)?,
        (Some(index), true) => store.index(index)?.open_key_cursor(query, direction)?,
        (None, false) => store.open_cursor(query, direction)?,
        (None, true) => store.open_key_cursor(query, direction)?,
    };

    let rows: Rows = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&rows);
    request.set_on_success(move |req| {
        if let Ok(result @ RequestResult::Cursor(_)) = req.result() {
            sink.borrow_mut().push(result.to_json());
            if let Some(cursor) = result.as_cursor() {
                if let Err(e) = cursor.continue_(None) {
                    Logger::warn("SCRIPT_CURSOR_STOPPED", &[("reason", e.message())]);
                }
            }
        }
    });
    Ok((request, Some(rows)))
}
