//! In-memory databases with CouchDB revision semantics.
//!
//! Revisions are `{generation}-{32 hex}`. A write to an existing live
//! document must name its current revision or it conflicts; deletes leave a
//! tombstone so the change feed and later recreation behave as on a real
//! server. Map functions are never evaluated: every view is served as an
//! index on the `doc_type` field.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

const DESIGN_PREFIX: &str = "_design/";

/// Failures reported to clients as `{"error": kind, "reason": message}`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(&'static str),

    #[error("Document update conflict.")]
    Conflict,

    #[error("{0}")]
    BadRequest(String),

    #[error("The database could not be created, the file already exists.")]
    FileExists,
}

impl StoreError {
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::Conflict => 409,
            StoreError::BadRequest(_) => 400,
            StoreError::FileExists => 412,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict => "conflict",
            StoreError::BadRequest(_) => "bad_request",
            StoreError::FileExists => "file_exists",
        }
    }

    pub fn to_json(&self) -> Value {
        json!({"error": self.kind(), "reason": self.to_string()})
    }
}

/// Id and new revision of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub id: String,
    pub rev: String,
}

impl WriteResult {
    pub fn to_json(&self) -> Value {
        json!({"ok": true, "id": self.id, "rev": self.rev})
    }
}

#[derive(Debug, Clone)]
struct Entry {
    rev: String,
    seq: u64,
    deleted: bool,
    body: Map<String, Value>,
}

/// A single database.
#[derive(Debug, Default)]
pub struct Database {
    docs: BTreeMap<String, Entry>,
    update_seq: u64,
}

impl Database {
    pub fn get(&self, id: &str) -> Result<Value, StoreError> {
        match self.docs.get(id) {
            Some(entry) if !entry.deleted => Ok(Value::Object(entry.body.clone())),
            Some(_) => Err(StoreError::NotFound("deleted")),
            None => Err(StoreError::NotFound("missing")),
        }
    }

    /// Create or update `id`. The expected revision comes from `query_rev`
    /// or the body's `_rev`; if both are present they must agree.
    pub fn put(
        &mut self,
        id: &str,
        mut body: Map<String, Value>,
        query_rev: Option<&str>,
    ) -> Result<WriteResult, StoreError> {
        let body_rev = body.get("_rev").and_then(Value::as_str).map(str::to_string);
        let expected = match (query_rev, body_rev) {
            (Some(query), Some(in_body)) if query != in_body => {
                return Err(StoreError::BadRequest(
                    "Document rev from request body and query string have different values"
                        .to_string(),
                ))
            }
            (Some(query), _) => Some(query.to_string()),
            (None, in_body) => in_body,
        };

        let next = match self.docs.get(id) {
            Some(entry) if !entry.deleted => {
                if expected.as_deref() != Some(entry.rev.as_str()) {
                    return Err(StoreError::Conflict);
                }
                generation(&entry.rev) + 1
            }
            Some(entry) => match expected.as_deref() {
                None => generation(&entry.rev) + 1,
                Some(rev) if rev == entry.rev => generation(&entry.rev) + 1,
                Some(_) => return Err(StoreError::Conflict),
            },
            None if expected.is_some() => return Err(StoreError::Conflict),
            None => 1,
        };

        let rev = format!("{next}-{}", Uuid::new_v4().simple());
        let deleted = body.get("_deleted").and_then(Value::as_bool).unwrap_or(false);
        if deleted {
            body = Map::new();
            body.insert("_deleted".to_string(), Value::Bool(true));
        }
        body.insert("_id".to_string(), Value::String(id.to_string()));
        body.insert("_rev".to_string(), Value::String(rev.clone()));

        self.update_seq += 1;
        self.docs.insert(
            id.to_string(),
            Entry {
                rev: rev.clone(),
                seq: self.update_seq,
                deleted,
                body,
            },
        );
        Ok(WriteResult {
            id: id.to_string(),
            rev,
        })
    }

    pub fn delete(&mut self, id: &str, rev: Option<&str>) -> Result<WriteResult, StoreError> {
        self.get(id)?;
        let mut tombstone = Map::new();
        tombstone.insert("_deleted".to_string(), Value::Bool(true));
        match rev {
            Some(rev) => self.put(id, tombstone, Some(rev)),
            None => Err(StoreError::Conflict),
        }
    }

    pub fn all_docs(&self) -> Value {
        let rows: Vec<Value> = self
            .live()
            .map(|(id, entry)| json!({"id": id, "key": id, "value": {"rev": entry.rev}}))
            .collect();
        json!({"total_rows": rows.len(), "offset": 0, "rows": rows})
    }

    pub fn changes(&self) -> Value {
        let mut entries: Vec<(&String, &Entry)> = self.docs.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        let results: Vec<Value> = entries
            .into_iter()
            .map(|(id, entry)| {
                let mut change = json!({
                    "seq": entry.seq.to_string(),
                    "id": id,
                    "changes": [{"rev": entry.rev}],
                });
                if entry.deleted {
                    change["deleted"] = Value::Bool(true);
                }
                change
            })
            .collect();
        json!({"results": results, "last_seq": self.update_seq.to_string(), "pending": 0})
    }

    /// Mango `_find` supporting field equality and `$eq`.
    pub fn find(&self, selector: &Map<String, Value>, limit: usize) -> Value {
        let docs: Vec<Value> = self
            .live()
            .filter(|(id, _)| !id.starts_with(DESIGN_PREFIX))
            .filter(|(_, entry)| matches_selector(&entry.body, selector))
            .take(limit)
            .map(|(_, entry)| Value::Object(entry.body.clone()))
            .collect();
        json!({"docs": docs})
    }

    /// Apply each document as an independent write.
    pub fn bulk(&mut self, docs: Vec<Value>) -> Vec<Value> {
        docs.into_iter()
            .map(|doc| {
                let Value::Object(body) = doc else {
                    return json!({"error": "bad_request", "reason": "Document must be a JSON object"});
                };
                let id = match body.get("_id").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => Uuid::new_v4().simple().to_string(),
                };
                match self.put(&id, body, None) {
                    Ok(written) => written.to_json(),
                    Err(err) => json!({"id": id, "error": err.kind(), "reason": err.to_string()}),
                }
            })
            .collect()
    }

    /// Query `_design/{ddoc}` view `{view}` keyed on `doc_type`.
    pub fn view(
        &self,
        ddoc: &str,
        view: &str,
        start_key: Option<&Value>,
        end_key: Option<&Value>,
        include_docs: bool,
    ) -> Result<Value, StoreError> {
        let design = self.get(&format!("{DESIGN_PREFIX}{ddoc}"))?;
        if design.pointer(&format!("/views/{view}/map")).is_none() {
            return Err(StoreError::NotFound("missing_named_view"));
        }

        let indexed: Vec<(&String, &Entry, &Value)> = self
            .live()
            .filter(|(id, _)| !id.starts_with(DESIGN_PREFIX))
            .filter_map(|(id, entry)| entry.body.get("doc_type").map(|key| (id, entry, key)))
            .collect();
        let total_rows = indexed.len();

        let rows: Vec<Value> = indexed
            .into_iter()
            .filter(|(_, _, key)| in_range(key, start_key, end_key))
            .map(|(id, entry, key)| {
                let mut row = json!({"id": id, "key": key, "value": null});
                if include_docs {
                    row["doc"] = Value::Object(entry.body.clone());
                }
                row
            })
            .collect();
        Ok(json!({"total_rows": total_rows, "offset": 0, "rows": rows}))
    }

    fn live(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.docs.iter().filter(|(_, entry)| !entry.deleted)
    }
}

/// All databases known to the server.
#[derive(Debug, Default)]
pub struct Store {
    databases: BTreeMap<String, Database>,
}

impl Store {
    pub fn create_database(&mut self, name: &str) -> Result<(), StoreError> {
        if self.databases.contains_key(name) {
            return Err(StoreError::FileExists);
        }
        self.databases.insert(name.to_string(), Database::default());
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    pub fn database(&self, name: &str) -> Result<&Database, StoreError> {
        self.databases
            .get(name)
            .ok_or(StoreError::NotFound("Database does not exist."))
    }

    pub fn database_mut(&mut self, name: &str) -> Result<&mut Database, StoreError> {
        self.databases
            .get_mut(name)
            .ok_or(StoreError::NotFound("Database does not exist."))
    }
}

fn generation(rev: &str) -> u64 {
    rev.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

fn matches_selector(body: &Map<String, Value>, selector: &Map<String, Value>) -> bool {
    selector.iter().all(|(field, condition)| {
        let expected = match condition {
            Value::Object(ops) => match ops.get("$eq") {
                Some(value) => value,
                None => return false,
            },
            other => other,
        };
        body.get(field) == Some(expected)
    })
}

fn in_range(key: &Value, start: Option<&Value>, end: Option<&Value>) -> bool {
    let above = match start {
        Some(start) => compare(key, start).is_some_and(|o| o.is_ge()),
        None => true,
    };
    let below = match end {
        Some(end) => compare(key, end).is_some_and(|o| o.is_le()),
        None => true,
    };
    above && below
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (a, b) if a == b => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}
