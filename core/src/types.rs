//! Payload types sent to the document store.
//!
//! # Design
//! Documents are schemaless JSON objects. The server is the only authority
//! on identifiers, revisions and shape, so `Document` is a plain map and the
//! client never validates it. `_id` and `_rev` are read from it only to build
//! request URLs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON document. By convention carries `_id` and, once stored, `_rev`.
pub type Document = Map<String, Value>;

/// Result limit sent with every `_find` query.
pub const FIND_LIMIT: u64 = 900_000;

/// Read a reserved field (`_id`, `_rev`) as URL text.
///
/// Strings are used verbatim; other JSON values use their JSON text; a
/// missing field yields an empty string and the server decides what that
/// means.
pub fn reserved_field(doc: &Document, name: &str) -> String {
    match doc.get(name) {
        Some(Value::String(value)) => value.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// A design document holding named map views.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesignDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    pub views: BTreeMap<String, ViewDefinition>,
}

/// A single view. `map` is the map function's source text, evaluated by the
/// server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViewDefinition {
    pub map: String,
}

/// Body of a `_find` query matching documents by `doc_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindRequest {
    pub selector: TypeSelector,
    pub limit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeSelector {
    pub doc_type: Equals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Equals {
    #[serde(rename = "$eq")]
    pub eq: String,
}

impl FindRequest {
    pub fn by_doc_type(doc_type: &str) -> Self {
        Self {
            selector: TypeSelector {
                doc_type: Equals {
                    eq: doc_type.to_string(),
                },
            },
            limit: FIND_LIMIT,
        }
    }
}
