//! Local construction of design documents.

use std::collections::BTreeMap;

use crate::types::{DesignDocument, ViewDefinition};

/// Prefix that marks a document id as a design document.
pub const DESIGN_PREFIX: &str = "_design/";

/// Build a design document `_design/{name}` with a single view `{name}`.
///
/// `map` is the map function's source text exactly as the server should
/// evaluate it, e.g. `"function (doc) { emit(doc.doc_type, null); }"`.
/// Pure: equal arguments give equal documents.
pub fn create_design_doc(name: &str, map: impl Into<String>) -> DesignDocument {
    let mut views = BTreeMap::new();
    views.insert(name.to_string(), ViewDefinition { map: map.into() });
    DesignDocument {
        id: format!("{DESIGN_PREFIX}{name}"),
        rev: None,
        views,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MAP: &str = "function (doc) { emit(doc.doc_type, null); }";

    #[test]
    fn builds_id_and_single_view() {
        let ddoc = create_design_doc("byType", MAP);
        assert_eq!(ddoc.id, "_design/byType");
        assert_eq!(ddoc.views.len(), 1);
        assert_eq!(ddoc.views["byType"].map, MAP);
    }

    #[test]
    fn is_idempotent() {
        assert_eq!(create_design_doc("byType", MAP), create_design_doc("byType", MAP));
    }

    #[test]
    fn serializes_like_a_couch_design_doc() {
        let body = serde_json::to_value(create_design_doc("byType", MAP)).unwrap();
        assert_eq!(
            body,
            json!({"_id": "_design/byType", "views": {"byType": {"map": MAP}}})
        );
    }
}
