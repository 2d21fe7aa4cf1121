//! Request builder, executor and response pass-through for the document store.
//!
//! # Design
//! `DocStoreClient` holds the base URL, a precomputed Basic credential and a
//! transport. It carries no mutable state between calls. Each operation is
//! split into a `build_*` method that produces an `HttpRequest` without I/O
//! and an async method that executes it and decodes the body, so request
//! shape is testable without a server.
//!
//! Responses are passed through whatever their status: a 404 or 409 resolves
//! `Ok` with the server's error body. Only `all_databases` decodes strictly;
//! every other operation falls back to the raw body text when it is not JSON.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::design::DESIGN_PREFIX;
use crate::error::{DocStoreError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::HttpTransport;
use crate::types::{reserved_field, DesignDocument, Document, FindRequest};

const JSON: &str = "application/json";

/// Asynchronous, stateless client for a CouchDB-style document store.
#[derive(Debug, Clone)]
pub struct DocStoreClient {
    base_url: String,
    authorization: String,
    transport: HttpTransport,
}

impl DocStoreClient {
    pub fn new(config: &Config) -> Self {
        Self::with_transport(config, HttpTransport::new())
    }

    pub fn with_transport(config: &Config, transport: HttpTransport) -> Self {
        let mut base_url = config.url.clone();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let credential = STANDARD.encode(format!("{}:{}", config.api_key, config.api_key_secret));
        Self {
            base_url,
            authorization: format!("Basic {credential}"),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// List database names. Unauthenticated; fails on a non-JSON body.
    pub async fn all_databases(&self) -> Result<Value> {
        let response = self.transport.execute(self.build_all_databases()).await?;
        parse_all_databases(response)
    }

    /// Mango query for every document whose `doc_type` equals `doc_type`.
    pub async fn find_by_type(&self, db: &str, doc_type: &str) -> Result<Value> {
        self.send(self.build_find_by_type(db, doc_type)?).await
    }

    pub async fn all_documents(&self, db: &str) -> Result<Value> {
        self.send(self.build_all_documents(db)).await
    }

    /// Create or overwrite the document at its own `_id`.
    ///
    /// `doc` must carry `_id`. Without one the request targets `{db}/`, the
    /// database itself.
    pub async fn add_document(&self, db: &str, doc: &Document) -> Result<Value> {
        self.send(self.build_add_document(db, doc)?).await
    }

    pub async fn delete_document(&self, db: &str, id: &str, rev: &str) -> Result<Value> {
        self.send(self.build_delete_document(db, id, rev)).await
    }

    /// One snapshot of the change feed.
    pub async fn changes(&self, db: &str) -> Result<Value> {
        self.send(self.build_changes(db)).await
    }

    /// Store a design document. The server builds the view index lazily, on
    /// the first query.
    pub async fn add_design_doc(
        &self,
        db: &str,
        name: &str,
        design_doc: &DesignDocument,
    ) -> Result<Value> {
        self.send(self.build_add_design_doc(db, name, design_doc)?)
            .await
    }

    /// Rows of view `{doc}` in `_design/{doc}` whose key equals `key`, with
    /// documents included. `key` is sent as given and must be JSON text.
    pub async fn query_view(&self, db: &str, doc: &str, key: &str) -> Result<Value> {
        self.send(self.build_query_view(db, doc, key)).await
    }

    pub async fn get_document(&self, db: &str, id: &str) -> Result<Value> {
        self.send(self.build_get_document(db, id)).await
    }

    /// Overwrite a document, using its own `_id` and `_rev`.
    ///
    /// `doc` must carry `_id`. Without one the request targets `{db}/`, the
    /// database itself.
    pub async fn update_document(&self, db: &str, doc: &Document) -> Result<Value> {
        self.send(self.build_update_document(db, doc)?).await
    }

    /// Write many documents in one request. Per-document outcomes are in the
    /// returned array.
    pub async fn bulk_docs(&self, db: &str, docs: &[Document]) -> Result<Value> {
        self.send(self.build_bulk_docs(db, docs)?).await
    }

    async fn send(&self, request: HttpRequest) -> Result<Value> {
        let response = self.transport.execute(request).await?;
        Ok(parse_body(response))
    }

    // -----------------------------------------------------------------------
    // Request builders
    // -----------------------------------------------------------------------

    pub fn build_all_databases(&self) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: format!("{}_all_dbs", self.base_url),
            query: Vec::new(),
            headers: vec![content_type()],
            body: None,
        }
    }

    pub fn build_find_by_type(&self, db: &str, doc_type: &str) -> Result<HttpRequest> {
        let body = encode(&FindRequest::by_doc_type(doc_type))?;
        Ok(self.authed(HttpMethod::Post, format!("{}{db}/_find", self.base_url), Some(body)))
    }

    pub fn build_all_documents(&self, db: &str) -> HttpRequest {
        self.authed(HttpMethod::Get, format!("{}{db}/_all_docs", self.base_url), None)
    }

    pub fn build_add_document(&self, db: &str, doc: &Document) -> Result<HttpRequest> {
        let id = reserved_field(doc, "_id");
        let body = encode(doc)?;
        Ok(self.authed(HttpMethod::Put, format!("{}{db}/{id}", self.base_url), Some(body)))
    }

    pub fn build_delete_document(&self, db: &str, id: &str, rev: &str) -> HttpRequest {
        let mut req = self.authed(HttpMethod::Delete, format!("{}{db}/{id}", self.base_url), None);
        req.query.push(("rev".to_string(), rev.to_string()));
        req
    }

    pub fn build_changes(&self, db: &str) -> HttpRequest {
        self.authed(HttpMethod::Get, format!("{}{db}/_changes", self.base_url), None)
    }

    pub fn build_add_design_doc(
        &self,
        db: &str,
        name: &str,
        design_doc: &DesignDocument,
    ) -> Result<HttpRequest> {
        let body = encode(design_doc)?;
        Ok(self.authed(
            HttpMethod::Put,
            format!("{}{db}/{DESIGN_PREFIX}{name}", self.base_url),
            Some(body),
        ))
    }

    pub fn build_query_view(&self, db: &str, doc: &str, key: &str) -> HttpRequest {
        let mut req = self.authed(
            HttpMethod::Get,
            format!("{}{db}/{DESIGN_PREFIX}{doc}/_view/{doc}", self.base_url),
            None,
        );
        req.query = vec![
            ("start_key".to_string(), key.to_string()),
            ("end_key".to_string(), key.to_string()),
            ("include_docs".to_string(), "true".to_string()),
        ];
        req
    }

    pub fn build_get_document(&self, db: &str, id: &str) -> HttpRequest {
        self.authed(HttpMethod::Get, format!("{}{db}/{id}", self.base_url), None)
    }

    pub fn build_update_document(&self, db: &str, doc: &Document) -> Result<HttpRequest> {
        let id = reserved_field(doc, "_id");
        let rev = reserved_field(doc, "_rev");
        let body = encode(doc)?;
        let mut req = self.authed(HttpMethod::Put, format!("{}{db}/{id}", self.base_url), Some(body));
        req.query.push(("rev".to_string(), rev));
        Ok(req)
    }

    pub fn build_bulk_docs(&self, db: &str, docs: &[Document]) -> Result<HttpRequest> {
        let body = encode(&docs)?;
        Ok(self.authed(HttpMethod::Post, format!("{}{db}/_bulk_docs", self.base_url), Some(body)))
    }

    fn authed(&self, method: HttpMethod, url: String, body: Option<String>) -> HttpRequest {
        HttpRequest {
            method,
            url,
            query: Vec::new(),
            headers: vec![
                content_type(),
                ("authorization".to_string(), self.authorization.clone()),
            ],
            body,
        }
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Strictly decode the database listing body.
pub fn parse_all_databases(response: HttpResponse) -> Result<Value> {
    serde_json::from_str(&response.body).map_err(|e| {
        warn!(status = response.status, error = %e, "database listing is not valid JSON");
        DocStoreError::Decode(e)
    })
}

/// Leniently decode a response body: JSON becomes its value, an empty body
/// becomes `null`, anything else (whitespace included) is returned as a JSON
/// string.
pub fn parse_body(response: HttpResponse) -> Value {
    if response.body.is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&response.body) {
        Ok(value) => value,
        Err(_) => Value::String(response.body),
    }
}

fn content_type() -> (String, String) {
    ("content-type".to_string(), JSON.to_string())
}

fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<String> {
    serde_json::to_string(payload).map_err(DocStoreError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::create_design_doc;
    use serde_json::json;

    // base64("admin:secret")
    const AUTH: &str = "Basic YWRtaW46c2VjcmV0";

    fn client() -> DocStoreClient {
        DocStoreClient::new(&Config::new("http://localhost:5984/", "admin", "secret"))
    }

    fn doc(value: Value) -> Document {
        serde_json::from_value(value).unwrap()
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn build_all_databases_is_unauthenticated() {
        let req = client().build_all_databases();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/_all_dbs");
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("authorization"), None);
        assert!(req.body.is_none());
    }

    #[test]
    fn build_find_by_type_produces_correct_request() {
        let req = client().build_find_by_type("books", "novel").unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/books/_find");
        assert_eq!(req.header("authorization"), Some(AUTH));
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"selector": {"doc_type": {"$eq": "novel"}}, "limit": 900000})
        );
    }

    #[test]
    fn build_all_documents_produces_correct_request() {
        let req = client().build_all_documents("books");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/books/_all_docs");
        assert_eq!(req.header("authorization"), Some(AUTH));
        assert!(req.query.is_empty());
    }

    #[test]
    fn build_add_document_uses_document_id() {
        let input = doc(json!({"_id": "dune", "title": "Dune"}));
        let req = client().build_add_document("books", &input).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:5984/books/dune");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"_id": "dune", "title": "Dune"}));
    }

    #[test]
    fn build_delete_document_carries_exact_revision() {
        for rev in ["1-967a00dff5e02add41819138abb3284d", "2-a&b=c+d#e f"] {
            let req = client().build_delete_document("books", "dune", rev);
            assert_eq!(req.method, HttpMethod::Delete);
            assert_eq!(req.url, "http://localhost:5984/books/dune");
            assert_eq!(req.query, vec![("rev".to_string(), rev.to_string())]);
            assert!(req.body.is_none());
        }
    }

    #[test]
    fn build_changes_produces_correct_request() {
        let req = client().build_changes("books");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/books/_changes");
        assert_eq!(req.header("authorization"), Some(AUTH));
    }

    #[test]
    fn build_add_design_doc_targets_design_namespace() {
        let ddoc = create_design_doc("byType", "function (doc) { emit(doc.doc_type); }");
        let req = client().build_add_design_doc("books", "byType", &ddoc).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:5984/books/_design/byType");
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["_id"], "_design/byType");
        assert_eq!(body["views"]["byType"]["map"], "function (doc) { emit(doc.doc_type); }");
    }

    #[test]
    fn build_query_view_uses_exact_key_range() {
        let req = client().build_query_view("books", "byType", "\"novel\"");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/books/_design/byType/_view/byType");
        assert_eq!(req.query_param("start_key"), Some("\"novel\""));
        assert_eq!(req.query_param("end_key"), Some("\"novel\""));
        assert_eq!(req.query_param("include_docs"), Some("true"));
    }

    #[test]
    fn build_get_document_produces_correct_request() {
        let req = client().build_get_document("books", "dune");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:5984/books/dune");
        assert!(req.body.is_none());
    }

    #[test]
    fn build_update_document_reads_id_and_rev() {
        let input = doc(json!({"_id": "dune", "_rev": "3-x+y", "title": "Dune Messiah"}));
        let req = client().build_update_document("books", &input).unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:5984/books/dune");
        assert_eq!(req.query_param("rev"), Some("3-x+y"));
        let body: Value = serde_json::from_str(req.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["_rev"], "3-x+y");
    }

    #[test]
    fn build_bulk_docs_sends_array_unmodified() {
        let docs = vec![doc(json!({"_id": "x"})), doc(json!({"_id": "y"}))];
        let req = client().build_bulk_docs("books", &docs).unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:5984/books/_bulk_docs");
        assert_eq!(req.body.as_deref(), Some(r#"[{"_id":"x"},{"_id":"y"}]"#));
    }

    #[test]
    fn missing_trailing_slash_is_added() {
        let client = DocStoreClient::new(&Config::new("http://localhost:5984", "a", "b"));
        assert_eq!(client.base_url(), "http://localhost:5984/");
        assert_eq!(client.build_all_databases().url, "http://localhost:5984/_all_dbs");
    }

    #[test]
    fn parse_all_databases_success() {
        let value = parse_all_databases(response(200, r#"["a","b"]"#)).unwrap();
        assert_eq!(value, json!(["a", "b"]));
    }

    #[test]
    fn parse_all_databases_bad_json() {
        let err = parse_all_databases(response(200, "not json")).unwrap_err();
        assert!(matches!(err, DocStoreError::Decode(_)));
    }

    #[test]
    fn parse_body_passes_error_statuses_through() {
        let value = parse_body(response(404, r#"{"error":"not_found","reason":"missing"}"#));
        assert_eq!(value, json!({"error": "not_found", "reason": "missing"}));
    }

    #[test]
    fn parse_body_falls_back_to_text() {
        assert_eq!(parse_body(response(502, "Bad Gateway")), json!("Bad Gateway"));
        assert_eq!(parse_body(response(200, "")), Value::Null);
    }

    #[test]
    fn parse_body_keeps_whitespace_only_body_as_text() {
        assert_eq!(parse_body(response(200, "  \n")), json!("  \n"));
    }

    #[test]
    fn build_add_document_without_id_targets_database() {
        let input = doc(json!({"title": "Untitled"}));
        let req = client().build_add_document("books", &input).unwrap();
        assert_eq!(req.url, "http://localhost:5984/books/");
        let req = client().build_update_document("books", &input).unwrap();
        assert_eq!(req.url, "http://localhost:5984/books/");
        assert_eq!(req.query_param("rev"), Some(""));
    }
}
