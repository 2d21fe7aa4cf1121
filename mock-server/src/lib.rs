//! Request-capturing stand-in for a CouchDB server.
//!
//! Every request is recorded before routing so tests can assert the exact
//! method, path, query, headers and body a client sent. Routes implement
//! the subset of the CouchDB HTTP API the client uses, backed by `Store`.
//! A stubbed path short-circuits routing and answers with a fixed status
//! and raw body, which is how tests provoke malformed responses.

pub mod store;

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Body,
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use tracing::info;

pub use store::{Database, Store, StoreError, WriteResult};

/// Default `_find` page size when the query names no limit.
const DEFAULT_FIND_LIMIT: u64 = 25;

/// A request as received by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    pub method: String,
    /// Path as sent, still percent-encoded.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Decoded query parameters, in order.
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Default)]
struct Shared {
    store: Store,
    captured: Vec<CapturedRequest>,
    stubs: HashMap<String, (u16, String)>,
}

/// Server state shared by all handlers. Cheap to clone.
#[derive(Clone, Default)]
pub struct AppState {
    shared: Arc<RwLock<Shared>>,
    authorization: Option<Arc<str>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `Authorization: Basic base64(key:secret)` on every route but
    /// `/_all_dbs`.
    pub fn with_credentials(mut self, key: &str, secret: &str) -> Self {
        let credential = STANDARD.encode(format!("{key}:{secret}"));
        self.authorization = Some(Arc::from(format!("Basic {credential}")));
        self
    }

    pub async fn create_database(&self, name: &str) -> Result<(), StoreError> {
        self.shared.write().await.store.create_database(name)
    }

    /// Answer every request for `path` with `status` and the raw `body`.
    pub async fn stub(&self, path: &str, status: u16, body: &str) {
        self.shared
            .write()
            .await
            .stubs
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.shared.read().await.captured.clone()
    }

    /// Fetch a stored document directly, bypassing HTTP.
    pub async fn document(&self, db: &str, id: &str) -> Result<Value, StoreError> {
        self.shared.read().await.store.database(db)?.get(id)
    }
}

/// Router with fresh, unauthenticated state.
pub fn app() -> Router {
    router(AppState::new())
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/{db}", put(create_database))
        .route("/{db}/_find", post(find))
        .route("/{db}/_all_docs", get(all_docs))
        .route("/{db}/_changes", get(changes))
        .route("/{db}/_bulk_docs", post(bulk_docs))
        .route(
            "/{db}/_design/{name}",
            get(get_design).put(put_design).delete(delete_design),
        )
        .route("/{db}/_design/{ddoc}/_view/{view}", get(query_view))
        .route(
            "/{db}/{id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/_all_dbs", get(all_dbs))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), capture))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state)).await
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

type Reply = Result<(StatusCode, Json<Value>), StoreError>;

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

async fn capture(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    let params = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    let captured = CapturedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        params,
        headers: parts
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
    };
    info!(method = %captured.method, path = %captured.path, "captured request");

    let stub = {
        let mut shared = state.shared.write().await;
        let stub = shared.stubs.get(&captured.path).cloned();
        shared.captured.push(captured);
        stub
    };
    if let Some((status, body)) = stub {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        return (status, body).into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = &state.authorization {
        let supplied = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if supplied != Some(&**expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized", "reason": "Name or password is incorrect."})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn all_dbs(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.shared.read().await.store.names())
}

async fn create_database(State(state): State<AppState>, Path(db): Path<String>) -> Reply {
    state.shared.write().await.store.create_database(&db)?;
    Ok((StatusCode::CREATED, Json(json!({"ok": true}))))
}

async fn find(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Json(query): Json<Value>,
) -> Reply {
    let selector = query
        .get("selector")
        .and_then(Value::as_object)
        .ok_or_else(|| StoreError::BadRequest("Missing required key: selector".to_string()))?;
    let limit = query
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(DEFAULT_FIND_LIMIT);
    let shared = state.shared.read().await;
    let result = shared.store.database(&db)?.find(selector, limit as usize);
    Ok((StatusCode::OK, Json(result)))
}

async fn all_docs(State(state): State<AppState>, Path(db): Path<String>) -> Reply {
    let shared = state.shared.read().await;
    Ok((StatusCode::OK, Json(shared.store.database(&db)?.all_docs())))
}

async fn changes(State(state): State<AppState>, Path(db): Path<String>) -> Reply {
    let shared = state.shared.read().await;
    Ok((StatusCode::OK, Json(shared.store.database(&db)?.changes())))
}

/// Accepts both `{"docs": [...]}` and a bare array of documents.
async fn bulk_docs(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Json(payload): Json<Value>,
) -> Reply {
    let docs = match payload {
        Value::Array(docs) => docs,
        Value::Object(mut wrapper) => match wrapper.remove("docs") {
            Some(Value::Array(docs)) => docs,
            _ => {
                return Err(StoreError::BadRequest(
                    "POST body must include `docs` parameter.".to_string(),
                ))
            }
        },
        _ => {
            return Err(StoreError::BadRequest(
                "Request body must be a JSON object".to_string(),
            ))
        }
    };
    let mut shared = state.shared.write().await;
    let results = shared.store.database_mut(&db)?.bulk(docs);
    Ok((StatusCode::CREATED, Json(Value::Array(results))))
}

async fn get_document(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
) -> Reply {
    read_document(&state, &db, &id).await
}

async fn put_document(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Map<String, Value>>,
) -> Reply {
    write_document(&state, &db, &id, body, params.get("rev").map(String::as_str)).await
}

async fn delete_document(
    State(state): State<AppState>,
    Path((db, id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    remove_document(&state, &db, &id, params.get("rev").map(String::as_str)).await
}

async fn get_design(
    State(state): State<AppState>,
    Path((db, name)): Path<(String, String)>,
) -> Reply {
    read_document(&state, &db, &format!("_design/{name}")).await
}

async fn put_design(
    State(state): State<AppState>,
    Path((db, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Map<String, Value>>,
) -> Reply {
    let id = format!("_design/{name}");
    write_document(&state, &db, &id, body, params.get("rev").map(String::as_str)).await
}

async fn delete_design(
    State(state): State<AppState>,
    Path((db, name)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let id = format!("_design/{name}");
    remove_document(&state, &db, &id, params.get("rev").map(String::as_str)).await
}

async fn query_view(
    State(state): State<AppState>,
    Path((db, ddoc, view)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let start_key = json_param(&params, "start_key")?;
    let end_key = json_param(&params, "end_key")?;
    let include_docs = params.get("include_docs").is_some_and(|v| v == "true");
    let shared = state.shared.read().await;
    let result = shared.store.database(&db)?.view(
        &ddoc,
        &view,
        start_key.as_ref(),
        end_key.as_ref(),
        include_docs,
    )?;
    Ok((StatusCode::OK, Json(result)))
}

async fn read_document(state: &AppState, db: &str, id: &str) -> Reply {
    let shared = state.shared.read().await;
    Ok((StatusCode::OK, Json(shared.store.database(db)?.get(id)?)))
}

async fn write_document(
    state: &AppState,
    db: &str,
    id: &str,
    body: Map<String, Value>,
    rev: Option<&str>,
) -> Reply {
    let mut shared = state.shared.write().await;
    let written = shared.store.database_mut(db)?.put(id, body, rev)?;
    Ok((StatusCode::CREATED, Json(written.to_json())))
}

async fn remove_document(state: &AppState, db: &str, id: &str, rev: Option<&str>) -> Reply {
    let mut shared = state.shared.write().await;
    let written = shared.store.database_mut(db)?.delete(id, rev)?;
    Ok((StatusCode::OK, Json(written.to_json())))
}

fn json_param(params: &HashMap<String, String>, name: &str) -> Result<Option<Value>, StoreError> {
    params
        .get(name)
        .map(|raw| {
            serde_json::from_str(raw)
                .map_err(|_| StoreError::BadRequest(format!("Invalid JSON in {name}")))
        })
        .transpose()
}
