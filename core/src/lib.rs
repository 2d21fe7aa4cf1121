//! Asynchronous client for a CouchDB-style document store.
//!
//! # Overview
//! Builds authenticated HTTP requests for database listing, document CRUD,
//! bulk writes, change feeds and design-document view queries, executes each
//! as a single round trip and hands back the decoded JSON body.
//!
//! # Design
//! - `DocStoreClient` is stateless: base URL, Basic credential, transport.
//! - Every operation has a pure `build_*` counterpart returning an
//!   `HttpRequest`, so the I/O boundary is explicit and testable.
//! - Status codes are not interpreted. Error bodies from the server come
//!   back as `Ok` values; only transport failures are `Err`.
//! - No retries, caching, pagination or conflict resolution.

pub mod client;
pub mod config;
pub mod design;
pub mod error;
pub mod http;
pub mod transport;
pub mod types;

pub use client::{parse_all_databases, parse_body, DocStoreClient};
pub use config::Config;
pub use design::create_design_doc;
pub use error::{DocStoreError, Result};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use transport::HttpTransport;
pub use types::{DesignDocument, Document, FindRequest, ViewDefinition};
