//! Error types for the document store client.
//!
//! # Design
//! HTTP status codes never become errors: a 404 or 409 from the server is a
//! successful round trip carrying an error-shaped body, and callers inspect
//! the returned value themselves. Only the transport, the strict decode of
//! the database listing, payload encoding and configuration loading fail.

use thiserror::Error;

/// Errors returned by `DocStoreClient` operations and `Config` loaders.
#[derive(Error, Debug)]
pub enum DocStoreError {
    /// Connection refused, DNS failure, timeout, invalid URL or a body that
    /// could not be read. The underlying `reqwest` error is kept unmodified.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The database listing body was not valid JSON.
    #[error("failed to decode response body: {0}")]
    Decode(#[source] serde_json::Error),

    /// A caller-supplied payload could not be encoded as JSON.
    #[error("failed to serialize request body: {0}")]
    Serialization(#[source] serde_json::Error),

    /// A configuration value is missing or the config file is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DocStoreError {
    /// True when the request never produced a response.
    pub fn is_transport(&self) -> bool {
        matches!(self, DocStoreError::Transport(_))
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, DocStoreError>;
