//! Typed error taxonomy for the retrieval engine's core components.
//!
//! Each component boundary gets its own enum so callers can match on the
//! kind of failure. The application/bootstrap layer uses `anyhow` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum JournalBlobError {
    #[error("journal export not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("blob not found: {0}")]
    BlobNotFound(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session has no messages: {0}")]
    EmptySession(String),
    #[error("unsupported or malformed document: {0}")]
    ParseFailure(String),
    #[error("embedding failure: {0}")]
    EmbeddingFailure(String),
    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),
    #[error("validation failure: {0}")]
    ValidationFailure(String),
}

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("client error: {0}")]
    Client(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding api key missing or rejected")]
    Unauthorized,
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("embedding request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context assembly failed: {0}")]
    Failed(String),
}
