//! Error taxonomy for the sync core.
//!
//! Every fallible operation in the pipeline returns `SyncError`, which
//! carries enough classification for the orchestrator to decide between
//! retrying, recording and continuing, or failing the run.

use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The upstream spreadsheet service returned a non-zero code, an HTTP
    /// failure, or timed out. `retryable` marks the transient subcategory
    /// (network errors, 408/429/5xx).
    #[error("upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    /// A core-required field was missing or a coercion failed with no
    /// defaultable fallback. Scoped to a single record.
    #[error("transform error: {0}")]
    Transform(String),

    /// Document store failure.
    #[error("store error: {0}")]
    Store(String),

    /// Object store failure.
    #[error("object store error: {0}")]
    ObjectStore(String),

    /// The run was cancelled via the control channel.
    #[error("sync cancelled")]
    Cancelled,

    /// Another sync run is already active in this process.
    #[error("another sync is already running")]
    Conflict,

    /// Caller supplied invalid parameters (bad mode, unknown action).
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// A selective operation was requested without any product ids.
    #[error("productIds is required and must be non-empty")]
    MissingProductIds,

    /// A control or status request referenced a run that is not active.
    #[error("sync not found: {0}")]
    SyncNotFound(String),

    /// Missing or malformed startup configuration. Fatal.
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn upstream(message: impl Into<String>, retryable: bool) -> Self {
        SyncError::Upstream {
            message: message.into(),
            retryable,
        }
    }

    /// Transient upstream failures may be retried with backoff; everything
    /// else is terminal for the operation that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Upstream { retryable: true, .. })
    }

    /// Machine-readable code used in the API error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Upstream { .. } => "UPSTREAM_ERROR",
            SyncError::Transform(_) => "TRANSFORM_ERROR",
            SyncError::Store(_) | SyncError::ObjectStore(_) => "INTERNAL_ERROR",
            SyncError::Cancelled => "CANCELLED",
            SyncError::Conflict => "CONFLICT",
            SyncError::InvalidParams(_) => "INVALID_PARAMS",
            SyncError::MissingProductIds => "MISSING_PRODUCT_IDS",
            SyncError::SyncNotFound(_) => "SYNC_NOT_FOUND",
            SyncError::Config(_) => "CONFIG_ERROR",
        }
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Store(format!("document (de)serialization failed: {e}"))
    }
}

impl From<object_store::Error> for SyncError {
    fn from(e: object_store::Error) -> Self {
        SyncError::ObjectStore(e.to_string())
    }
}
