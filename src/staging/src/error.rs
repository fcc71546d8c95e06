use chrono::{DateTime, Utc};
use std::fmt;

/// An article mapping that cannot become an [`Article`](crate::Article).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// Missing required field or a field of the wrong shape
    #[error("invalid article: {0}")]
    Malformed(String),
    /// `url` is present but blank
    #[error("invalid article: url must not be empty")]
    EmptyUrl,
}

impl From<serde_json::Error> for ValidationError {
    fn from(err: serde_json::Error) -> Self {
        ValidationError::Malformed(err.to_string())
    }
}

/// Failure turning bytes into JSON values or back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("gzip stream error: {0}")]
    Compression(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The object store call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    Put,
    List,
    Delete,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Get => write!(f, "get"),
            StoreOperation::Put => write!(f, "put"),
            StoreOperation::List => write!(f, "list"),
            StoreOperation::Delete => write!(f, "delete"),
        }
    }
}

/// A failed call against the backing object store. Never retried internally.
#[derive(Debug, thiserror::Error)]
#[error("object store {operation} failed for s3://{bucket}/{key}: {source}")]
pub struct StoreError {
    pub operation: StoreOperation,
    pub bucket: String,
    pub key: String,
    #[source]
    pub source: object_store::Error,
}

impl StoreError {
    pub fn new(
        operation: StoreOperation,
        bucket: impl Into<String>,
        key: impl Into<String>,
        source: object_store::Error,
    ) -> Self {
        Self {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The canonical object exists but cannot be decoded. Never reset to empty.
    #[error("canonical object {key} is corrupt: {source}")]
    Integrity {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("pending entry {key} is malformed: {source}")]
    MalformedPending {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("compaction lease is held by {holder} until {expires_at}")]
    LeaseHeld {
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// The lease expired or was taken over while the run still needed it
    #[error("compaction lease held by {holder} was lost before commit")]
    LeaseLost { holder: String },
}

impl Error {
    /// Errors caused by the submitted data rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
