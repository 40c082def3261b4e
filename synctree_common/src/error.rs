use crate::ResourcePath;
use thiserror::Error;

/// Errors surfaced by the synchronization core
///
/// `ContentIo` is recoverable: the merge engine downgrades it to a per-file
/// conflict. `Classification` and `SchedulingViolation` are fatal to the call
/// that raised them.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Diff tree inconsistent at {path}: {reason}")]
    Classification { path: ResourcePath, reason: String },

    #[error("Scheduling violation: {0}")]
    SchedulingViolation(String),

    #[error("Content IO error on {path}: {source}")]
    ContentIo {
        path: ResourcePath,
        #[source]
        source: StoreError,
    },

    #[error("Remote state error on {path}: {source}")]
    Remote {
        path: ResourcePath,
        #[source]
        source: StoreError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Synchronization context has been disposed")]
    Disposed,

    #[error("Path error: {0}")]
    Path(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failures reported by content stores and remote state providers
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Other(String),
}
