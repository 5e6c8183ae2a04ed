//! Error types for healthsync-sync.
//!
//! Every failure surfaced to a caller falls into one of three kinds (see
//! [`ErrorKind`]): authorization problems the user can repair in the platform
//! settings, validation problems that indicate a broken upstream contract,
//! and store failures (including timeouts) that are only ever retried by an
//! explicit user action.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use healthsync_core::{Category, RecordId, RecordStoreError, ValidationError};

/// Errors returned by an [`ExternalHealthStore`](crate::ExternalHealthStore)
/// adapter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalStoreError {
    /// Write permission missing or denied for the record's category.
    #[error("not authorized to write {category} data")]
    Unauthorized { category: Category },

    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),

    #[error("health store call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure reported by the backing store.
    #[error("health store failure: {0}")]
    Backend(String),
}

/// Routing classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authorization,
    Validation,
    Store,
}

/// All errors surfaced by the sync coordinator.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("health store authorization missing for {category}")]
    Authorization { category: Category },

    #[error("invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// Timeout or backend failure from the external store.
    #[error("health store error: {0}")]
    External(#[source] ExternalStoreError),

    /// The application shell has released the external store adapter.
    #[error("health store is no longer available")]
    StoreUnavailable,

    #[error("local record store error: {0}")]
    Local(#[from] RecordStoreError),

    #[error("record {id} not found")]
    RecordNotFound { id: RecordId },
}

impl From<ExternalStoreError> for SyncError {
    fn from(err: ExternalStoreError) -> Self {
        match err {
            ExternalStoreError::Unauthorized { category } => SyncError::Authorization { category },
            ExternalStoreError::Validation(err) => SyncError::Validation(err),
            other => SyncError::External(other),
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Authorization { .. } => ErrorKind::Authorization,
            SyncError::Validation(_) | SyncError::Local(RecordStoreError::Invalid(_)) => {
                ErrorKind::Validation
            }
            SyncError::External(_)
            | SyncError::StoreUnavailable
            | SyncError::Local(_)
            | SyncError::RecordNotFound { .. } => ErrorKind::Store,
        }
    }
}

/// Errors from opening or saving the file-backed sandbox store.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse health store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("home directory not found")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SandboxError {
    SandboxError::Io {
        path: path.into(),
        source,
    }
}

impl From<SandboxError> for ExternalStoreError {
    fn from(err: SandboxError) -> Self {
        ExternalStoreError::Backend(err.to_string())
    }
}
