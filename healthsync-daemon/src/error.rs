use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the background runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] healthsync_core::ConfigError),

    #[error("record store error: {0}")]
    RecordStore(#[from] healthsync_core::RecordStoreError),

    #[error("health store error: {0}")]
    Sandbox(#[from] healthsync_sync::SandboxError),

    #[error("sync error: {0}")]
    Sync(#[from] healthsync_sync::SyncError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("task failure: {0}")]
    Task(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
