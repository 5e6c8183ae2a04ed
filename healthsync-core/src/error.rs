//! Error types for healthsync-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Category, RecordId};

/// A record that breaks the entity invariants.
///
/// These indicate a broken upstream contract; a well-behaved confirmation
/// flow never produces them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Blood pressure carries exactly one of systolic/diastolic, or neither.
    #[error("blood-pressure record {id} must carry both systolic and diastolic")]
    IncompletePressure { id: RecordId },

    /// A non blood-pressure record carries a systolic or diastolic value.
    #[error("{category} record {id} must not carry systolic/diastolic values")]
    UnexpectedPressure { id: RecordId, category: Category },

    /// Blood-pressure primary value must hold the systolic reading.
    #[error("blood-pressure record {id} primary value {primary} does not match systolic {systolic}")]
    PrimaryMismatch {
        id: RecordId,
        primary: f64,
        systolic: f64,
    },

    /// Non-finite or non-positive magnitude.
    #[error("record {id} has invalid {field}: {value}")]
    InvalidValue {
        id: RecordId,
        field: &'static str,
        value: f64,
    },
}

/// A category string that does not name one of the supported categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown category '{0}'; expected: weight, height, blood-pressure, heart-rate, blood-glucose, body-temperature")]
pub struct UnknownCategory(pub String);

/// All errors that can arise from local record store operations.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (save path).
    #[error("record store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store file exists but is not valid JSON for the expected shape.
    #[error("failed to parse record store at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A stored or inserted record breaks the entity invariants.
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),

    /// No record with this id exists.
    #[error("record {id} not found")]
    NotFound { id: RecordId },

    /// A record with this id is already stored.
    #[error("record {id} already exists")]
    Duplicate { id: RecordId },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.healthsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Convenience constructor for [`RecordStoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RecordStoreError {
    RecordStoreError::Io {
        path: path.into(),
        source,
    }
}

/// Errors from loading `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
