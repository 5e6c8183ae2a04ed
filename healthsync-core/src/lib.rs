//! Healthsync core library: health record entity, local record store,
//! configuration and candidate derivation.
//!
//! - [`types`]: [`HealthRecord`], [`Category`], [`SyncState`] and friends
//! - [`error`]: [`ValidationError`], [`RecordStoreError`], [`ConfigError`]
//! - [`record_store`]: [`LocalRecordStore`] and its JSON / in-memory backends
//! - [`config`]: [`SyncConfig`] load / defaults
//! - [`scan`]: turning an OCR scan result into candidate records
//! - [`store_lock`]: cross-process lock shared by every file-backed store

pub mod config;
pub mod error;
pub mod record_store;
pub mod scan;
pub mod store_lock;
pub mod types;

pub use config::SyncConfig;
pub use error::{ConfigError, RecordStoreError, UnknownCategory, ValidationError};
pub use record_store::{JsonRecordStore, LocalRecordStore, MemoryRecordStore};
pub use store_lock::StoreLock;
pub use types::{
    Category, HealthRecord, RecordId, SyncEvent, SyncState, TimeWindow,
    DEFAULT_WINDOW_TOLERANCE_SECS,
};
