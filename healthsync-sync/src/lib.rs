//! # healthsync-sync
//!
//! Dual-write and reconciliation between the local record store and the
//! external health store.
//!
//! Build a [`SyncCoordinator`] over a [`LocalRecordStore`] and a handle to an
//! [`ExternalHealthStore`] adapter, then drive it with
//! [`SyncCoordinator::record_batch`], [`SyncCoordinator::delete`],
//! [`SyncCoordinator::resync`] and [`SyncCoordinator::reconcile`].
//!
//! [`LocalRecordStore`]: healthsync_core::LocalRecordStore

pub mod coordinator;
pub mod error;
pub mod exclusion;
pub mod external;
pub mod sandbox;

pub use coordinator::{
    BatchOutcome, DeleteOutcome, ExternalCleanup, LocalInsertFailure, ResyncOutcome,
    SweepReport, SweepSummary, SyncCoordinator,
};
pub use error::{ErrorKind, ExternalStoreError, SandboxError, SyncError};
pub use exclusion::RecentlySynced;
pub use external::{AuthorizationState, ExternalHealthStore, Permission, WithTimeout};
pub use sandbox::SandboxHealthStore;
