//! Background sync runtime: job processor plus periodic reconciliation.

mod error;
pub mod paths;
mod runtime;

pub use error::DaemonError;
pub use runtime::{
    init_tracing, run, spawn_service, start_blocking, JobOutcome, Service, SyncHandle, SyncJob,
};
