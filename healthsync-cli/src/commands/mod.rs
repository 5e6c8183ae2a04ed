//! Subcommand implementations and the shared session plumbing.

pub mod add;
pub mod daemon;
pub mod delete;
pub mod import;
pub mod list;
pub mod notes;
pub mod permissions;
pub mod reconcile;
pub mod resync;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use colored::Colorize;

use healthsync_core::{config, HealthRecord, JsonRecordStore};
use healthsync_sync::{
    BatchOutcome, ErrorKind, ExternalHealthStore, SandboxHealthStore, SyncCoordinator, SyncError,
    WithTimeout,
};

/// Stores and coordinator for one CLI invocation.
pub(crate) struct Session {
    pub coordinator: SyncCoordinator<JsonRecordStore>,
    pub sandbox: Arc<SandboxHealthStore>,
    // The coordinator only holds a weak handle; this keeps the adapter alive.
    _external: Arc<dyn ExternalHealthStore>,
    runtime: tokio::runtime::Runtime,
}

impl Session {
    pub fn open() -> Result<Self> {
        let home = home()?;
        let config = config::load_at(&home).context("failed to load config")?;
        let local = JsonRecordStore::open_at(&home).context("failed to open record store")?;
        let sandbox = Arc::new(
            SandboxHealthStore::open_at(&home).context("failed to open health store")?,
        );
        let external: Arc<dyn ExternalHealthStore> = Arc::new(WithTimeout::new(
            sandbox.clone(),
            config.external_timeout(),
        ));
        let coordinator = SyncCoordinator::new(local, Arc::downgrade(&external), &config);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        tracing::debug!(home = %home.display(), "session opened");
        Ok(Self {
            coordinator,
            sandbox,
            _external: external,
            runtime,
        })
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Batch-write `candidates` and print what happened.
    pub fn record(&self, candidates: Vec<HealthRecord>, json: bool) -> Result<()> {
        let outcome = self
            .block_on(self.coordinator.record_batch(candidates.clone()))
            .map_err(sync_failure)?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to render outcome JSON")?
            );
        } else {
            print_batch(&candidates, &outcome);
        }
        if outcome.is_complete() {
            Ok(())
        } else {
            Err(anyhow!(
                "{} record(s) could not be saved locally",
                outcome.local_failures.len()
            ))
        }
    }
}

fn print_batch(candidates: &[HealthRecord], outcome: &BatchOutcome) {
    for record in candidates {
        if outcome.persisted.contains(&record.id) {
            println!(
                "{} {} {} ({})",
                "✓".green(),
                record.category,
                record.formatted_value(),
                record.id
            );
        }
    }
    for failure in &outcome.local_failures {
        let cleanup = if failure.external_removed {
            "health store copy removed"
        } else {
            "health store copy may remain"
        };
        println!(
            "{} {} not saved: {} ({cleanup})",
            "✗".red(),
            failure.id,
            failure.error
        );
    }
}

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Attach a repair hint to authorization failures.
pub(crate) fn sync_failure(err: SyncError) -> anyhow::Error {
    match err.kind() {
        ErrorKind::Authorization => {
            let hint = match &err {
                SyncError::Authorization { category } => {
                    format!("run `healthsync permissions grant {category}`")
                }
                _ => "run `healthsync permissions status`".to_string(),
            };
            anyhow::Error::new(err).context(format!("health store access denied; {hint}"))
        }
        ErrorKind::Validation => anyhow::Error::new(err).context("record rejected"),
        ErrorKind::Store => anyhow::Error::new(err).context("sync failed"),
    }
}

/// Logs go to stderr so `--json` output stays parseable.
pub(crate) fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
