use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;

use healthsync_core::{config, JsonRecordStore, LocalRecordStore, RecordId, SyncConfig};
use healthsync_sync::{
    DeleteOutcome, ExternalHealthStore, ResyncOutcome, SandboxHealthStore, SweepReport,
    SyncCoordinator, SyncError, WithTimeout,
};

use crate::error::{io_err, DaemonError};
use crate::paths::{config_path, health_store_path, healthsync_root, records_path};

/// Work the runtime performs on behalf of a caller or the sweep ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncJob {
    Sweep,
    Resync(RecordId),
    Delete(RecordId),
}

impl SyncJob {
    fn label(&self) -> &'static str {
        match self {
            SyncJob::Sweep => "sweep",
            SyncJob::Resync(_) => "resync",
            SyncJob::Delete(_) => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Sweep(SweepReport),
    Resync { id: RecordId, outcome: ResyncOutcome },
    Delete(DeleteOutcome),
}

type JobReply = oneshot::Sender<Result<JobOutcome, SyncError>>;

struct Envelope {
    job: SyncJob,
    source: &'static str,
    respond_to: JobReply,
}

/// Submits jobs to a running service.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("job", &self.job)
            .field("source", &self.source)
            .finish()
    }
}

impl SyncHandle {
    /// Queue `job`. The job runs to completion even if the returned receiver
    /// is dropped.
    pub async fn submit(
        &self,
        job: SyncJob,
    ) -> Result<oneshot::Receiver<Result<JobOutcome, SyncError>>, DaemonError> {
        self.enqueue(job, "caller").await
    }

    /// Queue `job` and wait for its outcome.
    pub async fn run(&self, job: SyncJob) -> Result<JobOutcome, DaemonError> {
        let rx = self.submit(job).await?;
        let outcome = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("job reply"))?;
        Ok(outcome?)
    }

    async fn enqueue(
        &self,
        job: SyncJob,
        source: &'static str,
    ) -> Result<oneshot::Receiver<Result<JobOutcome, SyncError>>, DaemonError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                job,
                source,
                respond_to,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("job queue"))?;
        Ok(rx)
    }
}

/// A running job processor and sweep ticker.
pub struct Service {
    handle: SyncHandle,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), DaemonError>>)>,
}

impl Service {
    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop accepting jobs, then wait for every job already dispatched to
    /// finish before the processor and ticker tasks are joined.
    pub async fn shutdown(self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(());
        for (task, join) in self.tasks {
            handle_join(task, join.await)?;
        }
        Ok(())
    }
}

/// Start the job processor and the periodic reconciliation ticker.
pub fn spawn_service<S>(coordinator: Arc<SyncCoordinator<S>>, config: &SyncConfig) -> Service
where
    S: LocalRecordStore + 'static,
{
    let (tx, rx) = mpsc::channel::<Envelope>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let handle = SyncHandle { tx };

    let processor = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(job_processor_task(coordinator, rx, shutdown.subscribe()))
    };

    let ticker = {
        let shutdown = shutdown_tx.clone();
        let handle = handle.clone();
        let period = config.sweep_interval();
        tokio::spawn(async move { sweep_ticker_task(handle, period, shutdown.subscribe()).await })
    };

    Service {
        handle,
        shutdown_tx,
        tasks: vec![("job_processor", processor), ("sweep_ticker", ticker)],
    }
}

/// Start the runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run against the stores under `home` until ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let config = config::load_at(&home)?;
    let local = JsonRecordStore::open_file(records_path(&home))?;
    let sandbox = SandboxHealthStore::open_file(health_store_path(&home))?;
    let external: Arc<dyn ExternalHealthStore> =
        Arc::new(WithTimeout::new(sandbox, config.external_timeout()));
    let coordinator = Arc::new(SyncCoordinator::new(
        local,
        Arc::downgrade(&external),
        &config,
    ));

    let service = spawn_service(coordinator, &config);
    tracing::info!(
        home = %home.display(),
        config = %config_path(&home).display(),
        sweep_interval_secs = config.sweep_interval().as_secs(),
        "healthsync daemon started"
    );

    // Catch up on drift accumulated while the daemon was down.
    let _ = service.handle().enqueue(SyncJob::Sweep, "startup").await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received ctrl-c, shutting down daemon"),
        Err(err) => tracing::warn!(error = %err, "ctrl-c handler failed; shutting down"),
    }
    service.shutdown().await?;
    drop(external);
    Ok(())
}

async fn job_processor_task<S>(
    coordinator: Arc<SyncCoordinator<S>>,
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError>
where
    S: LocalRecordStore + 'static,
{
    let mut jobs = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(joined) = jobs.join_next(), if !jobs.is_empty() => log_job_join(joined),
            maybe_job = rx.recv() => {
                let Some(envelope) = maybe_job else { break };
                let coordinator = coordinator.clone();
                // Each job owns its task so a slow sweep never blocks a resync.
                jobs.spawn(async move {
                    let started = Instant::now();
                    let Envelope { job, source, respond_to } = envelope;
                    let result = execute(&coordinator, job).await;
                    match &result {
                        Ok(_) => tracing::info!(
                            job = job.label(),
                            source,
                            duration_ms = started.elapsed().as_millis(),
                            "job completed",
                        ),
                        Err(err) => tracing::warn!(
                            job = job.label(),
                            source,
                            error = %err,
                            "job failed",
                        ),
                    }
                    let _ = respond_to.send(result);
                });
            }
        }
    }

    // A job past its external write must also reach the local store.
    if !jobs.is_empty() {
        tracing::info!(in_flight = jobs.len(), "waiting for running jobs");
    }
    while let Some(joined) = jobs.join_next().await {
        log_job_join(joined);
    }
    Ok(())
}

fn log_job_join(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "job task failed");
    }
}

async fn execute<S: LocalRecordStore>(
    coordinator: &SyncCoordinator<S>,
    job: SyncJob,
) -> Result<JobOutcome, SyncError> {
    match job {
        SyncJob::Sweep => Ok(JobOutcome::Sweep(coordinator.reconcile().await)),
        SyncJob::Resync(id) => {
            let outcome = coordinator.resync(&id).await?;
            Ok(JobOutcome::Resync { id, outcome })
        }
        SyncJob::Delete(id) => Ok(JobOutcome::Delete(coordinator.delete(&id).await?)),
    }
}

async fn sweep_ticker_task(
    handle: SyncHandle,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                // Fire and forget; the processor logs the outcome.
                if handle.enqueue(SyncJob::Sweep, "ticker").await.is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let root = healthsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task(format!("{task} task join failure: {err}"))),
    }
}

/// Install the fmt subscriber, honouring `RUST_LOG`. Safe to call twice.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
