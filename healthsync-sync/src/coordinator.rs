//! Sync coordinator: dual-write, deletion fan-out, reconciliation and manual
//! resync between the local record store and the external health store.
//!
//! Invariants maintained here:
//! - a local record is `Synced` only after the external write for it
//!   succeeded;
//! - a batch with any failed external write persists nothing locally;
//! - the coordinator never holds a lock while awaiting the external store.
//!
//! The adapter is held through a [`Weak`] handle. The application shell owns
//! it; once the shell releases it every operation that needs the external
//! store reports [`SyncError::StoreUnavailable`] instead of panicking.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;

use healthsync_core::{
    Category, HealthRecord, LocalRecordStore, RecordId, SyncConfig, SyncEvent,
};

use crate::error::SyncError;
use crate::exclusion::RecentlySynced;
use crate::external::{AuthorizationState, ExternalHealthStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of [`SyncCoordinator::record_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Ids now present locally as `Synced`.
    pub persisted: Vec<RecordId>,
    /// Records written externally whose local insert then failed.
    pub local_failures: Vec<LocalInsertFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.local_failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalInsertFailure {
    pub id: RecordId,
    pub error: String,
    /// Whether the compensating external delete succeeded.
    pub external_removed: bool,
}

/// What happened to the external copy during a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExternalCleanup {
    Removed,
    /// The record was never synced; the external store was not contacted.
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub id: RecordId,
    pub external: ExternalCleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncOutcome {
    Synced,
    AlreadySynced,
    /// Another resync of the same record is running.
    InProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    /// Records whose external copy was looked up.
    pub checked: usize,
    /// Records skipped because they were resynced moments ago.
    pub excluded: usize,
    /// Records demoted to `NotSynced`.
    pub demoted: Vec<RecordId>,
    /// Lookups or local updates that failed; those records keep their state.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepReport {
    /// A sweep was already running.
    Skipped,
    /// The external store adapter has been released.
    Unavailable,
    Completed(SweepSummary),
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Per-record "is syncing" flag, cleared on drop.
struct SyncingGuard<'a> {
    set: &'a StdMutex<HashSet<RecordId>>,
    id: RecordId,
}

impl<'a> SyncingGuard<'a> {
    fn try_acquire(set: &'a StdMutex<HashSet<RecordId>>, id: RecordId) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(PoisonError::into_inner).insert(id);
        inserted.then_some(Self { set, id })
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct SyncCoordinator<S> {
    local: Mutex<S>,
    external: Weak<dyn ExternalHealthStore>,
    tolerance: chrono::Duration,
    recently_synced: StdMutex<RecentlySynced>,
    syncing: StdMutex<HashSet<RecordId>>,
    sweeping: AtomicBool,
    view: watch::Sender<Vec<HealthRecord>>,
}

impl<S: LocalRecordStore> SyncCoordinator<S> {
    pub fn new(local: S, external: Weak<dyn ExternalHealthStore>, config: &SyncConfig) -> Self {
        let (view, _) = watch::channel(local.list_all());
        Self {
            local: Mutex::new(local),
            external,
            tolerance: config.window_tolerance(),
            recently_synced: StdMutex::new(RecentlySynced::new(config.grace_period())),
            syncing: StdMutex::new(HashSet::new()),
            sweeping: AtomicBool::new(false),
            view,
        }
    }

    /// Live view of all records, newest first. Updated after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<Vec<HealthRecord>> {
        self.view.subscribe()
    }

    pub async fn records(&self) -> Vec<HealthRecord> {
        self.local().await.list_all()
    }

    pub async fn record(&self, id: &RecordId) -> Option<HealthRecord> {
        self.local().await.get(id)
    }

    pub fn is_syncing(&self, id: &RecordId) -> bool {
        self.syncing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Categories the external store will not accept writes for right now.
    ///
    /// Includes categories whose permission was never requested. Every
    /// category is reported once the adapter is gone.
    pub fn unauthorized_categories(&self) -> Vec<Category> {
        let Some(external) = self.external.upgrade() else {
            return Category::ALL.to_vec();
        };
        Category::ALL
            .into_iter()
            .filter(|c| external.authorization_state(*c) != AuthorizationState::Authorized)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Batch dual-write
    // -----------------------------------------------------------------------

    /// Write every candidate to the external store, then persist all of them
    /// locally as `Synced`.
    ///
    /// All candidates are validated before any external call. If any external
    /// write fails, the ones already written are removed again (best effort)
    /// and nothing is persisted locally. If a local insert fails after the
    /// external writes succeeded (after one retry), that record's external
    /// copy is removed and the failure is reported in
    /// [`BatchOutcome::local_failures`]; the other records are unaffected.
    pub async fn record_batch(
        &self,
        candidates: Vec<HealthRecord>,
    ) -> Result<BatchOutcome, SyncError> {
        if candidates.is_empty() {
            return Ok(BatchOutcome::default());
        }
        for record in &candidates {
            record.validate()?;
        }
        let external = self.external()?;
        let mut synced = self.synced_records().await;

        for (written, record) in candidates.iter().enumerate() {
            if let Err(err) = external.write(record).await {
                tracing::warn!(
                    record = %record.id,
                    category = %record.category,
                    error = %err,
                    written,
                    "external write failed; aborting batch"
                );
                self.remove_external(external.as_ref(), &candidates[..written], &synced)
                    .await;
                return Err(err.into());
            }
        }

        let mut outcome = BatchOutcome::default();
        let mut failed = Vec::new();
        {
            let mut local = self.local.lock().await;
            for mut record in candidates {
                record.sync_state = record.sync_state.apply(SyncEvent::ExternalWriteConfirmed);
                // One retry before giving up on the local copy.
                let inserted = local
                    .insert(record.clone())
                    .or_else(|_| local.insert(record.clone()));
                match inserted {
                    Ok(()) => {
                        outcome.persisted.push(record.id);
                        synced.push(record);
                    }
                    Err(err) => failed.push((record, err)),
                }
            }
        }

        for (record, err) in failed {
            let external_removed = self
                .remove_external(external.as_ref(), std::slice::from_ref(&record), &synced)
                .await;
            tracing::warn!(
                record = %record.id,
                error = %err,
                external_removed,
                "local insert failed after external write"
            );
            outcome.local_failures.push(LocalInsertFailure {
                id: record.id,
                error: err.to_string(),
                external_removed,
            });
        }

        tracing::info!(
            persisted = outcome.persisted.len(),
            failed = outcome.local_failures.len(),
            "batch recorded"
        );
        self.publish().await;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete a record locally, removing its external copy first if it was
    /// synced. External failures are reported, never propagated; the local
    /// delete always happens.
    pub async fn delete(&self, id: &RecordId) -> Result<DeleteOutcome, SyncError> {
        let record = self
            .record(id)
            .await
            .ok_or(SyncError::RecordNotFound { id: *id })?;

        let external = if record.sync_state.is_synced() {
            self.delete_external(&record).await
        } else {
            ExternalCleanup::Skipped
        };

        self.local.lock().await.delete(id)?;
        self.recently_synced().remove(id);
        tracing::info!(record = %id, external = ?external, "record deleted");
        self.publish().await;
        Ok(DeleteOutcome { id: *id, external })
    }

    async fn delete_external(&self, record: &HealthRecord) -> ExternalCleanup {
        let external = match self.external() {
            Ok(external) => external,
            Err(err) => {
                return ExternalCleanup::Failed {
                    reason: err.to_string(),
                }
            }
        };
        let window = record.correlation_window(self.tolerance);
        match external.delete(record.category, window).await {
            Ok(()) => ExternalCleanup::Removed,
            Err(err) => {
                tracing::warn!(
                    record = %record.id,
                    error = %err,
                    "external delete failed; deleting locally anyway"
                );
                ExternalCleanup::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Manual resync
    // -----------------------------------------------------------------------

    /// Push one `NotSynced` record to the external store.
    ///
    /// On success the record becomes `Synced` and is excluded from sweeps
    /// for the grace period. On failure its state is left unchanged.
    pub async fn resync(&self, id: &RecordId) -> Result<ResyncOutcome, SyncError> {
        let record = self
            .record(id)
            .await
            .ok_or(SyncError::RecordNotFound { id: *id })?;
        if record.sync_state.is_synced() {
            return Ok(ResyncOutcome::AlreadySynced);
        }
        let Some(_syncing) = SyncingGuard::try_acquire(&self.syncing, *id) else {
            tracing::debug!(record = %id, "resync already in progress");
            return Ok(ResyncOutcome::InProgress);
        };
        // A resync that finished between the check above and taking the
        // guard has already written the external copy.
        let record = self
            .record(id)
            .await
            .ok_or(SyncError::RecordNotFound { id: *id })?;
        if record.sync_state.is_synced() {
            return Ok(ResyncOutcome::AlreadySynced);
        }
        let external = self.external()?;

        if let Err(err) = external.write(&record).await {
            tracing::warn!(record = %id, error = %err, "resync failed");
            return Err(err.into());
        }

        self.recently_synced().mark(*id, Instant::now());
        let synced = record.sync_state.apply(SyncEvent::ExternalWriteConfirmed);
        let updated = self.local.lock().await.update_sync_state(id, synced);
        if let Err(err) = updated {
            // Keep the invariant: no external copy without a synced local record.
            self.recently_synced().remove(id);
            let synced = self.synced_records().await;
            self.remove_external(external.as_ref(), std::slice::from_ref(&record), &synced)
                .await;
            return Err(err.into());
        }

        tracing::info!(record = %id, category = %record.category, "record resynced");
        self.publish().await;
        Ok(ResyncOutcome::Synced)
    }

    // -----------------------------------------------------------------------
    // Reconciliation sweep
    // -----------------------------------------------------------------------

    /// Demote every `Synced` record whose external copy has disappeared.
    ///
    /// Records resynced within the grace period are skipped. A failed
    /// lookup leaves the record as it is. Concurrent calls return
    /// [`SweepReport::Skipped`].
    pub async fn reconcile(&self) -> SweepReport {
        let Some(_sweeping) = SweepGuard::try_acquire(&self.sweeping) else {
            tracing::debug!("reconciliation already running");
            return SweepReport::Skipped;
        };
        let Ok(external) = self.external() else {
            tracing::warn!("reconciliation skipped: health store unavailable");
            return SweepReport::Unavailable;
        };

        // Snapshot records before exclusions: a resync marks its record
        // excluded before persisting it as synced.
        let synced: Vec<HealthRecord> = self
            .records()
            .await
            .into_iter()
            .filter(|r| r.sync_state.is_synced())
            .collect();
        let excluded = self.recently_synced().active(Instant::now());

        let mut summary = SweepSummary::default();
        for record in synced {
            if excluded.contains(&record.id) {
                summary.excluded += 1;
                continue;
            }
            summary.checked += 1;
            let window = record.correlation_window(self.tolerance);
            match external.exists(record.category, window).await {
                Ok(true) => {}
                Ok(false) => match self.demote(&record.id).await {
                    Ok(true) => summary.demoted.push(record.id),
                    Ok(false) => {}
                    Err(err) => {
                        summary.errors += 1;
                        tracing::warn!(record = %record.id, error = %err, "demotion failed");
                    }
                },
                Err(err) => {
                    summary.errors += 1;
                    tracing::warn!(
                        record = %record.id,
                        error = %err,
                        "existence check failed; keeping sync state"
                    );
                }
            }
        }

        tracing::info!(
            checked = summary.checked,
            excluded = summary.excluded,
            demoted = summary.demoted.len(),
            errors = summary.errors,
            "reconciliation finished"
        );
        if !summary.demoted.is_empty() {
            self.publish().await;
        }
        SweepReport::Completed(summary)
    }

    /// Returns whether the record was demoted. Records deleted or already
    /// demoted since the sweep snapshot are left alone.
    async fn demote(&self, id: &RecordId) -> Result<bool, SyncError> {
        let mut local = self.local().await;
        let Some(current) = local.get(id) else {
            return Ok(false);
        };
        if !current.sync_state.is_synced() {
            return Ok(false);
        }
        let state = current.sync_state.apply(SyncEvent::ExternalCopyMissing);
        local.update_sync_state(id, state)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Local-only edits
    // -----------------------------------------------------------------------

    /// Notes never reach the external store.
    pub async fn update_notes(
        &self,
        id: &RecordId,
        notes: Option<String>,
    ) -> Result<(), SyncError> {
        self.local.lock().await.update_notes(id, notes)?;
        self.publish().await;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Lock the local store and pick up writes made by other processes. A
    /// failed reload is logged and the last loaded view is used.
    async fn local(&self) -> MutexGuard<'_, S> {
        let mut local = self.local.lock().await;
        if let Err(err) = local.reload() {
            tracing::warn!(error = %err, "local store reload failed; using cached records");
        }
        local
    }

    async fn synced_records(&self) -> Vec<HealthRecord> {
        let mut records = self.local().await.list_all();
        records.retain(|r| r.sync_state.is_synced());
        records
    }

    fn external(&self) -> Result<Arc<dyn ExternalHealthStore>, SyncError> {
        self.external.upgrade().ok_or(SyncError::StoreUnavailable)
    }

    fn recently_synced(&self) -> StdMutexGuard<'_, RecentlySynced> {
        self.recently_synced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Best-effort compensating delete; failures are only logged. Returns
    /// whether every external copy was removed.
    ///
    /// The delete matches by correlation key, so a record whose window also
    /// covers a record in `synced` is left in place rather than taking the
    /// other record's external copy with it.
    async fn remove_external(
        &self,
        external: &dyn ExternalHealthStore,
        records: &[HealthRecord],
        synced: &[HealthRecord],
    ) -> bool {
        let mut removed_all = true;
        for record in records {
            let window = record.correlation_window(self.tolerance);
            let shared = synced.iter().find(|other| {
                other.id != record.id
                    && other.category == record.category
                    && window.contains(other.timestamp)
            });
            if let Some(other) = shared {
                tracing::warn!(
                    record = %record.id,
                    shares_window_with = %other.id,
                    "compensating external delete skipped"
                );
                removed_all = false;
                continue;
            }
            if let Err(err) = external.delete(record.category, window).await {
                tracing::error!(
                    record = %record.id,
                    error = %err,
                    "compensating external delete failed"
                );
                removed_all = false;
            }
        }
        removed_all
    }

    async fn publish(&self) {
        let records = self.local().await.list_all();
        self.view.send_replace(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxHealthStore;
    use chrono::{TimeZone, Utc};
    use healthsync_core::{MemoryRecordStore, SyncState};

    fn coordinator(
        external: &Arc<SandboxHealthStore>,
    ) -> SyncCoordinator<MemoryRecordStore> {
        let weak: Weak<SandboxHealthStore> = Arc::downgrade(external);
        SyncCoordinator::new(MemoryRecordStore::new(), weak, &SyncConfig::default())
    }

    fn weight(minute: u32) -> HealthRecord {
        HealthRecord::new(
            Category::Weight,
            70.0,
            Utc.with_ymd_and_hms(2025, 10, 16, 9, minute, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let external = Arc::new(SandboxHealthStore::in_memory());
        let sync = coordinator(&external);
        let outcome = sync.record_batch(Vec::new()).await.expect("batch");
        assert_eq!(outcome, BatchOutcome::default());
        assert_eq!(external.calls().writes, 0);
    }

    #[tokio::test]
    async fn subscribers_see_batch_results() {
        let external = Arc::new(SandboxHealthStore::in_memory());
        let sync = coordinator(&external);
        let mut view = sync.subscribe();
        sync.record_batch(vec![weight(1)]).await.expect("batch");
        assert!(view.has_changed().expect("sender alive"));
        let records = view.borrow_and_update().clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn notes_stay_local() {
        let external = Arc::new(SandboxHealthStore::in_memory());
        let sync = coordinator(&external);
        let record = weight(2);
        let id = record.id;
        sync.record_batch(vec![record]).await.expect("batch");
        let writes = external.calls().writes;

        sync.update_notes(&id, Some("after breakfast".into()))
            .await
            .expect("notes");
        assert_eq!(
            sync.record(&id).await.and_then(|r| r.notes).as_deref(),
            Some("after breakfast")
        );
        assert_eq!(external.calls().writes, writes);
    }

    #[test]
    fn sweep_guard_is_exclusive() {
        let flag = AtomicBool::new(false);
        let first = SweepGuard::try_acquire(&flag);
        assert!(first.is_some());
        assert!(SweepGuard::try_acquire(&flag).is_none());
        drop(first);
        assert!(SweepGuard::try_acquire(&flag).is_some());
    }
}
