//! In-process stand-in for the platform health database.
//!
//! [`SandboxHealthStore`] implements [`ExternalHealthStore`] with the same
//! observable behaviour as the platform store: one quantity sample per
//! single-valued record, a correlation (group plus two member samples) per
//! blood-pressure record, and per-permission authorization. Optionally backed
//! by `~/.healthsync/health-store.json` so the CLI can play the role of the
//! platform between invocations. A file-backed store re-reads the file before
//! every call and changes it only under the shared [`StoreLock`], so the CLI
//! and the daemon see one platform store.
//!
//! Tests drive failure paths through the fault-injection methods: failed
//! writes, failed deletes and existence checks, replication lag, out-of-band
//! removal and per-call latency.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use healthsync_core::store_lock::lock_path;
use healthsync_core::{Category, HealthRecord, StoreLock, TimeWindow};

use crate::error::{io_err, ExternalStoreError, SandboxError};
use crate::external::{AuthorizationState, ExternalHealthStore, Permission};

pub const SANDBOX_FILE_VERSION: u32 = 1;

/// One sample as the platform store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredSample {
    Quantity {
        category: Category,
        value: f64,
        at: DateTime<Utc>,
    },
    /// Blood-pressure group with its systolic and diastolic members.
    Correlation {
        at: DateTime<Utc>,
        systolic: f64,
        diastolic: f64,
    },
}

impl StoredSample {
    fn from_record(record: &HealthRecord) -> Result<Self, ExternalStoreError> {
        record.validate()?;
        Ok(match (record.systolic, record.diastolic) {
            (Some(systolic), Some(diastolic)) => StoredSample::Correlation {
                at: record.timestamp,
                systolic,
                diastolic,
            },
            _ => StoredSample::Quantity {
                category: record.category,
                value: record.primary_value,
                at: record.timestamp,
            },
        })
    }

    pub fn category(&self) -> Category {
        match self {
            StoredSample::Quantity { category, .. } => *category,
            StoredSample::Correlation { .. } => Category::BloodPressure,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            StoredSample::Quantity { at, .. } | StoredSample::Correlation { at, .. } => *at,
        }
    }

    fn matches(&self, category: Category, window: &TimeWindow) -> bool {
        self.category() == category && window.contains(self.at())
    }
}

/// On-disk payload of the file-backed sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxFile {
    pub version: u32,
    #[serde(default)]
    pub permissions: BTreeMap<Permission, AuthorizationState>,
    #[serde(default)]
    pub samples: Vec<StoredSample>,
}

/// Number of adapter calls seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub writes: usize,
    pub deletes: usize,
    pub exists: usize,
}

#[derive(Debug, Default)]
struct Faults {
    /// Keyed by 1-based write call number.
    write_failures: HashMap<usize, ExternalStoreError>,
    delete_failure: Option<ExternalStoreError>,
    exists_failure: Option<ExternalStoreError>,
    hide_writes: bool,
    latency: Duration,
}

#[derive(Debug)]
struct Inner {
    file: SandboxFile,
    /// Accepted writes not yet visible to `exists`.
    pending: Vec<StoredSample>,
    faults: Faults,
    calls: CallCounts,
}

#[derive(Debug)]
pub struct SandboxHealthStore {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

/// `<home>/.healthsync/health-store.json`
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".healthsync").join("health-store.json")
}

impl SandboxHealthStore {
    /// Non-durable store with every permission already granted.
    pub fn in_memory() -> Self {
        let permissions = Permission::ALL
            .into_iter()
            .map(|p| (p, AuthorizationState::Authorized))
            .collect();
        Self::with_file(
            None,
            SandboxFile {
                version: SANDBOX_FILE_VERSION,
                permissions,
                samples: Vec::new(),
            },
        )
    }

    /// File-backed store under `home`. Permissions start out undetermined.
    pub fn open_at(home: &Path) -> Result<Self, SandboxError> {
        Self::open_file(store_path_at(home))
    }

    pub fn open() -> Result<Self, SandboxError> {
        let home = dirs::home_dir().ok_or(SandboxError::HomeNotFound)?;
        Self::open_at(&home)
    }

    pub fn open_file(path: PathBuf) -> Result<Self, SandboxError> {
        let file = load_file(&path)?;
        Ok(Self::with_file(Some(path), file))
    }

    fn with_file(path: Option<PathBuf>, file: SandboxFile) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                file,
                pending: Vec::new(),
                faults: Faults::default(),
                calls: CallCounts::default(),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // -----------------------------------------------------------------------
    // Permissions
    // -----------------------------------------------------------------------

    pub fn set_authorization(
        &self,
        permission: Permission,
        state: AuthorizationState,
    ) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        self.update(&mut inner, |file| {
            file.permissions.insert(permission, state);
        })
    }

    /// Set every permission `category` needs to `state`.
    pub fn set_category_authorization(
        &self,
        category: Category,
        state: AuthorizationState,
    ) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        self.update(&mut inner, |file| {
            for permission in Permission::for_category(category) {
                file.permissions.insert(*permission, state);
            }
        })
    }

    pub fn permission_state(&self, permission: Permission) -> AuthorizationState {
        self.current()
            .file
            .permissions
            .get(&permission)
            .copied()
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Samples currently visible to `exists`.
    pub fn samples(&self) -> Vec<StoredSample> {
        self.current().file.samples.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    /// Make the `n`-th write call (1-based, counted since creation) fail.
    pub fn fail_write_at(&self, n: usize, err: ExternalStoreError) {
        self.lock().faults.write_failures.insert(n, err);
    }

    pub fn fail_deletes(&self, err: Option<ExternalStoreError>) {
        self.lock().faults.delete_failure = err;
    }

    pub fn fail_exists(&self, err: Option<ExternalStoreError>) {
        self.lock().faults.exists_failure = err;
    }

    /// Hold accepted writes back from `exists` until [`Self::publish_pending`].
    pub fn hide_writes(&self, hide: bool) {
        self.lock().faults.hide_writes = hide;
    }

    pub fn publish_pending(&self) -> Result<(), SandboxError> {
        let mut inner = self.lock();
        let mut pending = std::mem::take(&mut inner.pending);
        self.update(&mut inner, |file| file.samples.append(&mut pending))
    }

    /// Delay applied before every adapter call.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().faults.latency = latency;
    }

    /// Remove samples behind the app's back, as a user editing the platform
    /// store directly would. Returns how many were removed.
    pub fn remove_out_of_band(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<usize, SandboxError> {
        let mut inner = self.lock();
        self.update(&mut inner, |file| retain_unmatched(file, category, &window))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock, then pick up changes another process saved.
    fn current(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.lock();
        if let Some(path) = &self.path {
            match load_file(path) {
                Ok(file) => inner.file = file,
                Err(err) => tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "health store reload failed; using last known state"
                ),
            }
        }
        inner
    }

    async fn pause(&self) {
        let latency = self.lock().faults.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn category_state(inner: &Inner, category: Category) -> AuthorizationState {
        Permission::for_category(category)
            .iter()
            .map(|p| inner.file.permissions.get(p).copied().unwrap_or_default())
            .fold(AuthorizationState::Authorized, AuthorizationState::combine)
    }

    /// Apply `change` to the latest file contents and persist the result
    /// (when file-backed) before making it current.
    fn update<R>(
        &self,
        inner: &mut Inner,
        change: impl FnOnce(&mut SandboxFile) -> R,
    ) -> Result<R, SandboxError> {
        let Some(path) = &self.path else {
            return Ok(change(&mut inner.file));
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let _lock = StoreLock::acquire(path).map_err(|e| io_err(lock_path(path), e))?;
        let mut next = load_file(path)?;
        let out = change(&mut next);
        save_file(path, &next)?;
        inner.file = next;
        Ok(out)
    }
}

#[async_trait]
impl ExternalHealthStore for SandboxHealthStore {
    async fn write(&self, record: &HealthRecord) -> Result<(), ExternalStoreError> {
        self.pause().await;
        let mut inner = self.current();
        inner.calls.writes += 1;
        let call = inner.calls.writes;
        if let Some(err) = inner.faults.write_failures.remove(&call) {
            return Err(err);
        }
        if !Self::category_state(&inner, record.category).is_authorized() {
            return Err(ExternalStoreError::Unauthorized {
                category: record.category,
            });
        }
        let sample = StoredSample::from_record(record)?;
        if inner.faults.hide_writes {
            tracing::debug!(record = %record.id, "sandbox write accepted but hidden");
            inner.pending.push(sample);
            return Ok(());
        }
        self.update(&mut inner, |file| file.samples.push(sample))?;
        Ok(())
    }

    async fn delete(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<(), ExternalStoreError> {
        self.pause().await;
        let mut inner = self.current();
        inner.calls.deletes += 1;
        if let Some(err) = inner.faults.delete_failure.clone() {
            return Err(err);
        }
        if !Self::category_state(&inner, category).is_authorized() {
            return Err(ExternalStoreError::Unauthorized { category });
        }
        inner.pending.retain(|s| !s.matches(category, &window));
        let removed = self.update(&mut inner, |file| retain_unmatched(file, category, &window))?;
        if removed == 0 {
            tracing::debug!(%category, "sandbox delete matched nothing");
        }
        Ok(())
    }

    async fn exists(
        &self,
        category: Category,
        window: TimeWindow,
    ) -> Result<bool, ExternalStoreError> {
        self.pause().await;
        let mut inner = self.current();
        inner.calls.exists += 1;
        if let Some(err) = inner.faults.exists_failure.clone() {
            return Err(err);
        }
        Ok(inner.file.samples.iter().any(|s| s.matches(category, &window)))
    }

    fn authorization_state(&self, category: Category) -> AuthorizationState {
        Self::category_state(&self.current(), category)
    }
}

/// Drop samples matching `(category, window)`; returns how many went.
fn retain_unmatched(file: &mut SandboxFile, category: Category, window: &TimeWindow) -> usize {
    let before = file.samples.len();
    file.samples.retain(|s| !s.matches(category, window));
    before - file.samples.len()
}

fn load_file(path: &Path) -> Result<SandboxFile, SandboxError> {
    if !path.exists() {
        return Ok(SandboxFile {
            version: SANDBOX_FILE_VERSION,
            ..SandboxFile::default()
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|source| SandboxError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_file(path: &Path, file: &SandboxFile) -> Result<(), SandboxError> {
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::TempDir;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, 9, 0, second).unwrap()
    }

    fn window(second: u32) -> TimeWindow {
        TimeWindow::around(at(second), ChronoDuration::seconds(2))
    }

    #[tokio::test]
    async fn blood_pressure_is_stored_as_correlation() {
        let store = SandboxHealthStore::in_memory();
        store
            .write(&HealthRecord::blood_pressure(120.0, 80.0, at(10)))
            .await
            .expect("write");

        assert_eq!(
            store.samples(),
            vec![StoredSample::Correlation {
                at: at(10),
                systolic: 120.0,
                diastolic: 80.0
            }]
        );
        assert!(store.exists(Category::BloodPressure, window(11)).await.unwrap());
        assert!(!store.exists(Category::HeartRate, window(11)).await.unwrap());
    }

    #[tokio::test]
    async fn half_pressure_is_a_validation_error() {
        let store = SandboxHealthStore::in_memory();
        let mut record = HealthRecord::blood_pressure(120.0, 80.0, at(10));
        record.diastolic = None;
        let err = store.write(&record).await.unwrap_err();
        assert!(matches!(err, ExternalStoreError::Validation(_)));
        assert!(store.samples().is_empty());
    }

    #[tokio::test]
    async fn one_denied_member_blocks_blood_pressure() {
        let store = SandboxHealthStore::in_memory();
        store
            .set_authorization(Permission::BloodPressureDiastolic, AuthorizationState::Denied)
            .expect("set");
        assert_eq!(
            store.authorization_state(Category::BloodPressure),
            AuthorizationState::Denied
        );
        let err = store
            .write(&HealthRecord::blood_pressure(120.0, 80.0, at(10)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExternalStoreError::Unauthorized {
                category: Category::BloodPressure
            }
        );
    }

    #[tokio::test]
    async fn delete_removes_only_the_window() {
        let store = SandboxHealthStore::in_memory();
        for second in [10, 20] {
            store
                .write(&HealthRecord::new(Category::Weight, 70.0, at(second)))
                .await
                .expect("write");
        }
        store.delete(Category::Weight, window(11)).await.expect("delete");
        assert_eq!(store.samples().len(), 1);
        assert_eq!(store.samples()[0].at(), at(20));

        // Nothing left to match; still fine.
        store.delete(Category::Weight, window(11)).await.expect("delete again");
    }

    #[tokio::test]
    async fn hidden_writes_appear_after_publish() {
        let store = SandboxHealthStore::in_memory();
        store.hide_writes(true);
        store
            .write(&HealthRecord::new(Category::HeartRate, 61.0, at(5)))
            .await
            .expect("write");
        assert!(!store.exists(Category::HeartRate, window(5)).await.unwrap());
        store.publish_pending().expect("publish");
        assert!(store.exists(Category::HeartRate, window(5)).await.unwrap());
    }

    #[tokio::test]
    async fn injected_write_failure_hits_the_numbered_call() {
        let store = SandboxHealthStore::in_memory();
        store.fail_write_at(2, ExternalStoreError::Backend("disk full".into()));
        let record = HealthRecord::new(Category::Height, 180.0, at(1));
        assert!(store.write(&record).await.is_ok());
        assert!(store.write(&record).await.is_err());
        assert!(store.write(&record).await.is_ok());
        assert_eq!(store.calls().writes, 3);
    }

    #[tokio::test]
    async fn file_store_starts_undetermined_and_persists() {
        let home = TempDir::new().expect("tempdir");
        let store = SandboxHealthStore::open_at(home.path()).expect("open");
        assert_eq!(
            store.authorization_state(Category::Weight),
            AuthorizationState::NotDetermined
        );
        store
            .set_category_authorization(Category::Weight, AuthorizationState::Authorized)
            .expect("grant");
        store
            .write(&HealthRecord::new(Category::Weight, 70.0, at(3)))
            .await
            .expect("write");
        drop(store);

        let reopened = SandboxHealthStore::open_at(home.path()).expect("reopen");
        assert!(reopened.authorization_state(Category::Weight).is_authorized());
        assert_eq!(reopened.samples().len(), 1);
        assert!(!store_path_at(home.path()).with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn file_handles_share_one_platform_store() {
        let home = TempDir::new().expect("tempdir");
        let daemon = SandboxHealthStore::open_at(home.path()).expect("open daemon side");
        let cli = SandboxHealthStore::open_at(home.path()).expect("open cli side");
        cli.set_category_authorization(Category::HeartRate, AuthorizationState::Authorized)
            .expect("grant");
        assert!(daemon.authorization_state(Category::HeartRate).is_authorized());

        daemon
            .write(&HealthRecord::new(Category::HeartRate, 58.0, at(10)))
            .await
            .expect("daemon write");
        cli.write(&HealthRecord::new(Category::HeartRate, 64.0, at(40)))
            .await
            .expect("cli write");
        assert!(daemon.exists(Category::HeartRate, window(40)).await.unwrap());

        // A delete through the stale handle must not bring back old samples.
        cli.delete(Category::HeartRate, window(10)).await.expect("cli delete");
        daemon
            .delete(Category::HeartRate, window(55))
            .await
            .expect("daemon delete");
        let remaining = SandboxHealthStore::open_at(home.path())
            .expect("reopen")
            .samples();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].at(), at(40));
    }

    #[test]
    fn out_of_band_removal_counts_matches() {
        let store = SandboxHealthStore::in_memory();
        let removed = store
            .remove_out_of_band(Category::Weight, window(0))
            .expect("remove");
        assert_eq!(removed, 0);
    }
}
