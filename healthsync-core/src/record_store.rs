//! Local record store: durable persistence of [`HealthRecord`]s.
//!
//! # Storage layout
//!
//! ```text
//! ~/.healthsync/
//!   records.json      (mode 0600, written via .tmp sibling + rename)
//! ```
//!
//! # API pattern
//!
//! Path-dependent functions come in two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Writers from different processes are serialized through a
//! `records.json.lock` sibling (see [`crate::store_lock`]).
//!
//! The store has no transactional coupling to the external health store; the
//! two are reconciled, never committed together.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, RecordStoreError};
use crate::store_lock::{lock_path, StoreLock};
use crate::types::{Category, HealthRecord, RecordId, SyncState};

/// Current on-disk format version.
pub const STORE_VERSION: u32 = 1;

/// Operations the sync core needs from local persistence.
///
/// Within a process the coordinator is the single owner and serializes
/// access. Backends shared between processes re-read their storage inside
/// every mutation and on [`LocalRecordStore::reload`].
pub trait LocalRecordStore: Send {
    /// Insert a new record. Rejects invalid records and duplicate ids.
    fn insert(&mut self, record: HealthRecord) -> Result<(), RecordStoreError>;

    fn update_sync_state(&mut self, id: &RecordId, state: SyncState)
        -> Result<(), RecordStoreError>;

    fn update_notes(&mut self, id: &RecordId, notes: Option<String>)
        -> Result<(), RecordStoreError>;

    fn delete(&mut self, id: &RecordId) -> Result<(), RecordStoreError>;

    fn get(&self, id: &RecordId) -> Option<HealthRecord>;

    /// All records, newest `timestamp` first.
    fn list_all(&self) -> Vec<HealthRecord>;

    fn records_of(&self, category: Category) -> Vec<HealthRecord> {
        self.list_all()
            .into_iter()
            .filter(|r| r.category == category)
            .collect()
    }

    fn recent(&self, limit: usize) -> Vec<HealthRecord> {
        self.list_all().into_iter().take(limit).collect()
    }

    /// Pick up changes other processes made to the backing storage.
    fn reload(&mut self) -> Result<(), RecordStoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared record-set operations
// ---------------------------------------------------------------------------

fn sort_newest_first(records: &mut [HealthRecord]) {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
}

fn apply_insert(
    records: &mut Vec<HealthRecord>,
    record: HealthRecord,
) -> Result<(), RecordStoreError> {
    record.validate()?;
    if records.iter().any(|r| r.id == record.id) {
        return Err(RecordStoreError::Duplicate { id: record.id });
    }
    records.push(record);
    sort_newest_first(records);
    Ok(())
}

fn find_mut<'a>(
    records: &'a mut [HealthRecord],
    id: &RecordId,
) -> Result<&'a mut HealthRecord, RecordStoreError> {
    records
        .iter_mut()
        .find(|r| r.id == *id)
        .ok_or(RecordStoreError::NotFound { id: *id })
}

fn apply_delete(records: &mut Vec<HealthRecord>, id: &RecordId) -> Result<(), RecordStoreError> {
    let before = records.len();
    records.retain(|r| r.id != *id);
    if records.len() == before {
        return Err(RecordStoreError::NotFound { id: *id });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Non-durable store, for tests and throwaway runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Vec<HealthRecord>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalRecordStore for MemoryRecordStore {
    fn insert(&mut self, record: HealthRecord) -> Result<(), RecordStoreError> {
        apply_insert(&mut self.records, record)
    }

    fn update_sync_state(
        &mut self,
        id: &RecordId,
        state: SyncState,
    ) -> Result<(), RecordStoreError> {
        find_mut(&mut self.records, id)?.sync_state = state;
        Ok(())
    }

    fn update_notes(
        &mut self,
        id: &RecordId,
        notes: Option<String>,
    ) -> Result<(), RecordStoreError> {
        find_mut(&mut self.records, id)?.notes = notes;
        Ok(())
    }

    fn delete(&mut self, id: &RecordId) -> Result<(), RecordStoreError> {
        apply_delete(&mut self.records, id)
    }

    fn get(&self, id: &RecordId) -> Option<HealthRecord> {
        self.records.iter().find(|r| r.id == *id).cloned()
    }

    fn list_all(&self) -> Vec<HealthRecord> {
        self.records.clone()
    }
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

/// On-disk payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordStoreFile {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub records: Vec<HealthRecord>,
}

/// Durable store backed by `~/.healthsync/records.json`.
///
/// Several processes may open the same file. Each mutation takes the
/// [`StoreLock`], reloads the file, applies the change and saves atomically
/// before the in-memory view is replaced. A failed change leaves the file
/// untouched and no writer overwrites another's records.
#[derive(Debug)]
pub struct JsonRecordStore {
    path: PathBuf,
    records: Vec<HealthRecord>,
}

/// `<home>/.healthsync/records.json`: pure, no I/O.
pub fn store_path_at(home: &Path) -> PathBuf {
    home.join(".healthsync").join("records.json")
}

impl JsonRecordStore {
    /// Open the store under `home`, loading existing records.
    ///
    /// A missing file is an empty store; it is created on first mutation.
    pub fn open_at(home: &Path) -> Result<Self, RecordStoreError> {
        Self::open_file(store_path_at(home))
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, RecordStoreError> {
        Self::open_at(&home()?)
    }

    /// Open a store at an explicit file path.
    pub fn open_file(path: PathBuf) -> Result<Self, RecordStoreError> {
        let records = load_file(&path)?;
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to the current on-disk record set under the store
    /// lock. `change` returns whether anything needs saving.
    fn mutate<F>(&mut self, change: F) -> Result<(), RecordStoreError>
    where
        F: FnOnce(&mut Vec<HealthRecord>) -> Result<bool, RecordStoreError>,
    {
        ensure_store_dir(&self.path)?;
        let _lock = StoreLock::acquire(&self.path).map_err(|e| io_err(lock_path(&self.path), e))?;
        let current = load_file(&self.path)?;
        let mut next = current.clone();
        let saved = change(&mut next).and_then(|dirty| {
            if dirty {
                save_file(&self.path, &next)
            } else {
                Ok(())
            }
        });
        // The view follows the file whether or not the change went through.
        self.records = if saved.is_ok() { next } else { current };
        saved
    }
}

impl LocalRecordStore for JsonRecordStore {
    fn insert(&mut self, record: HealthRecord) -> Result<(), RecordStoreError> {
        self.mutate(|records| apply_insert(records, record).map(|()| true))
    }

    fn update_sync_state(
        &mut self,
        id: &RecordId,
        state: SyncState,
    ) -> Result<(), RecordStoreError> {
        self.mutate(|records| {
            let record = find_mut(records, id)?;
            if record.sync_state == state {
                return Ok(false);
            }
            record.sync_state = state;
            Ok(true)
        })
    }

    fn update_notes(
        &mut self,
        id: &RecordId,
        notes: Option<String>,
    ) -> Result<(), RecordStoreError> {
        self.mutate(|records| {
            find_mut(records, id)?.notes = notes;
            Ok(true)
        })
    }

    fn delete(&mut self, id: &RecordId) -> Result<(), RecordStoreError> {
        self.mutate(|records| apply_delete(records, id).map(|()| true))
    }

    fn get(&self, id: &RecordId) -> Option<HealthRecord> {
        self.records.iter().find(|r| r.id == *id).cloned()
    }

    fn list_all(&self) -> Vec<HealthRecord> {
        self.records.clone()
    }

    /// Saves go through rename, so an unlocked read never sees a torn file.
    fn reload(&mut self) -> Result<(), RecordStoreError> {
        self.records = load_file(&self.path)?;
        Ok(())
    }
}

fn load_file(path: &Path) -> Result<Vec<HealthRecord>, RecordStoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let file: RecordStoreFile =
        serde_json::from_str(&contents).map_err(|source| RecordStoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    let mut records = file.records;
    for record in &records {
        record.validate()?;
    }
    sort_newest_first(&mut records);
    Ok(records)
}

/// Write flow: serialize → `records.json.tmp` sibling → `chmod 0600` → `rename`.
fn save_file(path: &Path, records: &[HealthRecord]) -> Result<(), RecordStoreError> {
    ensure_store_dir(path)?;
    let payload = RecordStoreFile {
        version: STORE_VERSION,
        saved_at: Utc::now(),
        records: records.to_vec(),
    };
    let json = serde_json::to_string_pretty(&payload)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Create the store directory (mode 0700) if it is missing.
fn ensure_store_dir(path: &Path) -> Result<(), RecordStoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid record store path"),
        ));
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

fn home() -> Result<PathBuf, RecordStoreError> {
    dirs::home_dir().ok_or(RecordStoreError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RecordStoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RecordStoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RecordStoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RecordStoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, 9, minute, 0).unwrap()
    }

    #[test]
    fn store_path_is_correct() {
        let home = TempDir::new().expect("tempdir");
        assert!(store_path_at(home.path()).ends_with(".healthsync/records.json"));
    }

    #[test]
    fn open_missing_file_is_empty() {
        let home = TempDir::new().expect("tempdir");
        let store = JsonRecordStore::open_at(home.path()).expect("open");
        assert!(store.list_all().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn list_all_is_newest_first() {
        let mut store = MemoryRecordStore::new();
        for minute in [5, 30, 10] {
            store
                .insert(HealthRecord::new(Category::Weight, 70.0, at(minute)))
                .expect("insert");
        }
        let minutes: Vec<_> = store
            .list_all()
            .iter()
            .map(|r| r.timestamp)
            .collect();
        assert_eq!(minutes, vec![at(30), at(10), at(5)]);
    }

    #[test]
    fn insert_rejects_duplicate_ids() {
        let mut store = MemoryRecordStore::new();
        let record = HealthRecord::new(Category::Height, 175.0, at(0));
        store.insert(record.clone()).expect("first insert");
        let err = store.insert(record).unwrap_err();
        assert!(matches!(err, RecordStoreError::Duplicate { .. }));
    }

    #[test]
    fn insert_rejects_half_blood_pressure() {
        let mut store = MemoryRecordStore::new();
        let mut record = HealthRecord::blood_pressure(120.0, 80.0, at(0));
        record.systolic = None;
        let err = store.insert(record).unwrap_err();
        assert!(matches!(err, RecordStoreError::Invalid(_)));
        assert!(store.list_all().is_empty());
    }

    #[test]
    fn json_store_survives_reopen() {
        let home = TempDir::new().expect("tempdir");
        let record = HealthRecord::blood_pressure(120.0, 80.0, at(0)).with_notes("after walk");
        let id = record.id;
        {
            let mut store = JsonRecordStore::open_at(home.path()).expect("open");
            store.insert(record).expect("insert");
            store
                .update_sync_state(&id, SyncState::Synced)
                .expect("update state");
        }
        let reopened = JsonRecordStore::open_at(home.path()).expect("reopen");
        let loaded = reopened.get(&id).expect("record present");
        assert_eq!(loaded.sync_state, SyncState::Synced);
        assert_eq!(loaded.diastolic, Some(80.0));
        assert_eq!(loaded.notes.as_deref(), Some("after walk"));
    }

    #[test]
    fn atomic_save_cleans_up_tmp() {
        let home = TempDir::new().expect("tempdir");
        let mut store = JsonRecordStore::open_at(home.path()).expect("open");
        store
            .insert(HealthRecord::new(Category::HeartRate, 72.0, at(0)))
            .expect("insert");
        let tmp = store_path_at(home.path()).with_extension("json.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[cfg(unix)]
    #[test]
    fn store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().expect("tempdir");
        let mut store = JsonRecordStore::open_at(home.path()).expect("open");
        store
            .insert(HealthRecord::new(Category::HeartRate, 72.0, at(0)))
            .expect("insert");
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn delete_missing_record_is_not_found() {
        let mut store = MemoryRecordStore::new();
        let err = store.delete(&RecordId::new()).unwrap_err();
        assert!(matches!(err, RecordStoreError::NotFound { .. }));
    }

    #[test]
    fn failed_save_leaves_view_unchanged() {
        let home = TempDir::new().expect("tempdir");
        let mut store = JsonRecordStore::open_at(home.path()).expect("open");
        let record = HealthRecord::new(Category::Weight, 70.0, at(0));
        store.insert(record.clone()).expect("insert");

        // Replace the store directory with a file so the next save fails.
        let dir = store.path().parent().unwrap().to_path_buf();
        std::fs::remove_dir_all(&dir).expect("remove dir");
        std::fs::write(&dir, b"not a directory").expect("block dir");

        let err = store
            .insert(HealthRecord::new(Category::Weight, 71.0, at(0) + Duration::minutes(1)))
            .unwrap_err();
        assert!(matches!(err, RecordStoreError::Io { .. }));
        assert_eq!(store.list_all(), vec![record]);
    }

    #[test]
    fn category_and_recent_queries() {
        let mut store = MemoryRecordStore::new();
        store
            .insert(HealthRecord::new(Category::Weight, 70.0, at(1)))
            .unwrap();
        store
            .insert(HealthRecord::blood_pressure(118.0, 79.0, at(2)))
            .unwrap();
        store
            .insert(HealthRecord::new(Category::Weight, 69.5, at(3)))
            .unwrap();
        assert_eq!(store.records_of(Category::Weight).len(), 2);
        let recent = store.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].timestamp, at(3));
    }
}
