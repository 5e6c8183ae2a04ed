//! Cross-process exclusion for store files.
//!
//! The CLI and the daemon open the same files under `~/.healthsync/`. Every
//! writer takes [`StoreLock`] on a `<file>.lock` sibling, reloads the file,
//! applies its change and saves before releasing, so neither process writes
//! back a stale copy over the other's changes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Exclusive advisory lock, released when dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

/// `<store>.lock` next to `store`: pure, no I/O.
pub fn lock_path(store: &Path) -> PathBuf {
    let mut name = store.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    store.with_file_name(name)
}

impl StoreLock {
    /// Block until the lock for `store` is held. The parent directory must
    /// already exist.
    pub fn acquire(store: &Path) -> io::Result<Self> {
        let path = lock_path(store);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock()?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_file_sits_next_to_store() {
        assert_eq!(
            lock_path(Path::new("/home/u/.healthsync/records.json")),
            PathBuf::from("/home/u/.healthsync/records.json.lock")
        );
    }

    #[test]
    fn second_handle_waits_for_release() {
        let dir = TempDir::new().expect("tempdir");
        let store = dir.path().join("records.json");

        let held = StoreLock::acquire(&store).expect("first lock");
        let other = OpenOptions::new()
            .write(true)
            .open(held.path())
            .expect("open lock file");
        assert!(other.try_lock().is_err(), "lock is exclusive");

        drop(held);
        assert!(other.try_lock().is_ok());
    }
}
