//! Recently-synced exclusion set.
//!
//! Right after a successful manual resync the platform store may not yet
//! report the new sample. Records in this set are skipped by the
//! reconciliation sweep until their grace period runs out, so the sweep does
//! not undo the resync.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use healthsync_core::RecordId;

/// Stand-in expiry for grace periods too long to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone)]
pub struct RecentlySynced {
    grace: Duration,
    until: HashMap<RecordId, Instant>,
}

impl RecentlySynced {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            until: HashMap::new(),
        }
    }

    /// Exclude `id` from sweeps for one grace period starting at `now`.
    /// Marking again restarts the period.
    pub fn mark(&mut self, id: RecordId, now: Instant) {
        let expiry = now
            .checked_add(self.grace)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        self.until.insert(id, expiry);
    }

    pub fn contains(&self, id: &RecordId, now: Instant) -> bool {
        matches!(self.until.get(id), Some(expiry) if now < *expiry)
    }

    pub fn remove(&mut self, id: &RecordId) {
        self.until.remove(id);
    }

    /// Drop expired entries.
    pub fn prune(&mut self, now: Instant) {
        self.until.retain(|_, expiry| now < *expiry);
    }

    /// Prune, then return the ids still excluded at `now`.
    pub fn active(&mut self, now: Instant) -> HashSet<RecordId> {
        self.prune(now);
        self.until.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.until.len()
    }

    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}
