//! Per-record progress write rate limiting

use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::store::ProgressUpdate;

/// Lets at most one progress write per record through each interval.
/// Suppressed updates are kept so a flush can write the latest one.
#[derive(Debug)]
pub struct ProgressDebouncer {
    min_interval: Duration,
    last_write: HashMap<Uuid, Instant>,
    pending: HashMap<Uuid, ProgressUpdate>,
}

impl ProgressDebouncer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_write: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    /// Returns the update when it should be written now
    pub fn offer(&mut self, update: ProgressUpdate, now: Instant) -> Option<ProgressUpdate> {
        // Reaching 100% always goes through
        if update.progress >= 100.0 {
            self.pending.remove(&update.id);
            self.last_write.insert(update.id, now);
            return Some(update);
        }

        match self.last_write.get(&update.id) {
            Some(last) if now.saturating_duration_since(*last) < self.min_interval => {
                self.pending.insert(update.id, update);
                None
            }
            _ => {
                self.pending.remove(&update.id);
                self.last_write.insert(update.id, now);
                Some(update)
            }
        }
    }

    /// A full record write happened; it supersedes any held update
    pub fn mark_written(&mut self, id: Uuid, now: Instant) {
        self.pending.remove(&id);
        self.last_write.insert(id, now);
    }

    /// The record is gone
    pub fn forget(&mut self, id: Uuid) {
        self.pending.remove(&id);
        self.last_write.remove(&id);
    }

    /// Take every held update
    pub fn drain(&mut self) -> Vec<ProgressUpdate> {
        self.pending.drain().map(|(_, update)| update).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
