//! Internal state of the transfer queue
//!
//! Everything here is mutated under the queue's single lock.

use std::collections::{HashMap, VecDeque};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::config::QueueConfig;
use super::types::{KindSlot, QueueStats, TransferState, TransferTask};

/// A promoted task together with the handle used to stop it
#[derive(Debug)]
pub(crate) struct ActiveEntry {
    pub task: TransferTask,
    pub token: CancellationToken,
    /// Generation of this run; finishes from older runs are ignored
    pub run_id: u64,
}

#[derive(Debug, Default)]
pub struct QueueState {
    pub(crate) pending: VecDeque<TransferTask>,
    /// Ordered by promotion time
    pub(crate) active: Vec<ActiveEntry>,
    /// Restored batches waiting for an explicit trigger
    pub(crate) held: Vec<TransferTask>,
    pub(crate) foreground: HashMap<Uuid, ActiveEntry>,
    pub(crate) finished: VecDeque<TransferTask>,
    pub(crate) paused: bool,
    pub(crate) shutting_down: bool,
    next_run_id: u64,
    next_write_seq: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_run_id(&mut self) -> u64 {
        self.next_run_id += 1;
        self.next_run_id
    }

    /// Order stamp for a durable write decided under the lock
    pub(crate) fn next_write_seq(&mut self) -> u64 {
        self.next_write_seq += 1;
        self.next_write_seq
    }

    pub(crate) fn active_in_slot(&self, slot: KindSlot) -> usize {
        self.active
            .iter()
            .filter(|entry| entry.task.kind.slot() == slot)
            .count()
    }

    /// Index of the first pending task that may start now
    pub(crate) fn next_promotable(&self, config: &QueueConfig) -> Option<usize> {
        self.pending.iter().position(|task| {
            if self.paused && task.kind.is_download() {
                return false;
            }
            self.active_in_slot(task.kind.slot()) < config.bound_for(task.kind)
        })
    }

    pub(crate) fn active_index(&self, id: Uuid) -> Option<usize> {
        self.active.iter().position(|entry| entry.task.internal_id == id)
    }

    pub(crate) fn pending_index(&self, id: Uuid) -> Option<usize> {
        self.pending.iter().position(|task| task.internal_id == id)
    }

    pub(crate) fn held_index(&self, id: Uuid) -> Option<usize> {
        self.held.iter().position(|task| task.internal_id == id)
    }

    pub(crate) fn finished_index(&self, id: Uuid) -> Option<usize> {
        self.finished.iter().position(|task| task.internal_id == id)
    }

    /// Live entry (background or foreground) matching a run
    pub(crate) fn run_entry_mut(&mut self, id: Uuid, run_id: u64) -> Option<&mut ActiveEntry> {
        if let Some(entry) = self.foreground.get_mut(&id) {
            return (entry.run_id == run_id).then_some(entry);
        }
        self.active
            .iter_mut()
            .find(|entry| entry.task.internal_id == id && entry.run_id == run_id)
    }

    /// Keep a finished task for listing, dropping the oldest beyond `cap`
    pub(crate) fn push_finished(&mut self, task: TransferTask, cap: usize) {
        self.finished.push_front(task);
        while self.finished.len() > cap {
            self.finished.pop_back();
        }
    }

    pub(crate) fn find(&self, id: Uuid) -> Option<&TransferTask> {
        self.active
            .iter()
            .map(|entry| &entry.task)
            .chain(self.foreground.values().map(|entry| &entry.task))
            .chain(self.pending.iter())
            .chain(self.held.iter())
            .chain(self.finished.iter())
            .find(|task| task.internal_id == id)
    }

    /// Every known task: working first, then pending in order, then finished
    pub(crate) fn snapshot(&self) -> Vec<TransferTask> {
        let mut foreground: Vec<_> = self.foreground.values().map(|e| e.task.clone()).collect();
        foreground.sort_by_key(|task| task.created_at);

        self.active
            .iter()
            .map(|entry| entry.task.clone())
            .chain(foreground)
            .chain(self.pending.iter().cloned())
            .chain(self.held.iter().cloned())
            .chain(self.finished.iter().cloned())
            .collect()
    }

    pub(crate) fn stats(&self) -> QueueStats {
        let count_finished = |state: TransferState| {
            self.finished
                .iter()
                .filter(|task| task.state == state)
                .count()
        };
        QueueStats {
            pending: self.pending.len(),
            working: self.active.len() + self.foreground.len(),
            held: self.held.len(),
            foreground: self.foreground.len(),
            completed: count_finished(TransferState::Completed),
            failed: count_finished(TransferState::Error),
            canceled: count_finished(TransferState::Canceled),
            paused: self.paused,
        }
    }
}
