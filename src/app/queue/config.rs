//! Queue configuration and presets

use serde::{Deserialize, Serialize};

use crate::constants::queue;
use crate::errors::{QueueError, QueueResult};

use super::types::{KindSlot, TransferKind};

/// Concurrency bounds of the transfer queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Background downloads working at once
    pub max_active_downloads: usize,
    /// Uploads working at once
    pub max_active_uploads: usize,
    /// Batch transfers working at once
    pub max_active_batches: usize,
    /// Finished tasks kept for listing
    pub finished_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_active_downloads: queue::MAX_ACTIVE_DOWNLOADS,
            max_active_uploads: queue::MAX_ACTIVE_UPLOADS,
            max_active_batches: queue::MAX_ACTIVE_BATCHES,
            finished_history: queue::FINISHED_HISTORY,
        }
    }
}

impl QueueConfig {
    /// Same bound for every kind
    pub fn with_uniform_bound(bound: usize) -> Self {
        Self {
            max_active_downloads: bound,
            max_active_uploads: bound,
            max_active_batches: bound,
            ..Default::default()
        }
    }

    /// Active-task bound for a kind
    pub fn bound_for(&self, kind: TransferKind) -> usize {
        match kind.slot() {
            KindSlot::Download => self.max_active_downloads,
            KindSlot::Upload => self.max_active_uploads,
            KindSlot::Batch => self.max_active_batches,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> QueueResult<()> {
        let bounds = [
            ("max_active_downloads", self.max_active_downloads),
            ("max_active_uploads", self.max_active_uploads),
            ("max_active_batches", self.max_active_batches),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(QueueError::InvalidConfig {
                    reason: format!("{} must be greater than 0", name),
                });
            }
        }
        Ok(())
    }
}
