//! Queue-facing persistence service
//!
//! Translates task transitions into store writes. Store failures are logged
//! and swallowed: losing a record only costs resumability, never a transfer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::queue::TransferTask;
use crate::constants::persistence;
use crate::errors::PersistenceError;

use super::debounce::ProgressDebouncer;
use super::record::PersistedTaskRecord;
use super::store::{MemoryTaskStore, ProgressUpdate, TaskStore};

/// Persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Write records at all
    pub enabled: bool,
    /// Directory for record files, defaults to the app state directory
    pub state_dir: Option<PathBuf>,
    /// Minimum interval between progress writes per record
    pub progress_debounce: Duration,
    /// Records idle for longer are deleted by the sweep
    pub stale_after: Duration,
    /// How often the sweep runs
    pub sweep_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: None,
            progress_debounce: persistence::PROGRESS_DEBOUNCE,
            stale_after: persistence::STALE_AFTER,
            sweep_interval: persistence::SWEEP_INTERVAL,
        }
    }
}

impl PersistenceConfig {
    /// State directory, falling back to the platform data directory
    pub fn resolve_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(crate::constants::app::APP_DIR_NAME)
                .join(crate::constants::app::STATE_DIR_NAME)
        })
    }
}

pub struct TaskPersistence {
    store: Arc<dyn TaskStore>,
    debouncer: Mutex<ProgressDebouncer>,
    config: PersistenceConfig,
}

impl std::fmt::Debug for TaskPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskPersistence")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskPersistence {
    pub fn new(store: Arc<dyn TaskStore>, config: PersistenceConfig) -> Self {
        let debouncer = ProgressDebouncer::new(config.progress_debounce);
        Self {
            store,
            debouncer: Mutex::new(debouncer),
            config,
        }
    }

    /// In-memory persistence that survives nothing
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryTaskStore::new()),
            PersistenceConfig {
                progress_debounce: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// Write the full record of a task
    pub async fn save(&self, task: &TransferTask) {
        if !self.config.enabled {
            return;
        }
        let record = PersistedTaskRecord::from_task(task);
        match self.store.save(&record).await {
            Ok(()) => {
                self.debouncer
                    .lock()
                    .await
                    .mark_written(task.internal_id, Instant::now());
            }
            Err(e) => warn!("Failed to persist task {}: {}", task.internal_id, e),
        }
    }

    /// Progress write, rate limited per record
    pub async fn progress(&self, task: &TransferTask) {
        if !self.config.enabled {
            return;
        }
        let update = ProgressUpdate {
            id: task.internal_id,
            transmitted_bytes: task.transmitted_bytes,
            progress: task.progress_percent(),
            completed_parts: task.completed_parts.clone(),
        };

        let ready = self.debouncer.lock().await.offer(update, Instant::now());
        if let Some(update) = ready {
            self.write_progress(&update).await;
        }
    }

    /// Terminal success or cancel; the record is removed
    pub async fn delete(&self, id: Uuid) {
        if !self.config.enabled {
            return;
        }
        self.debouncer.lock().await.forget(id);
        if let Err(e) = self.store.delete(id).await {
            warn!("Failed to delete task record {}: {}", id, e);
        }
    }

    /// Terminal failure; the record stays, flagged
    pub async fn mark_error(&self, task: &TransferTask, message: &str) {
        if !self.config.enabled {
            return;
        }
        let id = task.internal_id;
        self.debouncer.lock().await.forget(id);
        match self.store.mark_error(id, message).await {
            Ok(()) => {}
            Err(PersistenceError::RecordNotFound { .. }) => {
                // Never written; keep a full record so the failure is visible
                let mut record = PersistedTaskRecord::from_task(task);
                record.state = crate::app::queue::TransferState::Error;
                record.last_error = Some(message.to_string());
                if let Err(e) = self.store.save(&record).await {
                    warn!("Failed to persist failed task {}: {}", id, e);
                }
            }
            Err(e) => warn!("Failed to mark task {} as failed: {}", id, e),
        }
    }

    /// Write every held progress update, returning how many
    pub async fn flush(&self) -> usize {
        let updates = self.debouncer.lock().await.drain();
        let count = updates.len();
        for update in &updates {
            self.write_progress(update).await;
        }
        if count > 0 {
            debug!("Flushed {} pending progress updates", count);
        }
        count
    }

    /// Delete records idle for longer than `stale_after`
    pub async fn sweep_stale(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::days(7));
        let cutoff = Utc::now() - stale_after;

        match self.store.delete_older_than(cutoff).await {
            Ok(0) => 0,
            Ok(removed) => {
                info!("Removed {} stale task records", removed);
                removed
            }
            Err(e) => {
                warn!("Stale record sweep failed: {}", e);
                0
            }
        }
    }

    async fn write_progress(&self, update: &ProgressUpdate) {
        match self.store.update_progress(update).await {
            Ok(()) => {}
            // Finished between the offer and the write
            Err(PersistenceError::RecordNotFound { id }) => {
                debug!("Dropping progress for vanished record {}", id)
            }
            Err(e) => warn!("Failed to persist progress for {}: {}", update.id, e),
        }
    }
}
