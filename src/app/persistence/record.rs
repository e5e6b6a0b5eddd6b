//! Durable task record

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::queue::{TransferKind, TransferSource, TransferState, TransferTask};

/// Serialized form of a transfer, one per non-terminal task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedTaskRecord {
    pub internal_id: Uuid,
    pub kind: TransferKind,
    pub state: TransferState,
    pub name: String,
    pub source: TransferSource,
    pub destination_path: Option<PathBuf>,
    pub total_size: u64,
    pub transmitted_bytes: u64,
    pub progress: f64,
    #[serde(default)]
    pub completed_parts: Vec<usize>,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl PersistedTaskRecord {
    pub fn from_task(task: &TransferTask) -> Self {
        Self {
            internal_id: task.internal_id,
            kind: task.kind,
            state: task.state,
            name: task.name.clone(),
            source: task.source.clone(),
            destination_path: task.destination_path.clone(),
            total_size: task.total_size,
            transmitted_bytes: task.transmitted_bytes,
            progress: task.progress_percent(),
            completed_parts: task.completed_parts.clone(),
            retry_count: task.retry_count,
            created_at: task.created_at,
            started_at: task.started_at,
            last_updated: Utc::now(),
            last_error: task.error_message.clone(),
        }
    }

    /// Rebuild the in-memory task, keeping the original id and creation time
    pub fn to_task(&self) -> TransferTask {
        TransferTask {
            internal_id: self.internal_id,
            kind: self.kind,
            source: self.source.clone(),
            destination_path: self.destination_path.clone(),
            name: self.name.clone(),
            total_size: self.total_size,
            transmitted_bytes: self.transmitted_bytes,
            state: self.state,
            retry_count: self.retry_count,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: None,
            error_message: self.last_error.clone(),
            completed_parts: self.completed_parts.clone(),
            foreground: false,
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.state.is_resumable()
    }
}
