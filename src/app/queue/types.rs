//! Core data structures for the transfer queue
//!
//! Transfer kinds and states, the task record the scheduler owns, and the
//! view served to polling clients.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app::models::RemoteObjectRef;
use crate::app::progress::{format_size, Direction};

/// What a transfer does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Download,
    Upload,
    BatchDownload,
    BatchUpload,
}

/// Concurrency pool a kind is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindSlot {
    Download,
    Upload,
    Batch,
}

impl TransferKind {
    /// Downloads are the kinds affected by pause
    pub fn is_download(&self) -> bool {
        matches!(self, TransferKind::Download | TransferKind::BatchDownload)
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, TransferKind::BatchDownload | TransferKind::BatchUpload)
    }

    pub fn direction(&self) -> Direction {
        if self.is_download() {
            Direction::Download
        } else {
            Direction::Upload
        }
    }

    pub fn slot(&self) -> KindSlot {
        match self {
            TransferKind::Download => KindSlot::Download,
            TransferKind::Upload => KindSlot::Upload,
            TransferKind::BatchDownload | TransferKind::BatchUpload => KindSlot::Batch,
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferKind::Download => "download",
            TransferKind::Upload => "upload",
            TransferKind::BatchDownload => "batch-download",
            TransferKind::BatchUpload => "batch-upload",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    /// Waiting for a free slot
    Pending,
    /// Being executed
    Working,
    /// Interrupted by pause, about to be re-queued
    Paused,
    /// Finished successfully
    Completed,
    /// Failed; may be retried
    Error,
    /// Canceled by a caller
    Canceled,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Error | TransferState::Canceled
        )
    }

    /// States a persisted record can be resumed from
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TransferState::Pending | TransferState::Working | TransferState::Paused
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where the bytes of a transfer come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferSource {
    /// A remote object to download
    Remote { object: RemoteObjectRef },
    /// A local file to upload into a channel
    LocalFile { path: PathBuf, channel_id: i64 },
    /// Ordered child transfers
    Batch { items: Vec<BatchItem> },
}

/// One child of a batch transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub name: String,
    pub size: u64,
    pub source: TransferSource,
    /// Target file for download items
    pub destination_path: Option<PathBuf>,
}

impl BatchItem {
    pub fn download(object: RemoteObjectRef, destination: PathBuf) -> Self {
        Self {
            name: object.file_name.clone(),
            size: object.size,
            source: TransferSource::Remote { object },
            destination_path: Some(destination),
        }
    }

    pub fn upload(path: PathBuf, channel_id: i64, name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            source: TransferSource::LocalFile { path, channel_id },
            destination_path: None,
        }
    }
}

/// A queued or executing transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTask {
    pub internal_id: Uuid,
    pub kind: TransferKind,
    pub source: TransferSource,
    /// Target file for downloads
    pub destination_path: Option<PathBuf>,
    pub name: String,
    pub total_size: u64,
    pub transmitted_bytes: u64,
    pub state: TransferState,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Indices of finished batch children
    pub completed_parts: Vec<usize>,
    /// Registered by a blocking caller rather than promoted by the queue
    pub foreground: bool,
}

impl TransferTask {
    fn new(
        kind: TransferKind,
        source: TransferSource,
        destination_path: Option<PathBuf>,
        name: String,
        total_size: u64,
    ) -> Self {
        Self {
            internal_id: Uuid::new_v4(),
            kind,
            source,
            destination_path,
            name,
            total_size,
            transmitted_bytes: 0,
            state: TransferState::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
            completed_parts: Vec::new(),
            foreground: false,
        }
    }

    /// Download a remote object into `destination`
    pub fn download(object: RemoteObjectRef, destination: PathBuf) -> Self {
        let name = object.file_name.clone();
        let size = object.size;
        Self::new(
            TransferKind::Download,
            TransferSource::Remote { object },
            Some(destination),
            name,
            size,
        )
    }

    /// Upload a local file into a channel
    pub fn upload(path: PathBuf, channel_id: i64, name: impl Into<String>, size: u64) -> Self {
        Self::new(
            TransferKind::Upload,
            TransferSource::LocalFile { path, channel_id },
            None,
            name.into(),
            size,
        )
    }

    /// Download several objects one after another
    pub fn batch_download(name: impl Into<String>, items: Vec<BatchItem>) -> Self {
        let size = items.iter().map(|item| item.size).sum();
        Self::new(
            TransferKind::BatchDownload,
            TransferSource::Batch { items },
            None,
            name.into(),
            size,
        )
    }

    /// Upload several files one after another
    pub fn batch_upload(name: impl Into<String>, items: Vec<BatchItem>) -> Self {
        let size = items.iter().map(|item| item.size).sum();
        Self::new(
            TransferKind::BatchUpload,
            TransferSource::Batch { items },
            None,
            name.into(),
            size,
        )
    }

    /// The remote object of a single download
    pub fn remote_object(&self) -> Option<&RemoteObjectRef> {
        match &self.source {
            TransferSource::Remote { object } => Some(object),
            _ => None,
        }
    }

    /// Completion percentage in `[0, 100]`
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return if self.state == TransferState::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.transmitted_bytes as f64 / self.total_size as f64 * 100.0).min(100.0)
    }
}

/// How a run ended, as reported by a runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Canceled,
}

impl TaskOutcome {
    pub fn state(&self) -> TransferState {
        match self {
            TaskOutcome::Completed => TransferState::Completed,
            TaskOutcome::Failed(_) => TransferState::Error,
            TaskOutcome::Canceled => TransferState::Canceled,
        }
    }
}

/// Change notification published by the queue
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A task changed state
    TaskChanged(TransferTask),
    /// Download promotion halted
    Paused,
    /// Download promotion resumed
    Resumed,
}

/// Snapshot of queue occupancy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub working: usize,
    pub held: usize,
    pub foreground: usize,
    pub completed: usize,
    pub failed: usize,
    pub canceled: usize,
    pub paused: bool,
}

/// Task as presented to polling clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskView {
    pub id: Uuid,
    pub kind: TransferKind,
    pub state: TransferState,
    pub name: String,
    pub total_size: u64,
    pub transmitted_bytes: u64,
    pub progress: f64,
    pub size_string: String,
    pub transmitted_string: String,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub foreground: bool,
}

impl From<&TransferTask> for TaskView {
    fn from(task: &TransferTask) -> Self {
        Self {
            id: task.internal_id,
            kind: task.kind,
            state: task.state,
            name: task.name.clone(),
            total_size: task.total_size,
            transmitted_bytes: task.transmitted_bytes,
            progress: (task.progress_percent() * 10.0).round() / 10.0,
            size_string: format_size(task.total_size),
            transmitted_string: format_size(task.transmitted_bytes),
            retry_count: task.retry_count,
            error_message: task.error_message.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            foreground: task.foreground,
        }
    }
}
