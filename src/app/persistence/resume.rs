//! Restart recovery
//!
//! Once the provider session is ready, unfinished records are turned back
//! into queued tasks. Runs at most once per process. Objects of restored
//! downloads are seeded into the catalog so their transfers skip a metadata
//! lookup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::cache::file_len;
use crate::app::provider::ObjectCatalog;
use crate::app::queue::{TransferKind, TransferQueue, TransferSource, TransferState, TransferTask};
use crate::constants::resume;

use super::record::PersistedTaskRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Restore unfinished tasks at startup
    pub enabled: bool,
    /// Readiness poll interval
    pub poll_interval: Duration,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: resume::READY_POLL_INTERVAL,
        }
    }
}

/// What a resume pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeReport {
    pub stale_removed: usize,
    pub downloads: usize,
    pub uploads: usize,
    pub held_batches: usize,
    /// Partial files discarded because they ran ahead of the record
    pub restarted_downloads: usize,
    pub failed: usize,
}

impl ResumeReport {
    pub fn restored(&self) -> usize {
        self.downloads + self.uploads + self.held_batches
    }
}

pub struct ResumeService {
    queue: Arc<TransferQueue>,
    catalog: Arc<ObjectCatalog>,
    config: ResumeConfig,
    ran: AtomicBool,
}

impl ResumeService {
    pub fn new(
        queue: Arc<TransferQueue>,
        catalog: Arc<ObjectCatalog>,
        config: ResumeConfig,
    ) -> Self {
        Self {
            queue,
            catalog,
            config,
            ran: AtomicBool::new(false),
        }
    }

    pub fn has_run(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }

    /// Wait for the provider session, then resume. Returns `None` when
    /// cancelled first or when resume is disabled.
    pub async fn run_when_ready(&self, cancel: CancellationToken) -> Option<ResumeReport> {
        if !self.config.enabled {
            debug!("Task resume disabled");
            return None;
        }

        loop {
            if self.catalog.provider().is_ready().await {
                break;
            }
            debug!("Provider not ready, delaying task resume");
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        Some(self.resume_all().await)
    }

    /// Restore every resumable record into the queue
    pub async fn resume_all(&self) -> ResumeReport {
        let mut report = ResumeReport::default();
        if self.ran.swap(true, Ordering::SeqCst) {
            debug!("Task resume already ran");
            return report;
        }

        let persistence = self.queue.persistence().clone();
        report.stale_removed = persistence.sweep_stale().await;

        let records = match persistence.store().list_pending().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not load unfinished tasks: {}", e);
                return report;
            }
        };

        let mut downloads = Vec::new();
        let mut uploads = Vec::new();

        for record in records {
            let mut task = record.to_task();
            task.state = TransferState::Pending;

            match record.kind {
                TransferKind::Download => match self.prepare_download(&record, &mut task).await {
                    Ok(restarted) => {
                        if restarted {
                            report.restarted_downloads += 1;
                        }
                        if let TransferSource::Remote { object } = &task.source {
                            self.catalog.remember(object.clone()).await;
                        }
                        downloads.push(task);
                    }
                    Err(message) => {
                        self.mark_failed(&record, &message).await;
                        report.failed += 1;
                    }
                },
                TransferKind::Upload => {
                    if Self::upload_source_exists(&record).await {
                        // Uploads cannot continue mid-file
                        task.transmitted_bytes = 0;
                        uploads.push(task);
                    } else {
                        self.mark_failed(&record, "Source file no longer exists")
                            .await;
                        report.failed += 1;
                    }
                }
                TransferKind::BatchDownload | TransferKind::BatchUpload => {
                    self.queue.hold(task).await;
                    report.held_batches += 1;
                }
            }
        }

        report.downloads = downloads.len();
        report.uploads = uploads.len();
        // Restored downloads go ahead of anything queued since startup
        self.queue.enqueue_all(downloads, true).await;
        self.queue.enqueue_all(uploads, false).await;

        info!(
            "Resumed {} downloads, {} uploads, {} held batches ({} restarted, {} failed)",
            report.downloads,
            report.uploads,
            report.held_batches,
            report.restarted_downloads,
            report.failed
        );
        report
    }

    /// Returns whether the partial file had to be discarded
    async fn prepare_download(
        &self,
        record: &PersistedTaskRecord,
        task: &mut TransferTask,
    ) -> Result<bool, String> {
        let path = record
            .destination_path
            .clone()
            .ok_or_else(|| "Download record has no destination".to_string())?;
        let on_disk = file_len(&path).await.map_err(|e| e.to_string())?;

        if on_disk > record.transmitted_bytes {
            // The file cannot be trusted beyond what the record confirms
            info!(
                "Partial file {} ({} bytes) is ahead of its record ({} bytes), restarting",
                path.display(),
                on_disk,
                record.transmitted_bytes
            );
            fs::remove_file(&path).await.map_err(|e| e.to_string())?;
            task.transmitted_bytes = 0;
            return Ok(true);
        }

        task.transmitted_bytes = on_disk;
        Ok(false)
    }

    async fn upload_source_exists(record: &PersistedTaskRecord) -> bool {
        match &record.source {
            TransferSource::LocalFile { path, .. } => fs::metadata(path).await.is_ok(),
            _ => false,
        }
    }

    async fn mark_failed(&self, record: &PersistedTaskRecord, message: &str) {
        warn!("Not resuming task {}: {}", record.internal_id, message);
        if let Err(e) = self
            .queue
            .persistence()
            .store()
            .mark_error(record.internal_id, message)
            .await
        {
            warn!("Failed to mark task {} as failed: {}", record.internal_id, e);
        }
    }
}
