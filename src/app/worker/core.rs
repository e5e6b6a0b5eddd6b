//! Transfer worker implementation
//!
//! Executes the tasks the queue promotes. Downloads append to the shared
//! cache file under its writer lock and pick up from whatever is already on
//! disk. Uploads cannot continue mid-file, so each attempt starts over.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app::cache::{file_len, CacheStore};
use crate::app::models::RemoteObjectRef;
use crate::app::provider::{RemoteProvider, UploadProgress};
use crate::app::queue::{
    BatchItem, RunContext, TaskOutcome, TaskRunner, TransferKind, TransferSource, TransferTask,
};
use crate::errors::{TransferError, TransferResult};

use super::config::WorkerConfig;

/// Reports progress of one transfer, offset by bytes already done in a batch
struct Progress<'a> {
    ctx: &'a RunContext,
    base: u64,
}

impl<'a> Progress<'a> {
    fn new(ctx: &'a RunContext) -> Self {
        Self { ctx, base: 0 }
    }

    fn at(ctx: &'a RunContext, base: u64) -> Self {
        Self { ctx, base }
    }

    async fn report(&self, delta: u64, position: u64) {
        self.ctx.report(delta, self.base + position).await;
    }
}

/// Executes downloads, uploads and batches against the provider
#[derive(Clone)]
pub struct TransferWorker {
    provider: Arc<dyn RemoteProvider>,
    cache: Arc<CacheStore>,
    config: WorkerConfig,
}

impl std::fmt::Debug for TransferWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransferWorker {
    pub fn new(
        provider: Arc<dyn RemoteProvider>,
        cache: Arc<CacheStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one task to completion
    pub async fn execute(&self, task: &TransferTask, ctx: &RunContext) -> TransferResult<()> {
        match (&task.kind, &task.source) {
            (TransferKind::Download, TransferSource::Remote { object }) => {
                let destination = task.destination_path.as_deref().ok_or_else(|| {
                    TransferError::InvalidTask {
                        reason: "download without destination".to_string(),
                    }
                })?;
                self.download(object, destination, &Progress::new(ctx))
                    .await
                    .map(|_| ())
            }
            (TransferKind::Upload, TransferSource::LocalFile { path, channel_id }) => {
                let message_id = self
                    .upload(path, *channel_id, &task.name, &Progress::new(ctx))
                    .await?;
                info!("Uploaded {} as message {}", task.name, message_id);
                Ok(())
            }
            (
                TransferKind::BatchDownload | TransferKind::BatchUpload,
                TransferSource::Batch { items },
            ) => self.run_batch(task, items, ctx).await,
            (kind, _) => Err(TransferError::InvalidTask {
                reason: format!("{} task has a mismatched source", kind),
            }),
        }
    }

    /// Fill `destination` with the whole object, resuming from its length
    async fn download(
        &self,
        object: &RemoteObjectRef,
        destination: &Path,
        progress: &Progress<'_>,
    ) -> TransferResult<u64> {
        let cancel = progress.ctx.cancel_token();
        let guard = tokio::select! {
            guard = self.cache.locks().lock(destination) => guard,
            _ = cancel.cancelled() => return Err(TransferError::Canceled),
        };

        let total = object.size;
        let mut offset = file_len(destination).await?;
        if offset > total {
            warn!(
                "{} is larger than its object ({} > {}), starting over",
                destination.display(),
                offset,
                total
            );
            tokio::fs::remove_file(destination)
                .await
                .map_err(|e| TransferError::io(destination, e))?;
            offset = 0;
        }

        if offset > 0 {
            debug!("Resuming {} at byte {}", object.file_name, offset);
        }
        progress.report(0, offset).await;

        let alignment = self.config.alignment;
        while offset < total {
            if cancel.is_cancelled() {
                return Err(TransferError::Canceled);
            }

            // An unaligned resume first reads up to the next boundary
            let length = if offset % alignment != 0 {
                alignment - offset % alignment
            } else {
                self.config.chunk_size
            }
            .min(total - offset);

            let data = tokio::select! {
                result = self.provider.fetch_range(object, offset, length) => result?,
                _ = cancel.cancelled() => return Err(TransferError::Canceled),
            };
            if (data.len() as u64) != length {
                return Err(TransferError::ShortRead {
                    offset,
                    expected: length,
                    actual: data.len() as u64,
                });
            }

            offset = self.cache.append(&guard, destination, offset, &data).await?;
            progress.report(length, offset).await;
        }

        if total == 0 {
            // Nothing to fetch, but a complete copy still exists on disk
            self.cache.touch(&guard, destination).await?;
        }

        let on_disk = file_len(destination).await?;
        if on_disk < total {
            return Err(TransferError::Incomplete {
                received: on_disk,
                expected: total,
            });
        }
        Ok(on_disk)
    }

    /// Upload a file with retries, returning the new message id
    async fn upload(
        &self,
        path: &Path,
        channel_id: i64,
        name: &str,
        progress: &Progress<'_>,
    ) -> TransferResult<i64> {
        let cancel = progress.ctx.cancel_token();
        let policy = self.config.upload_retry;
        let mut attempt = 0;

        loop {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(TransferError::SourceMissing {
                    path: path.to_path_buf(),
                });
            }
            attempt += 1;
            progress.report(0, 0).await;

            let (tx, mut rx) = mpsc::unbounded_channel::<u64>();
            let callback: UploadProgress = Arc::new(move |sent| {
                let _ = tx.send(sent);
            });
            let upload = self.provider.upload(channel_id, name, path, callback);
            tokio::pin!(upload);

            let mut sent_so_far = 0;
            let result = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(TransferError::Canceled),
                    Some(sent) = rx.recv() => {
                        progress.report(sent.saturating_sub(sent_so_far), sent).await;
                        sent_so_far = sent;
                    }
                    result = &mut upload => break result,
                }
            };
            while let Ok(sent) = rx.try_recv() {
                progress.report(sent.saturating_sub(sent_so_far), sent).await;
                sent_so_far = sent;
            }

            match result {
                Ok(message_id) => return Ok(message_id),
                Err(e) if policy.allows_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!(
                        "Upload of {} failed (attempt {}/{}): {}, retrying in {:?}",
                        name, attempt, policy.max_attempts, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(TransferError::Canceled),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Children run one after another; finished children are skipped
    async fn run_batch(
        &self,
        task: &TransferTask,
        items: &[BatchItem],
        ctx: &RunContext,
    ) -> TransferResult<()> {
        let mut done: u64 = items
            .iter()
            .enumerate()
            .filter(|(index, _)| task.completed_parts.contains(index))
            .map(|(_, item)| item.size)
            .sum();

        for (index, item) in items.iter().enumerate() {
            if task.completed_parts.contains(&index) {
                continue;
            }
            if ctx.is_cancelled() {
                return Err(TransferError::Canceled);
            }

            let progress = Progress::at(ctx, done);
            match &item.source {
                TransferSource::Remote { object } => {
                    let destination = item.destination_path.as_deref().ok_or_else(|| {
                        TransferError::InvalidTask {
                            reason: format!("batch item {} has no destination", item.name),
                        }
                    })?;
                    self.download(object, destination, &progress).await?;
                }
                TransferSource::LocalFile { path, channel_id } => {
                    self.upload(path, *channel_id, &item.name, &progress)
                        .await?;
                }
                TransferSource::Batch { .. } => {
                    return Err(TransferError::InvalidTask {
                        reason: "nested batches are not supported".to_string(),
                    })
                }
            }

            done += item.size;
            ctx.part_completed(index, done).await;
            debug!("Batch {} finished part {} ({})", task.name, index, item.name);
        }
        Ok(())
    }
}

/// Queue outcome of a finished transfer
pub fn outcome_of(result: &TransferResult<()>) -> TaskOutcome {
    match result {
        Ok(()) => TaskOutcome::Completed,
        Err(TransferError::Canceled) => TaskOutcome::Canceled,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}

#[async_trait]
impl TaskRunner for TransferWorker {
    async fn run(&self, task: TransferTask, ctx: RunContext) -> TaskOutcome {
        outcome_of(&self.execute(&task, &ctx).await)
    }
}
