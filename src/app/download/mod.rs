//! Full-object download orchestrator
//!
//! Serves callers that need a whole object on disk, such as a file
//! download endpoint. A bounded number of these run at once; a caller that
//! cannot get a slot within the acquire timeout is told the server is busy.
//! The transfer itself runs in a spawned task registered with the queue as
//! a foreground transfer, so it shows up in task listings and rate
//! accounting. Dropping the caller's future cancels it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::app::cache::{file_len, CacheStore};
use crate::app::models::RemoteObjectRef;
use crate::app::provider::ObjectCatalog;
use crate::app::queue::{TransferQueue, TransferTask};
use crate::app::worker::{outcome_of, TransferWorker};
use crate::constants::download;
use crate::errors::{ConfigError, DownloadError, DownloadResult, ProviderError, TransferError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Full downloads running at once
    pub max_concurrent: usize,
    /// How long a caller waits for a slot
    pub acquire_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: download::MAX_CONCURRENT,
            acquire_timeout: download::ACQUIRE_TIMEOUT,
        }
    }
}

impl DownloadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid(
                "download.max_concurrent",
                self.max_concurrent,
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// How a completed download was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStatus {
    /// Already complete on disk
    Hit,
    /// Completed by another caller while this one waited
    HitAfterWait,
    /// Fetched for this caller
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::HitAfterWait => "HIT-AFTER-WAIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete local copy of an object
#[derive(Debug, Clone)]
pub struct CompletedDownload {
    pub path: PathBuf,
    pub object: RemoteObjectRef,
    /// Name to present to the client
    pub file_name: String,
    pub cache_status: CacheStatus,
}

pub struct DownloadOrchestrator {
    catalog: Arc<ObjectCatalog>,
    cache: Arc<CacheStore>,
    worker: TransferWorker,
    queue: Arc<TransferQueue>,
    slots: Arc<Semaphore>,
    config: DownloadConfig,
}

impl fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("config", &self.config)
            .field("available_slots", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    pub fn new(
        catalog: Arc<ObjectCatalog>,
        cache: Arc<CacheStore>,
        worker: TransferWorker,
        queue: Arc<TransferQueue>,
        config: DownloadConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            catalog,
            cache,
            worker,
            queue,
            slots,
            config,
        }
    }

    /// Free download slots
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Make sure the whole object is on disk and return its path
    pub async fn ensure_complete(
        &self,
        channel_id: i64,
        message_id: i64,
        name: Option<&str>,
    ) -> DownloadResult<CompletedDownload> {
        let object = self.catalog.resolve(channel_id, message_id).await?;
        let file_name = object.display_name(name).to_string();
        let cache_key = object.cache_key(name);

        let entry = self.cache.entry(&cache_key, object.size).await?;
        if entry.complete {
            debug!("Cache hit for {}", cache_key);
            return Ok(CompletedDownload {
                path: entry.file_path,
                object,
                file_name,
                cache_status: CacheStatus::Hit,
            });
        }

        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            self.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DownloadError::Canceled),
            Err(_) => {
                warn!("No download slot for {} within {:?}", cache_key, self.config.acquire_timeout);
                return Err(DownloadError::Busy {
                    seconds: self.config.acquire_timeout.as_secs(),
                });
            }
        };

        // Another writer may be finishing this file right now. Holding the
        // lock until the task is registered keeps lazy fill from growing the
        // file past the recorded offset.
        let path = entry.file_path;
        let guard = self.cache.locks().lock(&path).await;
        let entry = self.cache.entry(&cache_key, object.size).await?;
        if entry.complete {
            return Ok(CompletedDownload {
                path,
                object,
                file_name,
                cache_status: CacheStatus::HitAfterWait,
            });
        }

        info!(
            "Downloading {} ({} of {} bytes cached)",
            cache_key, entry.cached_bytes, object.size
        );
        let mut task = TransferTask::download(object.clone(), path.clone());
        task.name = file_name.clone();
        task.transmitted_bytes = entry.cached_bytes;
        let ctx = self.queue.begin_foreground(task.clone()).await;
        drop(guard);

        // The caller going away cancels the transfer
        let cancel_on_drop = ctx.cancel_token().clone().drop_guard();
        let worker = self.worker.clone();
        let queue = self.queue.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            let result = worker.execute(&task, &ctx).await;
            queue.finish_foreground(&ctx, outcome_of(&result)).await;
            result
        });

        let result = handle.await.map_err(|e| DownloadError::Failed {
            message: e.to_string(),
        })?;
        cancel_on_drop.disarm();

        match result {
            Ok(()) => {}
            Err(TransferError::Canceled) => return Err(DownloadError::Canceled),
            Err(TransferError::Remote(ProviderError::NotFound {
                channel_id,
                message_id,
            })) => {
                // Deleted upstream after its metadata was memoized
                self.catalog.forget(channel_id, message_id).await;
                return Err(DownloadError::NotFound {
                    channel_id,
                    message_id,
                });
            }
            Err(e) => {
                return Err(DownloadError::Failed {
                    message: e.to_string(),
                })
            }
        }

        let length = file_len(&path).await?;
        if length < object.size {
            return Err(DownloadError::Failed {
                message: format!("only {} of {} bytes on disk", length, object.size),
            });
        }

        Ok(CompletedDownload {
            path,
            object,
            file_name,
            cache_status: CacheStatus::Miss,
        })
    }
}
