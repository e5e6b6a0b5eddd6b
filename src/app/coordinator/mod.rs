//! Gateway assembly and lifecycle
//!
//! [`Gateway`] builds every subsystem from a [`GatewayConfig`] and a
//! [`RemoteProvider`], and owns the shared handles the HTTP layer works
//! with. It also hosts the request-level operations that span several
//! subsystems: preloading an object into the cache and submitting uploads.
//!
//! # Module Organization
//!
//! - [`config`] - Runtime configuration for a whole gateway
//! - [`signals`] - Shutdown broadcast wired to OS signals
//! - [`background_tasks`] - Stale sweep, resume and event logging tasks
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_gateway::app::coordinator::{Gateway, GatewayConfig, ShutdownSignal};
//! use media_gateway::app::provider::MemoryProvider;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::with_data_root("/var/lib/media-gateway");
//! let gateway = Gateway::open(config, Arc::new(MemoryProvider::new())).await?;
//!
//! let shutdown = ShutdownSignal::new();
//! let background = gateway.start_background(&shutdown);
//!
//! // ... serve requests ...
//!
//! shutdown.trigger();
//! gateway.shutdown(background).await;
//! # Ok(())
//! # }
//! ```

pub mod background_tasks;
pub mod config;
pub mod signals;


use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::app::cache::CacheStore;
use crate::app::download::DownloadOrchestrator;
use crate::app::fetch::ChunkFetcher;
use crate::app::persistence::{
    JsonTaskStore, MemoryTaskStore, ResumeService, TaskPersistence, TaskStore,
};
use crate::app::progress::ProgressTracker;
use crate::app::provider::{ObjectCatalog, RemoteProvider};
use crate::app::queue::{BatchItem, TransferQueue, TransferTask};
use crate::app::stream::StreamServer;
use crate::app::worker::TransferWorker;
use crate::errors::{AppError, Result, TransferError};

pub use background_tasks::BackgroundTaskManager;
pub use config::{GatewayConfig, ServerConfig};
pub use signals::{wait_for_shutdown, ShutdownSignal};

/// Outcome of a preload request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadStatus {
    /// Already complete on disk
    Cached,
    /// A download for the same file is pending or working
    InProgress,
    /// A new background download was enqueued
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadOutcome {
    pub cached: bool,
    pub status: PreloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
}

impl PreloadOutcome {
    fn cached() -> Self {
        Self {
            cached: true,
            status: PreloadStatus::Cached,
            task_id: None,
        }
    }
}

/// Files to upload into one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub channel_id: i64,
    pub paths: Vec<PathBuf>,
    /// Task name, defaults to the file name or "<n> files" for a batch
    #[serde(default)]
    pub name: Option<String>,
}

/// A running gateway instance
pub struct Gateway {
    config: GatewayConfig,
    catalog: Arc<ObjectCatalog>,
    cache: Arc<CacheStore>,
    tracker: Arc<ProgressTracker>,
    persistence: Arc<TaskPersistence>,
    queue: Arc<TransferQueue>,
    downloads: Arc<DownloadOrchestrator>,
    streams: Arc<StreamServer>,
    resume: Arc<ResumeService>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Build a gateway, persisting task records under the state directory
    /// (or in memory when persistence is disabled)
    pub async fn open(config: GatewayConfig, provider: Arc<dyn RemoteProvider>) -> Result<Arc<Self>> {
        let store: Arc<dyn TaskStore> = if config.persistence.enabled {
            let dir = config.persistence.resolve_state_dir();
            debug!("Task records in {}", dir.display());
            Arc::new(JsonTaskStore::open(dir).await?)
        } else {
            info!("Task persistence disabled, records are kept in memory");
            Arc::new(MemoryTaskStore::new())
        };
        Self::with_store(config, provider, store).await
    }

    /// Build a gateway on an explicit task store
    pub async fn with_store(
        config: GatewayConfig,
        provider: Arc<dyn RemoteProvider>,
        store: Arc<dyn TaskStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let catalog = Arc::new(ObjectCatalog::new(provider.clone()));
        let cache = Arc::new(CacheStore::new(config.cache.clone()).await?);
        let tracker = ProgressTracker::new(config.progress.clone());
        let persistence = Arc::new(TaskPersistence::new(store, config.persistence.clone()));

        let worker = TransferWorker::new(provider.clone(), cache.clone(), config.worker.clone());
        let queue = TransferQueue::new(
            config.queue.clone(),
            Arc::new(worker.clone()),
            persistence.clone(),
            tracker.clone(),
        )?;

        let downloads = Arc::new(DownloadOrchestrator::new(
            catalog.clone(),
            cache.clone(),
            worker,
            queue.clone(),
            config.download.clone(),
        ));
        let streams = Arc::new(StreamServer::new(
            catalog.clone(),
            cache.clone(),
            ChunkFetcher::new(provider, config.fetch.clone()),
            config.stream.clone(),
        )
        .with_queue(queue.clone()));
        let resume = Arc::new(ResumeService::new(
            queue.clone(),
            catalog.clone(),
            config.resume.clone(),
        ));

        info!("Gateway ready, cache at {}", cache.root().display());
        Ok(Arc::new(Self {
            config,
            catalog,
            cache,
            tracker,
            persistence,
            queue,
            downloads,
            streams,
            resume,
        }))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<ObjectCatalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn persistence(&self) -> &Arc<TaskPersistence> {
        &self.persistence
    }

    pub fn queue(&self) -> &Arc<TransferQueue> {
        &self.queue
    }

    pub fn downloads(&self) -> &Arc<DownloadOrchestrator> {
        &self.downloads
    }

    pub fn streams(&self) -> &Arc<StreamServer> {
        &self.streams
    }

    pub fn resume(&self) -> &Arc<ResumeService> {
        &self.resume
    }

    /// Start resume, the stale sweep and event logging
    pub fn start_background(&self, shutdown: &ShutdownSignal) -> BackgroundTaskManager {
        let mut tasks = BackgroundTaskManager::new();
        tasks.start_event_logging(self.queue.clone(), shutdown.subscribe());
        tasks.start_resume(self.resume.clone(), shutdown.subscribe());
        if self.config.persistence.enabled {
            tasks.start_stale_sweep(self.persistence.clone(), shutdown.subscribe());
        }
        tasks
    }

    /// Warm the cache with a whole object in the background
    pub async fn preload(
        &self,
        channel_id: i64,
        message_id: i64,
        name: Option<&str>,
    ) -> Result<PreloadOutcome> {
        let object = self.catalog.resolve(channel_id, message_id).await?;
        let cache_key = object.cache_key(name);
        let entry = self.cache.entry(&cache_key, object.size).await?;
        if entry.complete {
            return Ok(PreloadOutcome::cached());
        }

        // Holding the file lock keeps its length stable until the task that
        // records it is queued; lazy fills skip the file from then on
        let _guard = self.cache.locks().lock(&entry.file_path).await;
        let entry = self.cache.entry(&cache_key, object.size).await?;
        if entry.complete {
            return Ok(PreloadOutcome::cached());
        }

        if let Some(existing) = self.queue.find_by_destination(&entry.file_path).await {
            debug!("Preload of {} already queued as {}", entry.cache_key, existing.internal_id);
            return Ok(PreloadOutcome {
                cached: false,
                status: PreloadStatus::InProgress,
                task_id: Some(existing.internal_id),
            });
        }

        let display_name = object.display_name(name).to_string();
        let mut task = TransferTask::download(object, entry.file_path);
        task.name = display_name;
        task.transmitted_bytes = entry.cached_bytes;
        let id = self.queue.enqueue(task).await;
        info!(
            "Preloading {} as task {} from byte {}",
            entry.cache_key, id, entry.cached_bytes
        );

        Ok(PreloadOutcome {
            cached: false,
            status: PreloadStatus::Queued,
            task_id: Some(id),
        })
    }

    /// Queue local files for upload
    ///
    /// One path becomes an upload task, several become a batch upload.
    pub async fn submit_upload(&self, request: UploadRequest) -> Result<Uuid> {
        if request.paths.is_empty() {
            return Err(AppError::Transfer(TransferError::InvalidTask {
                reason: "upload request without files".to_string(),
            }));
        }

        let mut files = Vec::with_capacity(request.paths.len());
        for path in request.paths {
            let metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|_| TransferError::SourceMissing { path: path.clone() })?;
            if !metadata.is_file() {
                return Err(TransferError::InvalidTask {
                    reason: format!("{} is not a file", path.display()),
                }
                .into());
            }
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            files.push((path, file_name, metadata.len()));
        }

        let channel_id = request.channel_id;
        let task = match (files.len(), request.name) {
            (1, name) => {
                let (path, file_name, size) = files.remove(0);
                let mut task = TransferTask::upload(path, channel_id, file_name, size);
                if let Some(name) = name {
                    task.name = name;
                }
                task
            }
            (count, name) => {
                let items = files
                    .into_iter()
                    .map(|(path, file_name, size)| {
                        BatchItem::upload(path, channel_id, file_name, size)
                    })
                    .collect();
                TransferTask::batch_upload(name.unwrap_or_else(|| format!("{} files", count)), items)
            }
        };

        Ok(self.queue.enqueue(task).await)
    }

    /// Stop transfers, wait for background tasks and flush pending writes
    ///
    /// Task records stay in the store so the next start can resume them.
    pub async fn shutdown(&self, background: BackgroundTaskManager) {
        info!("Shutting down gateway");
        self.queue.shutdown().await;
        background.shutdown_all().await;
        let flushed = self.persistence.flush().await;
        if flushed > 0 {
            debug!("Flushed {} pending progress writes", flushed);
        }
    }
}
