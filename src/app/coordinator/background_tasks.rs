//! Long-running maintenance tasks
//!
//! Every task here stops when the shutdown broadcast fires. The manager
//! keeps their handles so shutdown can wait for them with a timeout.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::app::persistence::{ResumeService, TaskPersistence};
use crate::app::queue::{QueueEvent, TransferQueue, TransferState};
use crate::constants::coordinator;

#[derive(Debug)]
pub struct BackgroundTaskManager {
    tasks: Vec<JoinHandle<()>>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// Periodically delete task records nobody has touched in a long time
    pub fn start_stale_sweep(
        &mut self,
        persistence: Arc<TaskPersistence>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let period = persistence.config().sweep_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; resume already swept
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = persistence.sweep_stale().await;
                        if removed > 0 {
                            info!("Removed {} stale task records", removed);
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Stale sweep received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Restore persisted tasks once the provider is ready
    pub fn start_resume(
        &mut self,
        resume: Arc<ResumeService>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async move {
            tokio::select! {
                report = resume.run_when_ready(cancel.clone()) => {
                    if let Some(report) = report {
                        info!(
                            "Resumed {} downloads and {} uploads, held {} batches ({} failed, {} restarted)",
                            report.downloads,
                            report.uploads,
                            report.held_batches,
                            report.failed,
                            report.restarted_downloads
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    cancel.cancel();
                    debug!("Resume task received shutdown signal");
                }
            }
        });

        self.tasks.push(task);
    }

    /// Log task lifecycle changes as they happen
    pub fn start_event_logging(
        &mut self,
        queue: Arc<TransferQueue>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut events = queue.subscribe();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(QueueEvent::TaskChanged(task)) => match task.state {
                            TransferState::Completed => {
                                info!("{} {} completed", task.kind, task.name);
                            }
                            TransferState::Error => {
                                error!(
                                    "{} {} failed: {}",
                                    task.kind,
                                    task.name,
                                    task.error_message.as_deref().unwrap_or("unknown error")
                                );
                            }
                            TransferState::Canceled => info!("{} {} canceled", task.kind, task.name),
                            state => debug!("{} {} is now {}", task.kind, task.name, state),
                        },
                        Ok(QueueEvent::Paused) => info!("Download queue paused"),
                        Ok(QueueEvent::Resumed) => info!("Download queue resumed"),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Event logger skipped {} task events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("Event logger received shutdown signal");
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Wait for every task to stop, giving up on each after a timeout
    pub async fn shutdown_all(self) {
        debug!("Waiting for {} background tasks", self.tasks.len());

        for task in self.tasks {
            if tokio::time::timeout(coordinator::TASK_SHUTDOWN_TIMEOUT, task)
                .await
                .is_err()
            {
                warn!(
                    "Background task did not stop within {:?}",
                    coordinator::TASK_SHUTDOWN_TIMEOUT
                );
            }
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for BackgroundTaskManager {
    fn default() -> Self {
        Self::new()
    }
}
