//! Transfer queue implementation
//!
//! The queue owns every background transfer from enqueue to a terminal
//! state. All mutations happen under one lock; persistence writes and event
//! publication happen after it is released, in the order the transitions
//! were decided. Each promotion starts a new run generation so a runner that
//! finishes after being paused or canceled cannot overwrite the task's newer
//! state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::persistence::TaskPersistence;
use crate::app::progress::ProgressTracker;
use crate::constants::queue;
use crate::errors::{QueueError, QueueResult};

use super::config::QueueConfig;
use super::runner::{RunContext, TaskRunner};
use super::state::{ActiveEntry, QueueState};
use super::types::{QueueEvent, QueueStats, TaskOutcome, TransferState, TransferTask};

/// Durable effect of a transition
#[derive(Debug)]
enum Write {
    Nothing,
    Save,
    Delete,
    MarkError(String),
}

#[derive(Debug)]
struct Change {
    task: TransferTask,
    write: Write,
    /// Taken under the state lock, so it follows transition order
    seq: u64,
}

impl Change {
    fn new(state: &mut QueueState, task: TransferTask, write: Write) -> Self {
        Self {
            task,
            write,
            seq: state.next_write_seq(),
        }
    }
}

/// Newest applied write per task
#[derive(Debug, Default)]
struct WriteLog {
    applied: HashMap<Uuid, u64>,
}

impl WriteLog {
    /// False when a later transition of the same task was already written
    fn admit(&mut self, id: Uuid, seq: u64) -> bool {
        if self.applied.get(&id).is_some_and(|&newest| newest > seq) {
            return false;
        }
        self.applied.insert(id, seq);

        if self.applied.len() > queue::WRITE_LOG_CAPACITY {
            let floor = seq.saturating_sub(queue::WRITE_LOG_CAPACITY as u64);
            self.applied.retain(|_, applied| *applied >= floor);
        }
        true
    }
}

pub struct TransferQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    write_log: Mutex<WriteLog>,
    runner: Arc<dyn TaskRunner>,
    persistence: Arc<TaskPersistence>,
    tracker: Arc<ProgressTracker>,
    events: broadcast::Sender<QueueEvent>,
    self_ref: Weak<TransferQueue>,
}

impl std::fmt::Debug for TransferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransferQueue {
    pub fn new(
        config: QueueConfig,
        runner: Arc<dyn TaskRunner>,
        persistence: Arc<TaskPersistence>,
        tracker: Arc<ProgressTracker>,
    ) -> QueueResult<Arc<Self>> {
        config.validate()?;
        let (events, _) = broadcast::channel(queue::EVENT_CHANNEL_CAPACITY);

        Ok(Arc::new_cyclic(|self_ref| Self {
            config,
            state: Mutex::new(QueueState::new()),
            write_log: Mutex::new(WriteLog::default()),
            runner,
            persistence,
            tracker,
            events,
            self_ref: self_ref.clone(),
        }))
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn persistence(&self) -> &Arc<TaskPersistence> {
        &self.persistence
    }

    /// Append a task and start it if a slot is free
    pub async fn enqueue(&self, task: TransferTask) -> Uuid {
        self.enqueue_all(vec![task], false).await[0]
    }

    /// Put a task ahead of everything pending
    pub async fn enqueue_front(&self, task: TransferTask) -> Uuid {
        self.enqueue_all(vec![task], true).await[0]
    }

    /// Enqueue several tasks keeping their relative order
    pub async fn enqueue_all(&self, tasks: Vec<TransferTask>, at_front: bool) -> Vec<Uuid> {
        let mut changes = Vec::with_capacity(tasks.len());
        {
            let mut state = self.state.lock().await;
            let prepared: Vec<TransferTask> = tasks
                .into_iter()
                .map(|mut task| {
                    task.state = TransferState::Pending;
                    task.foreground = false;
                    task
                })
                .collect();

            if at_front {
                for task in prepared.iter().rev() {
                    state.pending.push_front(task.clone());
                }
            } else {
                state.pending.extend(prepared.iter().cloned());
            }

            for task in prepared {
                debug!("Queued {} task {} ({})", task.kind, task.internal_id, task.name);
                changes.push(Change::new(&mut state, task, Write::Save));
            }
        }

        let ids = changes.iter().map(|c| c.task.internal_id).collect();
        self.apply(changes).await;
        self.promote().await;
        ids
    }

    /// Keep a task visible but out of promotion until [`trigger`](Self::trigger)
    pub async fn hold(&self, mut task: TransferTask) -> Uuid {
        task.state = TransferState::Pending;
        let id = task.internal_id;
        let change = {
            let mut state = self.state.lock().await;
            state.held.push(task.clone());
            Change::new(&mut state, task, Write::Save)
        };
        self.apply(vec![change]).await;
        id
    }

    /// Release a held task into the pending queue
    pub async fn trigger(&self, id: Uuid) -> QueueResult<()> {
        {
            let mut state = self.state.lock().await;
            let index = state
                .held_index(id)
                .ok_or_else(|| Self::not_in_state(&state, id, "Pending"))?;
            let task = state.held.remove(index);
            state.pending.push_back(task);
        }
        info!("Triggered held task {}", id);
        self.promote().await;
        Ok(())
    }

    /// Start every pending task that fits its kind's bound
    pub async fn promote(&self) -> usize {
        let mut changes = Vec::new();
        let mut started = Vec::new();
        {
            let mut state = self.state.lock().await;
            if state.shutting_down {
                return 0;
            }
            while let Some(index) = state.next_promotable(&self.config) {
                let Some(mut task) = state.pending.remove(index) else {
                    break;
                };
                task.state = TransferState::Working;
                task.started_at = Some(Utc::now());

                let token = CancellationToken::new();
                let run_id = state.next_run_id();
                state.active.push(ActiveEntry {
                    task: task.clone(),
                    token: token.clone(),
                    run_id,
                });
                self.tracker.task_started();

                changes.push(Change::new(&mut state, task.clone(), Write::Save));
                started.push((task, token, run_id));
            }
        }

        let count = started.len();
        self.apply(changes).await;
        for (task, token, run_id) in started {
            self.spawn_run(task, token, run_id);
        }
        count
    }

    /// Halt download promotion and interrupt running downloads; they return
    /// to the front of the queue in their original order
    pub async fn pause(&self) -> usize {
        let (count, changes) = {
            let mut state = self.state.lock().await;
            state.paused = true;

            let mut interrupted = Vec::new();
            let mut index = 0;
            while index < state.active.len() {
                if state.active[index].task.kind.is_download() {
                    let entry = state.active.remove(index);
                    entry.token.cancel();
                    self.tracker.task_finished();
                    interrupted.push(entry.task);
                } else {
                    index += 1;
                }
            }

            for task in interrupted.iter_mut() {
                task.state = TransferState::Pending;
            }
            for task in interrupted.iter().rev() {
                state.pending.push_front(task.clone());
            }

            let count = interrupted.len();
            let mut changes = Vec::with_capacity(count * 2);
            for task in interrupted {
                let mut paused = task.clone();
                paused.state = TransferState::Paused;
                changes.push(Change::new(&mut state, paused, Write::Nothing));
                changes.push(Change::new(&mut state, task, Write::Save));
            }
            (count, changes)
        };

        info!("Queue paused, {} downloads interrupted", count);
        self.apply(changes).await;
        let _ = self.events.send(QueueEvent::Paused);
        count
    }

    /// Allow download promotion again
    pub async fn resume(&self) -> usize {
        self.state.lock().await.paused = false;
        info!("Queue resumed");
        let _ = self.events.send(QueueEvent::Resumed);
        self.promote().await
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.paused
    }

    /// Mark a working task completed
    pub async fn complete(&self, id: Uuid) -> QueueResult<()> {
        self.terminate(id, TaskOutcome::Completed).await
    }

    /// Mark a task failed
    pub async fn fail(&self, id: Uuid, message: impl Into<String>) -> QueueResult<()> {
        self.terminate(id, TaskOutcome::Failed(message.into()))
            .await
    }

    /// Cancel a pending, held or working task
    pub async fn cancel(&self, id: Uuid) -> QueueResult<()> {
        self.terminate(id, TaskOutcome::Canceled).await
    }

    /// Move a failed task back to the end of the queue
    ///
    /// Failures that are no longer in memory, after a restart or once they
    /// left the finished history, are retried from their record.
    pub async fn retry(&self, id: Uuid) -> QueueResult<()> {
        let known = self.state.lock().await.find(id).is_some();
        let restored = if known {
            None
        } else {
            Some(self.failed_record(id).await?)
        };

        let change = {
            let mut state = self.state.lock().await;
            let mut task = match restored {
                Some(task) if state.find(id).is_none() => task,
                _ => {
                    let index = state
                        .finished_index(id)
                        .filter(|&index| state.finished[index].state == TransferState::Error)
                        .ok_or_else(|| Self::not_in_state(&state, id, "Pending"))?;
                    state
                        .finished
                        .remove(index)
                        .ok_or(QueueError::TaskNotFound { id })?
                }
            };
            task.retry_count += 1;
            task.state = TransferState::Pending;
            task.error_message = None;
            task.finished_at = None;
            task.foreground = false;
            state.pending.push_back(task.clone());
            Change::new(&mut state, task, Write::Save)
        };

        info!(
            "Retrying task {} (attempt {})",
            id,
            change.task.retry_count + 1
        );
        self.apply(vec![change]).await;
        self.promote().await;
        Ok(())
    }

    /// Register a transfer executed by a blocking caller. It counts as
    /// working but never occupies a background slot.
    pub async fn begin_foreground(&self, mut task: TransferTask) -> RunContext {
        task.state = TransferState::Working;
        task.foreground = true;
        task.started_at = Some(Utc::now());
        let id = task.internal_id;
        let direction = task.kind.direction();
        let token = CancellationToken::new();

        let (run_id, change) = {
            let mut state = self.state.lock().await;
            let run_id = state.next_run_id();
            state.foreground.insert(
                id,
                ActiveEntry {
                    task: task.clone(),
                    token: token.clone(),
                    run_id,
                },
            );
            (run_id, Change::new(&mut state, task, Write::Save))
        };
        self.tracker.task_started();
        debug!("Foreground {} task {} started", change.task.kind, id);
        self.apply(vec![change]).await;

        RunContext::new(
            id,
            run_id,
            direction,
            token,
            self.self_ref.clone(),
            self.tracker.clone(),
        )
    }

    /// Report the end of a foreground transfer
    pub async fn finish_foreground(&self, ctx: &RunContext, outcome: TaskOutcome) {
        let change = {
            let mut state = self.state.lock().await;
            let matches = state
                .foreground
                .get(&ctx.id())
                .map(|entry| entry.run_id == ctx.run_id())
                .unwrap_or(false);
            if !matches {
                return;
            }
            let Some(entry) = state.foreground.remove(&ctx.id()) else {
                return;
            };
            self.tracker.task_finished();
            if state.shutting_down {
                return;
            }
            self.finalize(&mut state, entry.task, outcome)
        };
        self.apply(vec![change]).await;
        self.promote().await;
    }

    /// Progress report from a live run; stale runs are ignored
    pub(crate) async fn record_progress(
        &self,
        id: Uuid,
        run_id: u64,
        transmitted: u64,
        part: Option<usize>,
    ) {
        let task = {
            let mut state = self.state.lock().await;
            let Some(entry) = state.run_entry_mut(id, run_id) else {
                return;
            };
            entry.task.transmitted_bytes = transmitted;
            if let Some(part) = part {
                if !entry.task.completed_parts.contains(&part) {
                    entry.task.completed_parts.push(part);
                }
            }
            entry.task.clone()
        };
        self.persistence.progress(&task).await;
    }

    /// Stop all runs without touching their records so they resume on the
    /// next start
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.shutting_down = true;
        for entry in state.active.iter().chain(state.foreground.values()) {
            entry.token.cancel();
        }
        info!(
            "Queue shutting down, {} runs interrupted",
            state.active.len() + state.foreground.len()
        );
    }

    pub async fn get(&self, id: Uuid) -> Option<TransferTask> {
        self.state.lock().await.find(id).cloned()
    }

    /// Working tasks first, then pending in order, then recent history
    pub async fn list(&self) -> Vec<TransferTask> {
        self.state.lock().await.snapshot()
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats()
    }

    /// Unfinished task already writing to `destination`
    pub async fn find_by_destination(&self, destination: &Path) -> Option<TransferTask> {
        let state = self.state.lock().await;
        state
            .snapshot()
            .into_iter()
            .filter(|task| !task.state.is_terminal())
            .find(|task| task.destination_path.as_deref() == Some(destination))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn terminate(&self, id: Uuid, outcome: TaskOutcome) -> QueueResult<()> {
        let change = {
            let mut state = self.state.lock().await;
            let target = outcome.state().to_string();

            if let Some(index) = state.active_index(id) {
                let entry = state.active.remove(index);
                entry.token.cancel();
                self.tracker.task_finished();
                self.finalize(&mut state, entry.task, outcome)
            } else if state.foreground.contains_key(&id) {
                let entry = state
                    .foreground
                    .remove(&id)
                    .ok_or(QueueError::TaskNotFound { id })?;
                entry.token.cancel();
                self.tracker.task_finished();
                self.finalize(&mut state, entry.task, outcome)
            } else if outcome == TaskOutcome::Completed {
                // Only a working task can complete
                return Err(Self::not_in_state(&state, id, &target));
            } else if let Some(index) = state.pending_index(id) {
                let task = state
                    .pending
                    .remove(index)
                    .ok_or(QueueError::TaskNotFound { id })?;
                self.finalize(&mut state, task, outcome)
            } else if let Some(index) = state.held_index(id) {
                let task = state.held.remove(index);
                self.finalize(&mut state, task, outcome)
            } else {
                return Err(Self::not_in_state(&state, id, &target));
            }
        };

        self.apply(vec![change]).await;
        self.promote().await;
        Ok(())
    }

    /// A background run returned
    async fn finish_run(&self, id: Uuid, run_id: u64, outcome: TaskOutcome) {
        let change = {
            let mut state = self.state.lock().await;
            let Some(index) = state
                .active
                .iter()
                .position(|entry| entry.task.internal_id == id && entry.run_id == run_id)
            else {
                debug!("Ignoring finish of superseded run {} of task {}", run_id, id);
                return;
            };
            let entry = state.active.remove(index);
            self.tracker.task_finished();
            if state.shutting_down {
                return;
            }
            self.finalize(&mut state, entry.task, outcome)
        };
        self.apply(vec![change]).await;
        self.promote().await;
    }

    fn finalize(
        &self,
        state: &mut QueueState,
        mut task: TransferTask,
        outcome: TaskOutcome,
    ) -> Change {
        task.state = outcome.state();
        task.finished_at = Some(Utc::now());

        let write = match outcome {
            TaskOutcome::Completed => {
                task.transmitted_bytes = task.total_size;
                task.error_message = None;
                info!("Task {} ({}) completed", task.internal_id, task.name);
                Write::Delete
            }
            TaskOutcome::Failed(message) => {
                warn!("Task {} ({}) failed: {}", task.internal_id, task.name, message);
                task.error_message = Some(message.clone());
                Write::MarkError(message)
            }
            TaskOutcome::Canceled => {
                info!("Task {} ({}) canceled", task.internal_id, task.name);
                Write::Delete
            }
        };

        state.push_finished(task.clone(), self.config.finished_history);
        Change::new(state, task, write)
    }

    /// Failed task rebuilt from its durable record
    async fn failed_record(&self, id: Uuid) -> QueueResult<TransferTask> {
        let record = match self.persistence.store().get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(QueueError::TaskNotFound { id }),
            Err(e) => {
                warn!("Could not load record of task {}: {}", id, e);
                return Err(QueueError::TaskNotFound { id });
            }
        };
        if record.state != TransferState::Error {
            return Err(QueueError::InvalidStateTransition {
                id,
                from: record.state.to_string(),
                to: "Pending".to_string(),
            });
        }
        Ok(record.to_task())
    }

    fn not_in_state(state: &QueueState, id: Uuid, target: &str) -> QueueError {
        match state.find(id) {
            Some(task) => QueueError::InvalidStateTransition {
                id,
                from: task.state.to_string(),
                to: target.to_string(),
            },
            None => QueueError::TaskNotFound { id },
        }
    }

    async fn apply(&self, changes: Vec<Change>) {
        if changes.is_empty() {
            return;
        }
        // Held across the writes so an older transition cannot land after a
        // newer one of the same task
        let mut log = self.write_log.lock().await;
        for change in changes {
            if !log.admit(change.task.internal_id, change.seq) {
                debug!(
                    "Dropping superseded {:?} of task {}",
                    change.write, change.task.internal_id
                );
                continue;
            }
            match &change.write {
                Write::Nothing => {}
                Write::Save => self.persistence.save(&change.task).await,
                Write::Delete => self.persistence.delete(change.task.internal_id).await,
                Write::MarkError(message) => {
                    self.persistence.mark_error(&change.task, message).await
                }
            }
            // No subscribers is fine
            let _ = self.events.send(QueueEvent::TaskChanged(change.task));
        }
    }

    fn spawn_run(&self, task: TransferTask, token: CancellationToken, run_id: u64) {
        let Some(queue) = self.self_ref.upgrade() else {
            return;
        };
        let id = task.internal_id;
        let ctx = RunContext::new(
            id,
            run_id,
            task.kind.direction(),
            token,
            self.self_ref.clone(),
            self.tracker.clone(),
        );
        let runner = self.runner.clone();

        tokio::spawn(async move {
            let outcome = runner.run(task, ctx).await;
            queue.finish_run(id, run_id, outcome).await;
        });
    }
}
