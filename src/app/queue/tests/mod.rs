//! Scheduler tests driven by a scripted runner
//!
//! The runner blocks every task until the test releases a permit (or the
//! task is cancelled), which makes slot occupancy observable.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use super::*;
use crate::app::models::RemoteObjectRef;
use crate::app::persistence::{
    MemoryTaskStore, PersistedTaskRecord, PersistenceConfig, ProgressUpdate, TaskPersistence,
    TaskStore,
};
use crate::errors::PersistenceResult;
use crate::app::progress::{ProgressConfig, ProgressTracker};

struct GateRunner {
    release: Semaphore,
    started: StdMutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl GateRunner {
    fn new() -> Self {
        Self {
            release: Semaphore::new(0),
            started: StdMutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskRunner for GateRunner {
    async fn run(&self, task: TransferTask, ctx: RunContext) -> TaskOutcome {
        self.started.lock().unwrap().push(task.name.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let outcome = tokio::select! {
            _ = ctx.cancel_token().cancelled() => TaskOutcome::Canceled,
            permit = self.release.acquire() => {
                permit.unwrap().forget();
                ctx.report(task.total_size, task.total_size).await;
                if task.name.starts_with("fail") && task.retry_count == 0 {
                    TaskOutcome::Failed("scripted failure".to_string())
                } else {
                    TaskOutcome::Completed
                }
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn object(name: &str) -> RemoteObjectRef {
    RemoteObjectRef {
        channel_id: 1,
        message_id: 1,
        size: 100,
        mime_type: "application/octet-stream".to_string(),
        file_name: name.to_string(),
    }
}

fn download(name: &str) -> TransferTask {
    TransferTask::download(object(name), PathBuf::from(format!("/cache/{}", name)))
}

fn upload(name: &str) -> TransferTask {
    TransferTask::upload(PathBuf::from(format!("/up/{}", name)), 1, name, 100)
}

fn build_queue(config: QueueConfig) -> (Arc<TransferQueue>, Arc<GateRunner>, Arc<MemoryTaskStore>) {
    let store = Arc::new(MemoryTaskStore::new());
    let (queue, runner) = build_queue_on(config, store.clone());
    (queue, runner, store)
}

fn build_queue_on(
    config: QueueConfig,
    store: Arc<dyn TaskStore>,
) -> (Arc<TransferQueue>, Arc<GateRunner>) {
    let runner = Arc::new(GateRunner::new());
    let persistence = Arc::new(TaskPersistence::new(
        store,
        PersistenceConfig {
            progress_debounce: Duration::ZERO,
            ..Default::default()
        },
    ));
    let queue = TransferQueue::new(
        config,
        runner.clone(),
        persistence,
        ProgressTracker::new(ProgressConfig::default()),
    )
    .unwrap();
    (queue, runner)
}

/// Store whose saves of pending "slow" records take a while to land
struct SlowPendingStore {
    inner: MemoryTaskStore,
}

#[async_trait]
impl TaskStore for SlowPendingStore {
    async fn save(&self, record: &PersistedTaskRecord) -> PersistenceResult<()> {
        if record.name == "slow" && record.state == TransferState::Pending {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.save(record).await
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> PersistenceResult<()> {
        self.inner.update_progress(update).await
    }

    async fn delete(&self, id: uuid::Uuid) -> PersistenceResult<()> {
        self.inner.delete(id).await
    }

    async fn mark_error(&self, id: uuid::Uuid, message: &str) -> PersistenceResult<()> {
        self.inner.mark_error(id, message).await
    }

    async fn get(&self, id: uuid::Uuid) -> PersistenceResult<Option<PersistedTaskRecord>> {
        self.inner.get(id).await
    }

    async fn list_pending(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        self.inner.list_pending().await
    }

    async fn list_all(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        self.inner.list_all().await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize> {
        self.inner.delete_older_than(cutoff).await
    }
}

async fn wait_for<F>(queue: &TransferQueue, predicate: F)
where
    F: Fn(&QueueStats) -> bool,
{
    for _ in 0..200 {
        if predicate(&queue.stats().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never reached expected state: {:?}", queue.stats().await);
}

async fn state_of(queue: &TransferQueue, id: uuid::Uuid) -> TransferState {
    queue.get(id).await.unwrap().state
}

#[tokio::test]
async fn test_bound_limits_working_tasks() {
    let (queue, runner, _) = build_queue(QueueConfig::with_uniform_bound(3));

    for i in 0..10 {
        queue.enqueue(download(&format!("file-{}", i))).await;
    }

    wait_for(&queue, |s| s.working == 3).await;
    assert_eq!(queue.stats().await.pending, 7);

    runner.release.add_permits(10);
    wait_for(&queue, |s| s.completed == 10).await;

    // Never more than three at once
    assert_eq!(runner.max_running.load(Ordering::SeqCst), 3);
    let stats = queue.stats().await;
    assert_eq!(stats.working, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_tasks_start_in_fifo_order() {
    let (queue, runner, _) = build_queue(QueueConfig::default());
    for name in ["a", "b", "c"] {
        queue.enqueue(download(name)).await;
    }

    runner.release.add_permits(3);
    wait_for(&queue, |s| s.completed == 3).await;
    assert_eq!(runner.started(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_kinds_have_separate_bounds() {
    let (queue, _runner, _) = build_queue(QueueConfig::default());
    queue.enqueue(download("d1")).await;
    queue.enqueue(download("d2")).await;
    queue.enqueue(upload("u1")).await;

    // One download and one upload run side by side
    wait_for(&queue, |s| s.working == 2).await;
    assert_eq!(queue.stats().await.pending, 1);
}

#[tokio::test]
async fn test_pause_requeues_downloads_at_front_in_order() {
    let (queue, runner, _) = build_queue(QueueConfig::with_uniform_bound(2));
    let a = queue.enqueue(download("a")).await;
    let b = queue.enqueue(download("b")).await;
    let c = queue.enqueue(download("c")).await;
    let u = queue.enqueue(upload("u")).await;
    wait_for(&queue, |s| s.working == 3).await;

    let interrupted = queue.pause().await;
    assert_eq!(interrupted, 2);
    assert!(queue.is_paused().await);

    // Uploads are untouched by pause
    assert_eq!(state_of(&queue, u).await, TransferState::Working);

    let pending: Vec<_> = queue
        .list()
        .await
        .into_iter()
        .filter(|t| t.state == TransferState::Pending)
        .map(|t| t.internal_id)
        .collect();
    assert_eq!(pending, vec![a, b, c]);

    // Nothing is promoted while paused
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(queue.stats().await.working, 1);

    queue.resume().await;
    wait_for(&queue, |s| s.working == 3).await;
    assert_eq!(state_of(&queue, a).await, TransferState::Working);
    assert_eq!(state_of(&queue, b).await, TransferState::Working);
    assert_eq!(state_of(&queue, c).await, TransferState::Pending);

    // a and b ran twice, c has not started
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(runner.started(), vec!["a", "b", "u", "a", "b"]);
}

#[tokio::test]
async fn test_superseded_run_cannot_overwrite_state() {
    let (queue, runner, _) = build_queue(QueueConfig::default());
    let id = queue.enqueue(download("a")).await;
    wait_for(&queue, |s| s.working == 1).await;

    queue.pause().await;
    // The interrupted run finishing later changes nothing
    runner.release.add_permits(1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state_of(&queue, id).await, TransferState::Pending);
}

#[tokio::test]
async fn test_cancel_pending_and_working() {
    let (queue, _runner, store) = build_queue(QueueConfig::default());
    let working = queue.enqueue(download("a")).await;
    let pending = queue.enqueue(download("b")).await;
    wait_for(&queue, |s| s.working == 1).await;

    queue.cancel(pending).await.unwrap();
    assert_eq!(state_of(&queue, pending).await, TransferState::Canceled);

    queue.cancel(working).await.unwrap();
    assert_eq!(state_of(&queue, working).await, TransferState::Canceled);

    // Canceled records are deleted
    assert!(store.get(working).await.unwrap().is_none());
    assert!(store.get(pending).await.unwrap().is_none());

    // Terminal tasks cannot be canceled again
    assert!(matches!(
        queue.cancel(working).await,
        Err(crate::errors::QueueError::InvalidStateTransition { .. })
    ));
}

#[tokio::test]
async fn test_failure_then_retry() {
    let (queue, runner, store) = build_queue(QueueConfig::default());
    let id = queue.enqueue(upload("fail-once")).await;

    runner.release.add_permits(1);
    wait_for(&queue, |s| s.failed == 1).await;
    let task = queue.get(id).await.unwrap();
    assert_eq!(task.state, TransferState::Error);
    assert_eq!(task.error_message.as_deref(), Some("scripted failure"));

    // Failed records stay, flagged
    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TransferState::Error);

    queue.retry(id).await.unwrap();
    runner.release.add_permits(1);
    wait_for(&queue, |s| s.completed == 1).await;

    let task = queue.get(id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.transmitted_bytes, task.total_size);
    assert!(store.get(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_retry_of_failure_known_only_from_its_record() {
    let (queue, runner, store) = build_queue(QueueConfig::default());

    let mut failed = upload("fail-earlier");
    failed.state = TransferState::Error;
    failed.error_message = Some("connection reset".to_string());
    store
        .save(&PersistedTaskRecord::from_task(&failed))
        .await
        .unwrap();
    assert!(queue.get(failed.internal_id).await.is_none());

    queue.retry(failed.internal_id).await.unwrap();
    let task = queue.get(failed.internal_id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.error_message, None);
    assert_eq!(
        store.get(failed.internal_id).await.unwrap().unwrap().state,
        TransferState::Working
    );

    runner.release.add_permits(1);
    wait_for(&queue, |s| s.completed == 1).await;
    assert!(store.get(failed.internal_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_retry_after_failure_left_history() {
    let config = QueueConfig {
        finished_history: 0,
        ..Default::default()
    };
    let (queue, runner, store) = build_queue(config);
    let id = queue.enqueue(upload("fail-once")).await;

    runner.release.add_permits(1);
    for _ in 0..200 {
        let record = store.get(id).await.unwrap();
        if record.is_some_and(|record| record.state == TransferState::Error) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(queue.get(id).await.is_none());

    queue.retry(id).await.unwrap();
    assert_eq!(queue.get(id).await.unwrap().retry_count, 1);
}

#[tokio::test]
async fn test_retry_of_unfinished_record_is_rejected() {
    let (queue, _runner, store) = build_queue(QueueConfig::default());
    let task = upload("interrupted");
    store
        .save(&PersistedTaskRecord::from_task(&task))
        .await
        .unwrap();

    assert!(matches!(
        queue.retry(task.internal_id).await,
        Err(crate::errors::QueueError::InvalidStateTransition { .. })
    ));
    assert!(queue.get(task.internal_id).await.is_none());
}

#[tokio::test]
async fn test_late_pending_write_cannot_revive_finished_task() {
    let store = Arc::new(SlowPendingStore {
        inner: MemoryTaskStore::new(),
    });
    let (queue, runner) = build_queue_on(QueueConfig::default(), store.clone());
    queue.enqueue(download("first")).await;
    wait_for(&queue, |s| s.working == 1).await;

    let enqueuer = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.enqueue(download("slow")).await })
    };
    wait_for(&queue, |s| s.pending == 1).await;

    // Both finish while the pending record of "slow" is still being written
    runner.release.add_permits(2);
    let slow = enqueuer.await.unwrap();
    wait_for(&queue, |s| s.completed == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(state_of(&queue, slow).await, TransferState::Completed);
    assert!(store.get(slow).await.unwrap().is_none());
    assert!(store.list_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_requires_error_state() {
    let (queue, _runner, _) = build_queue(QueueConfig::default());
    let id = queue.enqueue(download("a")).await;
    assert!(queue.retry(id).await.is_err());
    assert!(matches!(
        queue.retry(uuid::Uuid::new_v4()).await,
        Err(crate::errors::QueueError::TaskNotFound { .. })
    ));
}

#[tokio::test]
async fn test_enqueue_persists_record() {
    let (queue, _runner, store) = build_queue(QueueConfig::default());
    queue.enqueue(download("a")).await;
    let id = queue.enqueue(download("b")).await;

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TransferState::Pending);
    assert_eq!(record.name, "b");
}

#[tokio::test]
async fn test_held_task_waits_for_trigger() {
    let (queue, runner, _) = build_queue(QueueConfig::default());
    let batch = TransferTask::batch_download(
        "album",
        vec![BatchItem::download(object("x"), PathBuf::from("/cache/x"))],
    );
    let id = queue.hold(batch).await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    let stats = queue.stats().await;
    assert_eq!(stats.held, 1);
    assert_eq!(stats.working, 0);

    queue.trigger(id).await.unwrap();
    runner.release.add_permits(1);
    wait_for(&queue, |s| s.completed == 1).await;
}

#[tokio::test]
async fn test_foreground_tasks_do_not_use_slots() {
    let (queue, _runner, _) = build_queue(QueueConfig::default());
    let ctx = queue.begin_foreground(download("streamed")).await;
    queue.enqueue(download("background")).await;

    // The background download still gets the single download slot
    wait_for(&queue, |s| s.working == 2 && s.foreground == 1).await;
    assert_eq!(queue.tracker().working_tasks(), 2);

    ctx.report(40, 40).await;
    assert_eq!(queue.get(ctx.id()).await.unwrap().transmitted_bytes, 40);

    queue.finish_foreground(&ctx, TaskOutcome::Completed).await;
    assert_eq!(
        queue.get(ctx.id()).await.unwrap().state,
        TransferState::Completed
    );
    assert_eq!(queue.stats().await.foreground, 0);
}

#[tokio::test]
async fn test_shutdown_keeps_records() {
    let (queue, _runner, store) = build_queue(QueueConfig::default());
    let id = queue.enqueue(download("a")).await;
    wait_for(&queue, |s| s.working == 1).await;

    queue.shutdown().await;
    wait_for(&queue, |s| s.working == 0).await;

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, TransferState::Working);
    // No promotion after shutdown
    queue.enqueue(download("b")).await;
    assert_eq!(queue.stats().await.working, 0);
}

#[tokio::test]
async fn test_events_published_on_transitions() {
    let (queue, _runner, _) = build_queue(QueueConfig::default());
    let mut events = queue.subscribe();
    let id = queue.enqueue(download("a")).await;

    let mut states = Vec::new();
    for _ in 0..2 {
        if let Ok(QueueEvent::TaskChanged(task)) = events.recv().await {
            assert_eq!(task.internal_id, id);
            states.push(task.state);
        }
    }
    assert_eq!(states, vec![TransferState::Pending, TransferState::Working]);
}
