//! Integration tests for background transfer scheduling
//!
//! Preloads go through the whole gateway: catalog, queue, worker and
//! cache. The in-memory provider is slowed down so that slot occupancy can
//! be observed while transfers run.

use std::sync::Arc;
use std::time::Duration;

use media_gateway::app::coordinator::{Gateway, GatewayConfig, PreloadStatus};
use media_gateway::app::provider::MemoryProvider;
use media_gateway::app::queue::{QueueStats, TransferState};
use tempfile::TempDir;
use tokio::time::sleep;
use uuid::Uuid;

const OBJECT_SIZE: usize = 4 * 1024 * 1024;

async fn gateway_with(
    objects: i64,
    bound: usize,
    fetch_delay: Duration,
) -> (Arc<Gateway>, Arc<MemoryProvider>, TempDir) {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    for message_id in 1..=objects {
        provider
            .add_object(
                -100,
                message_id,
                &format!("episode-{:02}.mkv", message_id),
                "video/x-matroska",
                vec![message_id as u8; OBJECT_SIZE],
            )
            .await;
    }
    provider.set_fetch_delay(Some(fetch_delay));

    let mut config = GatewayConfig::with_data_root(dir.path());
    config.queue.max_active_downloads = bound;
    config.persistence.progress_debounce = Duration::ZERO;
    let gateway = Gateway::open(config, provider.clone()).await.unwrap();
    (gateway, provider, dir)
}

async fn preload_all(gateway: &Gateway, count: i64) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for message_id in 1..=count {
        let outcome = gateway.preload(-100, message_id, None).await.unwrap();
        assert_eq!(outcome.status, PreloadStatus::Queued);
        ids.push(outcome.task_id.unwrap());
    }
    ids
}

async fn wait_for<F>(gateway: &Gateway, timeout: Duration, predicate: F) -> QueueStats
where
    F: Fn(&QueueStats) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = gateway.queue().stats().await;
        if predicate(&stats) {
            return stats;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("queue never reached expected state: {:?}", stats);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_ten_downloads_never_exceed_bound() {
    let (gateway, _provider, dir) = gateway_with(10, 3, Duration::from_millis(20)).await;
    let ids = preload_all(&gateway, 10).await;

    let mut max_working = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let stats = gateway.queue().stats().await;
        max_working = max_working.max(stats.working);
        assert!(stats.working <= 3, "bound exceeded: {:?}", stats);
        if stats.completed == 10 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "stalled: {:?}", stats);
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(max_working, 3);

    for (index, id) in ids.iter().enumerate() {
        let task = gateway.queue().get(*id).await.unwrap();
        assert_eq!(task.state, TransferState::Completed);
        let path = task.destination_path.unwrap();
        let data = tokio::fs::read(&path).await.unwrap();
        assert_eq!(data.len(), OBJECT_SIZE);
        assert!(data.iter().all(|b| *b == (index + 1) as u8));
    }

    // Completed transfers leave no records behind
    sleep(Duration::from_millis(50)).await;
    let records = gateway.persistence().store().list_all().await.unwrap();
    assert!(records.is_empty());

    // A second preload of a finished object is a cache hit
    let outcome = gateway.preload(-100, 1, None).await.unwrap();
    assert_eq!(outcome.status, PreloadStatus::Cached);
    assert!(outcome.cached);
    drop(dir);
}

#[tokio::test]
async fn test_pause_requeues_working_ahead_of_pending() {
    let (gateway, _provider, _dir) = gateway_with(8, 3, Duration::from_millis(150)).await;
    let ids = preload_all(&gateway, 8).await;

    wait_for(&gateway, Duration::from_secs(2), |s| {
        s.working == 3 && s.pending == 5
    })
    .await;

    let requeued = gateway.queue().pause().await;
    assert_eq!(requeued, 3);
    let stats = wait_for(&gateway, Duration::from_secs(2), |s| s.working == 0).await;
    assert_eq!(stats.pending, 8);
    assert!(stats.paused);

    // The interrupted three keep their order at the front
    let pending: Vec<Uuid> = gateway
        .queue()
        .list()
        .await
        .into_iter()
        .filter(|task| task.state == TransferState::Pending)
        .map(|task| task.internal_id)
        .collect();
    assert_eq!(pending, ids);

    // Nothing starts while paused
    sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.queue().stats().await.working, 0);

    let started = gateway.queue().resume().await;
    assert_eq!(started, 3);
    let stats = wait_for(&gateway, Duration::from_secs(2), |s| s.working == 3).await;
    assert!(!stats.paused);
    for id in &ids[..3] {
        assert_eq!(
            gateway.queue().get(*id).await.unwrap().state,
            TransferState::Working
        );
    }

    gateway.queue().shutdown().await;
}

#[tokio::test]
async fn test_cancel_frees_slot_for_next_task() {
    let (gateway, _provider, _dir) = gateway_with(3, 1, Duration::from_millis(100)).await;
    let ids = preload_all(&gateway, 3).await;

    wait_for(&gateway, Duration::from_secs(2), |s| s.working == 1).await;
    gateway.queue().cancel(ids[0]).await.unwrap();

    wait_for(&gateway, Duration::from_secs(2), |s| {
        s.canceled == 1 && s.working == 1
    })
    .await;
    assert_eq!(
        gateway.queue().get(ids[0]).await.unwrap().state,
        TransferState::Canceled
    );
    assert_eq!(
        gateway.queue().get(ids[1]).await.unwrap().state,
        TransferState::Working
    );

    // Canceled tasks only come back through a new request
    assert!(gateway.queue().retry(ids[0]).await.is_err());
    gateway.queue().shutdown().await;
}

#[tokio::test]
async fn test_duplicate_preload_reports_in_progress() {
    let (gateway, provider, _dir) = gateway_with(1, 1, Duration::from_millis(50)).await;

    let first = gateway.preload(-100, 1, None).await.unwrap();
    let second = gateway.preload(-100, 1, None).await.unwrap();
    assert_eq!(second.status, PreloadStatus::InProgress);
    assert_eq!(second.task_id, first.task_id);

    wait_for(&gateway, Duration::from_secs(10), |s| s.completed == 1).await;
    // Four 1 MiB reads for one 4 MiB object, never two downloads
    assert_eq!(provider.fetch_calls().len(), 4);
}
