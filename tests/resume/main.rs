//! Restart and resume tests
//!
//! Each test prepares what a previous run would have left behind (task
//! records in the state directory and partial files in the cache), then
//! starts a fresh gateway over it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use media_gateway::app::coordinator::{Gateway, GatewayConfig, ShutdownSignal};
use media_gateway::app::models::RemoteObjectRef;
use media_gateway::app::persistence::{JsonTaskStore, PersistedTaskRecord, TaskStore};
use media_gateway::app::provider::MemoryProvider;
use media_gateway::app::queue::{BatchItem, TransferState, TransferTask};
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_test::assert_ok;

const A: u64 = 524_288;
const SIZE: usize = 3 * 1024 * 1024;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 239) as u8).collect()
}

fn config_for(root: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::with_data_root(root);
    config.resume.poll_interval = Duration::from_millis(20);
    config.persistence.progress_debounce = Duration::ZERO;
    config
}

async fn provider_with_object() -> (Arc<MemoryProvider>, RemoteObjectRef, Vec<u8>) {
    let provider = Arc::new(MemoryProvider::new());
    let data = pattern(SIZE);
    let object = provider
        .add_object(-200, 9, "concert.flac", "audio/flac", data.clone())
        .await;
    (provider, object, data)
}

fn cache_path(root: &Path, object: &RemoteObjectRef) -> PathBuf {
    root.join("cache").join(object.cache_key(None))
}

/// Leave a download record and `on_disk` bytes of its file behind
async fn interrupted_download(
    root: &Path,
    object: &RemoteObjectRef,
    data: &[u8],
    on_disk: usize,
    recorded: u64,
) -> TransferTask {
    let destination = cache_path(root, object);
    tokio::fs::create_dir_all(destination.parent().unwrap())
        .await
        .unwrap();
    tokio::fs::write(&destination, &data[..on_disk]).await.unwrap();

    let mut task = TransferTask::download(object.clone(), destination);
    task.state = TransferState::Working;
    task.transmitted_bytes = recorded;

    let store = JsonTaskStore::open(root.join("state")).await.unwrap();
    store
        .save(&PersistedTaskRecord::from_task(&task))
        .await
        .unwrap();
    task
}

async fn wait_for_state(gateway: &Gateway, task: &TransferTask, expected: TransferState) {
    for _ in 0..500 {
        if let Some(current) = gateway.queue().get(task.internal_id).await {
            if current.state == expected {
                return;
            }
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "task {} never reached {:?}: {:?}",
        task.internal_id,
        expected,
        gateway.queue().get(task.internal_id).await
    );
}

#[tokio::test]
async fn test_download_resumes_from_recorded_offset() {
    let dir = TempDir::new().unwrap();
    let (provider, object, data) = provider_with_object().await;
    let task = interrupted_download(dir.path(), &object, &data, 500_000, 500_000).await;

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let shutdown = ShutdownSignal::new();
    let background = gateway.start_background(&shutdown);

    wait_for_state(&gateway, &task, TransferState::Completed).await;

    // Only the missing tail was read: first up to the next boundary, then
    // aligned chunks
    let calls = provider.fetch_calls();
    assert_eq!(
        calls.first().map(|call| (call.offset, call.length)),
        Some((500_000, A - 500_000))
    );
    assert_eq!(calls.get(1).map(|call| call.offset), Some(A));
    assert!(calls.iter().all(|call| call.offset >= 500_000));

    let on_disk = tokio::fs::read(cache_path(dir.path(), &object)).await.unwrap();
    assert_eq!(on_disk, data);

    shutdown.trigger();
    gateway.shutdown(background).await;
    let records = gateway.persistence().store().list_all().await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_file_ahead_of_record_restarts_from_zero() {
    let dir = TempDir::new().unwrap();
    let (provider, object, data) = provider_with_object().await;
    // More on disk than the record confirms
    let task = interrupted_download(dir.path(), &object, &data, 600_000, 500_000).await;

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let report = gateway.resume().resume_all().await;
    assert_eq!(report.downloads, 1);
    assert_eq!(report.restarted_downloads, 1);

    wait_for_state(&gateway, &task, TransferState::Completed).await;
    assert_eq!(provider.fetch_calls().first().map(|call| call.offset), Some(0));
    let on_disk = tokio::fs::read(cache_path(dir.path(), &object)).await.unwrap();
    assert_eq!(on_disk, data);
}

#[tokio::test]
async fn test_resume_waits_for_provider_session() {
    let dir = TempDir::new().unwrap();
    let (provider, object, data) = provider_with_object().await;
    let task = interrupted_download(dir.path(), &object, &data, A as usize, A).await;
    provider.set_ready(false);

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let shutdown = ShutdownSignal::new();
    let background = gateway.start_background(&shutdown);

    sleep(Duration::from_millis(100)).await;
    assert!(!gateway.resume().has_run());
    assert!(gateway.queue().get(task.internal_id).await.is_none());

    provider.set_ready(true);
    wait_for_state(&gateway, &task, TransferState::Completed).await;
    assert!(gateway.resume().has_run());

    shutdown.trigger();
    gateway.shutdown(background).await;
}

#[tokio::test]
async fn test_upload_restarts_and_missing_source_fails() {
    let dir = TempDir::new().unwrap();
    let (provider, _object, _data) = provider_with_object().await;

    let source = dir.path().join("notes.txt");
    tokio::fs::write(&source, b"field notes").await.unwrap();
    let mut upload = TransferTask::upload(source.clone(), -300, "notes.txt", 11);
    upload.state = TransferState::Working;
    upload.transmitted_bytes = 5;

    let gone = TransferTask::upload(dir.path().join("gone.txt"), -300, "gone.txt", 4);

    let store = JsonTaskStore::open(dir.path().join("state")).await.unwrap();
    assert_ok!(store.save(&PersistedTaskRecord::from_task(&upload)).await);
    assert_ok!(store.save(&PersistedTaskRecord::from_task(&gone)).await);

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let report = gateway.resume().resume_all().await;
    assert_eq!(report.uploads, 1);
    assert_eq!(report.failed, 1);

    wait_for_state(&gateway, &upload, TransferState::Completed).await;
    let uploads = provider.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].name, "notes.txt");
    assert_eq!(uploads[0].size, 11);

    // The failed record stays for inspection but is not resumable
    let failed = store.get(gone.internal_id).await.unwrap().unwrap();
    assert_eq!(failed.state, TransferState::Error);
    assert!(failed.last_error.unwrap().contains("no longer exists"));
}

#[tokio::test]
async fn test_batches_are_held_until_started() {
    let dir = TempDir::new().unwrap();
    let (provider, _object, _data) = provider_with_object().await;

    let first = dir.path().join("a.jpg");
    let second = dir.path().join("b.jpg");
    tokio::fs::write(&first, vec![1u8; 64]).await.unwrap();
    tokio::fs::write(&second, vec![2u8; 32]).await.unwrap();
    let batch = TransferTask::batch_upload(
        "holiday photos",
        vec![
            BatchItem::upload(first, -300, "a.jpg".to_string(), 64),
            BatchItem::upload(second, -300, "b.jpg".to_string(), 32),
        ],
    );
    let store = JsonTaskStore::open(dir.path().join("state")).await.unwrap();
    assert_ok!(store.save(&PersistedTaskRecord::from_task(&batch)).await);

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let report = gateway.resume().resume_all().await;
    assert_eq!(report.held_batches, 1);

    sleep(Duration::from_millis(100)).await;
    assert!(provider.uploads().is_empty());
    assert_eq!(gateway.queue().stats().await.held, 1);

    gateway.queue().trigger(batch.internal_id).await.unwrap();
    wait_for_state(&gateway, &batch, TransferState::Completed).await;
    let names: Vec<String> = provider.uploads().into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["a.jpg", "b.jpg"]);
}

#[tokio::test]
async fn test_streamed_prefix_survives_preload_and_restart() {
    let dir = TempDir::new().unwrap();
    let (provider, object, data) = provider_with_object().await;
    let path = cache_path(dir.path(), &object);
    let file_len = |path: &Path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    assert_ok!(gateway.streams().serve(-200, 9, None, Some("bytes=0-100")).await);
    assert_eq!(file_len(&path), A);

    gateway.queue().pause().await;
    let outcome = gateway.preload(-200, 9, None).await.unwrap();
    let task_id = outcome.task_id.unwrap();
    let record = gateway
        .persistence()
        .store()
        .get(task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.transmitted_bytes, A);

    // The queued preload owns the file now; streaming past it does not grow it
    assert_ok!(
        gateway
            .streams()
            .serve(-200, 9, None, Some("bytes=600000-700000"))
            .await
    );
    assert_eq!(file_len(&path), A);

    gateway.queue().shutdown().await;
    gateway.persistence().flush().await;
    drop(gateway);

    let fetched_before = provider.fetch_calls().len();
    let gateway = Gateway::open(config_for(dir.path()), provider.clone())
        .await
        .unwrap();
    let report = gateway.resume().resume_all().await;
    assert_eq!(report.downloads, 1);
    assert_eq!(report.restarted_downloads, 0);
    assert!(file_len(&path) >= A);

    let task = gateway.queue().get(task_id).await.unwrap();
    wait_for_state(&gateway, &task, TransferState::Completed).await;
    assert!(provider.fetch_calls()[fetched_before..]
        .iter()
        .all(|call| call.offset >= A));
    assert_eq!(tokio::fs::read(&path).await.unwrap(), data);
}
