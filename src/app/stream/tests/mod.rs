//! Stream server tests against the in-memory provider

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::app::cache::{CacheConfig, CacheStore};
use crate::app::fetch::{ChunkFetcher, FetchConfig};
use crate::app::models::RemoteObjectRef;
use crate::app::persistence::TaskPersistence;
use crate::app::progress::{ProgressConfig, ProgressTracker};
use crate::app::provider::{FetchCall, MemoryProvider, ObjectCatalog};
use crate::app::queue::{
    QueueConfig, RunContext, TaskOutcome, TaskRunner, TransferQueue, TransferTask,
};
use crate::errors::StreamError;

const A: u64 = 524_288;

struct Fixture {
    provider: Arc<MemoryProvider>,
    cache: Arc<CacheStore>,
    server: StreamServer,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let cache = Arc::new(
        CacheStore::new(CacheConfig::with_cache_root(dir.path().join("cache")))
            .await
            .unwrap(),
    );
    let server = StreamServer::new(
        Arc::new(ObjectCatalog::new(provider.clone())),
        cache.clone(),
        ChunkFetcher::new(provider.clone(), FetchConfig::default()),
        StreamConfig::default(),
    );
    Fixture {
        provider,
        cache,
        server,
        _dir: dir,
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn offsets(calls: &[FetchCall]) -> Vec<(u64, u64)> {
    calls.iter().map(|c| (c.offset, c.length)).collect()
}

async fn body_bytes(cache: &CacheStore, reply: &StreamReply) -> Vec<u8> {
    match &reply.body {
        ReplyBody::Bytes(bytes) => bytes.to_vec(),
        ReplyBody::File {
            path,
            offset,
            length,
        } => cache.read_range(path, *offset, *length).await.unwrap().to_vec(),
    }
}

async fn add_large(f: &Fixture) -> (RemoteObjectRef, Vec<u8>) {
    let data = pattern(10_000_000);
    let object = f
        .provider
        .add_object(100, 200, "film.mp4", "video/mp4", data.clone())
        .await;
    (object, data)
}

#[tokio::test]
async fn test_uncached_range_fetches_aligned_span() {
    let f = fixture().await;
    let (_, data) = add_large(&f).await;

    let reply = f
        .server
        .serve(100, 200, None, Some("bytes=700000-900000"))
        .await
        .unwrap();

    assert_eq!(offsets(&f.provider.fetch_calls()), vec![(A, A)]);
    assert!(reply.is_partial());
    assert_eq!(
        reply.content_range().as_deref(),
        Some("bytes 700000-900000/10000000")
    );
    assert_eq!(reply.content_length(), 200_001);
    assert_eq!(reply.served_from, ServedFrom::Remote);

    let body = body_bytes(&f.cache, &reply).await;
    assert_eq!(body.len(), 200_001);
    assert_eq!(&body[..], &data[700_000..=900_000]);
}

#[tokio::test]
async fn test_fully_cached_object_needs_no_fetch() {
    let f = fixture().await;
    let (object, data) = add_large(&f).await;
    std::fs::write(f.cache.path_for(&object.cache_key(None)), &data).unwrap();

    let reply = f
        .server
        .serve(100, 200, None, Some("bytes=700000-900000"))
        .await
        .unwrap();

    assert!(f.provider.fetch_calls().is_empty());
    assert_eq!(reply.served_from, ServedFrom::Cache);
    assert_eq!(&body_bytes(&f.cache, &reply).await[..], &data[700_000..=900_000]);
}

#[tokio::test]
async fn test_range_inside_cached_prefix_served_from_disk() {
    let f = fixture().await;
    let (object, data) = add_large(&f).await;
    std::fs::write(f.cache.path_for(&object.cache_key(None)), &data[..2_000_000]).unwrap();

    let reply = f
        .server
        .serve(100, 200, None, Some("bytes=1000-1999999"))
        .await
        .unwrap();

    assert!(f.provider.fetch_calls().is_empty());
    assert_eq!(reply.content_length(), 1_999_000);
}

#[tokio::test]
async fn test_cached_prefix_joined_with_remote_tail() {
    let f = fixture().await;
    let (object, data) = add_large(&f).await;
    let path = f.cache.path_for(&object.cache_key(None));
    std::fs::write(&path, &data[..A as usize]).unwrap();

    let reply = f
        .server
        .serve(100, 200, None, Some("bytes=500000-600000"))
        .await
        .unwrap();

    // Only the part past the cached prefix is fetched
    assert_eq!(offsets(&f.provider.fetch_calls()), vec![(A, A)]);
    assert_eq!(reply.served_from, ServedFrom::Mixed);
    assert_eq!(&body_bytes(&f.cache, &reply).await[..], &data[500_000..=600_000]);

    // The fetch touched the end of the file, so the cache grew
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * A);
}

#[tokio::test]
async fn test_lazy_fill_skipped_for_gap() {
    let f = fixture().await;
    let (object, _) = add_large(&f).await;

    f.server
        .serve(100, 200, None, Some("bytes=3000000-3000100"))
        .await
        .unwrap();

    // Fetched span starts past the (empty) cache, nothing written
    assert!(!f.cache.path_for(&object.cache_key(None)).exists());
}

#[tokio::test]
async fn test_lazy_fill_skipped_while_writer_active() {
    let f = fixture().await;
    let (object, _) = add_large(&f).await;
    let path = f.cache.path_for(&object.cache_key(None));

    let _guard = f.cache.locks().lock(&path).await;
    f.server
        .serve(100, 200, None, Some("bytes=0-1000"))
        .await
        .unwrap();

    assert!(!path.exists());
}

/// Runs nothing until canceled
struct IdleRunner;

#[async_trait]
impl TaskRunner for IdleRunner {
    async fn run(&self, _task: TransferTask, ctx: RunContext) -> TaskOutcome {
        ctx.cancel_token().cancelled().await;
        TaskOutcome::Canceled
    }
}

#[tokio::test]
async fn test_lazy_fill_leaves_queued_download_alone() {
    let f = fixture().await;
    let (object, data) = add_large(&f).await;
    let path = f.cache.path_for(&object.cache_key(None));
    std::fs::write(&path, &data[..A as usize]).unwrap();

    let queue = TransferQueue::new(
        QueueConfig::default(),
        Arc::new(IdleRunner),
        Arc::new(TaskPersistence::in_memory()),
        ProgressTracker::new(ProgressConfig::default()),
    )
    .unwrap();
    queue.pause().await;
    queue
        .enqueue(TransferTask::download(object.clone(), path.clone()))
        .await;

    let server = StreamServer::new(
        Arc::new(ObjectCatalog::new(f.provider.clone())),
        f.cache.clone(),
        ChunkFetcher::new(f.provider.clone(), FetchConfig::default()),
        StreamConfig::default(),
    )
    .with_queue(queue.clone());

    let reply = server
        .serve(100, 200, None, Some("bytes=500000-600000"))
        .await
        .unwrap();
    assert_eq!(&body_bytes(&f.cache, &reply).await[..], &data[500_000..=600_000]);
    // The pending download still owns the file past its prefix
    assert_eq!(std::fs::metadata(&path).unwrap().len(), A);

    // Once the task is gone the same request fills the cache again
    let task = queue.list().await.remove(0);
    queue.cancel(task.internal_id).await.unwrap();
    server
        .serve(100, 200, None, Some("bytes=500000-600000"))
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 2 * A);
}

#[tokio::test]
async fn test_probe_without_range_header() {
    let f = fixture().await;
    add_large(&f).await;

    let reply = f.server.serve(100, 200, None, None).await.unwrap();
    assert!(reply.is_partial());
    assert_eq!(
        reply.content_range().as_deref(),
        Some("bytes 0-2097152/10000000")
    );
}

#[tokio::test]
async fn test_small_object_probe_is_whole_reply() {
    let f = fixture().await;
    let data = pattern(5000);
    f.provider
        .add_object(1, 1, "clip.ogg", "audio/ogg", data.clone())
        .await;

    let reply = f.server.serve(1, 1, None, None).await.unwrap();
    assert!(!reply.is_partial());
    assert_eq!(reply.content_range(), None);
    assert_eq!(body_bytes(&f.cache, &reply).await, data);
}

#[tokio::test]
async fn test_malformed_range_treated_as_probe() {
    let f = fixture().await;
    add_large(&f).await;

    let reply = f
        .server
        .serve(100, 200, None, Some("bytes=zzz"))
        .await
        .unwrap();
    assert!(reply.window.probe);
    assert_eq!(reply.window.from, 0);
}

#[tokio::test]
async fn test_range_past_end_not_satisfiable() {
    let f = fixture().await;
    add_large(&f).await;

    let result = f
        .server
        .serve(100, 200, None, Some("bytes=10000000-"))
        .await;
    assert!(matches!(
        result,
        Err(StreamError::RangeNotSatisfiable {
            from: 10_000_000,
            total: 10_000_000
        })
    ));
    assert!(f.provider.fetch_calls().is_empty());
}

#[tokio::test]
async fn test_unknown_object_not_found() {
    let f = fixture().await;
    let result = f.server.serve(9, 9, None, Some("bytes=0-10")).await;
    assert!(matches!(result, Err(StreamError::NotFound { .. })));
}

#[tokio::test]
async fn test_disposition_uses_requested_name() {
    let f = fixture().await;
    add_large(&f).await;

    let reply = f
        .server
        .serve(100, 200, Some("My Film (2020).mp4"), Some("bytes=0-10"))
        .await
        .unwrap();
    assert_eq!(
        reply.content_disposition(),
        "inline; filename=\"My%20Film%20%282020%29.mp4\""
    );
}
