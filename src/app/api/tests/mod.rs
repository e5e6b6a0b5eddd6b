//! Router tests through `tower::ServiceExt::oneshot`

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use super::*;
use crate::app::coordinator::GatewayConfig;
use crate::app::persistence::MemoryTaskStore;
use crate::app::provider::MemoryProvider;

struct Fixture {
    provider: Arc<MemoryProvider>,
    gateway: Arc<Gateway>,
    _dir: TempDir,
}

impl Fixture {
    fn app(&self) -> Router {
        router(self.gateway.clone())
    }
}

async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(MemoryProvider::new());
    let mut config = GatewayConfig::with_data_root(dir.path());
    config.download.acquire_timeout = Duration::from_millis(200);
    let gateway = Gateway::with_store(config, provider.clone(), Arc::new(MemoryTaskStore::new()))
        .await
        .unwrap();
    Fixture {
        provider,
        gateway,
        _dir: dir,
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let f = fixture().await;
    let response = f.app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["provider_ready"], true);
}

#[tokio::test]
async fn test_stream_range_request() {
    let f = fixture().await;
    let data = pattern(10_000_000);
    f.provider
        .add_object(100, 200, "film.mp4", "video/mp4", data.clone())
        .await;

    let request = Request::builder()
        .uri("/api/stream/100/200")
        .header(header::RANGE, "bytes=700000-900000")
        .body(Body::empty())
        .unwrap();
    let response = f.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 700000-900000/10000000");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "inline; filename=\"film.mp4\""
    );

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(body.len(), 200_001);
    assert_eq!(&body[..], &data[700_000..=900_000]);
}

#[tokio::test]
async fn test_stream_small_object_without_range_is_200() {
    let f = fixture().await;
    let data = pattern(3000);
    f.provider
        .add_object(1, 1, "voice.ogg", "audio/ogg", data.clone())
        .await;

    let response = f.app().oneshot(get("/api/stream/1/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[..]);
}

#[tokio::test]
async fn test_stream_from_disk_after_download() {
    let f = fixture().await;
    let data = pattern(50_000);
    f.provider
        .add_object(3, 4, "pic.png", "image/png", data.clone())
        .await;

    let response = f.app().oneshot(get("/api/download/3/4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    f.provider.clear_fetch_calls();

    let request = Request::builder()
        .uri("/api/stream/3/4")
        .header(header::RANGE, "bytes=100-199")
        .body(Body::empty())
        .unwrap();
    let response = f.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[100..200]);
    assert!(f.provider.fetch_calls().is_empty());
}

#[tokio::test]
async fn test_download_of_empty_object() {
    let f = fixture().await;
    f.provider
        .add_object(1, 2, "empty.log", "text/plain", Vec::new())
        .await;

    for expected in ["MISS", "HIT"] {
        let response = f.app().oneshot(get("/api/download/1/2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-cache-status"], expected);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "0");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }
}

#[tokio::test]
async fn test_download_of_message_deleted_upstream() {
    let f = fixture().await;
    f.provider
        .add_object(9, 1, "old.mp4", "video/mp4", pattern(1000))
        .await;
    let response = f.app().oneshot(get("/api/stream/9/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The stream cached the default name; another name has nothing on disk
    f.provider.remove_object(9, 1).await;
    let response = f
        .app()
        .oneshot(get("/api/download/9/1?name=copy.mp4"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_unsatisfiable_range() {
    let f = fixture().await;
    f.provider
        .add_object(1, 2, "a.bin", "application/octet-stream", pattern(1000))
        .await;

    let request = Request::builder()
        .uri("/api/stream/1/2")
        .header(header::RANGE, "bytes=1000-")
        .body(Body::empty())
        .unwrap();
    let response = f.app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */1000");
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not satisfiable"));
}

#[tokio::test]
async fn test_stream_unknown_object() {
    let f = fixture().await;
    let response = f.app().oneshot(get("/api/stream/8/9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_download_reports_cache_status() {
    let f = fixture().await;
    let data = pattern(70_000);
    f.provider
        .add_object(5, 6, "doc.pdf", "application/pdf", data.clone())
        .await;

    let first = f
        .app()
        .oneshot(get("/api/download/5/6?name=report.pdf"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.headers()["x-cache-status"], "MISS");
    assert_eq!(
        first.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    let body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &data[..]);

    let second = f
        .app()
        .oneshot(get("/api/download/5/6?name=report.pdf"))
        .await
        .unwrap();
    assert_eq!(second.headers()["x-cache-status"], "HIT");
}

#[tokio::test]
async fn test_preload_accepted() {
    let f = fixture().await;
    f.provider
        .add_object(7, 7, "album.zip", "application/zip", pattern(2000))
        .await;

    let response = f.app().oneshot(post("/api/preload/7/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["cached"], false);
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn test_task_lifecycle_endpoints() {
    let f = fixture().await;
    f.provider
        .add_object(2, 2, "slow.bin", "application/octet-stream", pattern(4096))
        .await;
    f.provider.set_fetch_delay(Some(Duration::from_secs(30)));

    let response = f.app().oneshot(post("/api/preload/2/2")).await.unwrap();
    let id: Uuid = serde_json::from_value(body_json(response).await["task_id"].clone()).unwrap();

    let response = f
        .app()
        .oneshot(get(&format!("/api/tasks/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task = body_json(response).await;
    assert_eq!(task["name"], "slow.bin");
    assert_eq!(task["size_string"], "4.0 KB");

    let response = f
        .app()
        .oneshot(post(&format!("/api/tasks/{}/cancel", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Retrying a canceled task is not allowed
    let response = f
        .app()
        .oneshot(post(&format!("/api/tasks/{}/retry", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = f.app().oneshot(get("/api/tasks")).await.unwrap();
    let tasks = body_json(response).await;
    assert_eq!(tasks.as_array().unwrap().len(), 1);
    assert_eq!(tasks[0]["state"], "Canceled");
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let f = fixture().await;
    let response = f
        .app()
        .oneshot(get(&format!("/api/tasks/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let f = fixture().await;

    let response = f.app().oneshot(post("/api/queue/pause")).await.unwrap();
    assert_eq!(body_json(response).await["paused"], true);

    let response = f.app().oneshot(get("/api/queue/stats")).await.unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["paused"], true);
    assert!(stats["rates"].is_object());

    let response = f.app().oneshot(post("/api/queue/resume")).await.unwrap();
    assert_eq!(body_json(response).await["paused"], false);
}

#[tokio::test]
async fn test_upload_submission() {
    let f = fixture().await;
    let path = f._dir.path().join("upload.mkv");
    std::fs::write(&path, pattern(1000)).unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/api/uploads")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "channel_id": 12, "paths": [path] }).to_string(),
        ))
        .unwrap();
    let response = f.app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(body_json(response).await["task_id"].is_string());

    let missing = Request::builder()
        .method("POST")
        .uri("/api/uploads")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "channel_id": 12, "paths": ["/nope/file.bin"] }).to_string(),
        ))
        .unwrap();
    let response = f.app().oneshot(missing).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
