//! Route handlers

use std::io::SeekFrom;
use std::path::Path as FsPath;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

use crate::app::coordinator::{Gateway, PreloadOutcome, UploadRequest};
use crate::app::progress::{RateSnapshot, SpeedSample};
use crate::app::queue::{QueueStats, TaskView};
use crate::app::stream::{content_disposition, ReplyBody};
use crate::constants::server::CACHE_STATUS_HEADER;
use crate::errors::{CacheError, QueueError};

use super::error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider_ready: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    #[serde(flatten)]
    pub stats: QueueStats,
    pub rates: RateSnapshot,
}

#[derive(Debug, Serialize)]
pub struct PauseResponse {
    pub paused: bool,
    /// Tasks moved back to pending by a pause, or started by a resume
    pub affected: usize,
}

#[derive(Debug, Serialize)]
pub struct TaskCreated {
    pub task_id: Uuid,
}

/// GET /health
pub async fn health(State(gateway): State<Arc<Gateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider_ready: gateway.catalog().provider().is_ready().await,
    })
}

/// GET /api/stream/:channel/:message
pub async fn stream(
    State(gateway): State<Arc<Gateway>>,
    Path((channel_id, message_id)): Path<(i64, i64)>,
    Query(query): Query<NameQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    let reply = gateway
        .streams()
        .serve(channel_id, message_id, query.name.as_deref(), range)
        .await?;

    let status = if reply.is_partial() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let body = match reply.body {
        ReplyBody::Bytes(ref bytes) => Body::from(bytes.clone()),
        ReplyBody::File {
            ref path,
            offset,
            length,
        } => file_body(path, offset, length).await?,
    };

    let mut response = (status, body).into_response();
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, content_type(reply.content_type()));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(reply.content_length()));
    out.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    insert_text(out, header::CONTENT_DISPOSITION, &reply.content_disposition());
    if let Some(content_range) = reply.content_range() {
        insert_text(out, header::CONTENT_RANGE, &content_range);
    }

    Ok(response)
}

/// GET /api/download/:channel/:message
pub async fn download(
    State(gateway): State<Arc<Gateway>>,
    Path((channel_id, message_id)): Path<(i64, i64)>,
    Query(query): Query<NameQuery>,
) -> ApiResult<Response> {
    let completed = gateway
        .downloads()
        .ensure_complete(channel_id, message_id, query.name.as_deref())
        .await?;
    debug!(
        "Serving {} ({})",
        completed.path.display(),
        completed.cache_status
    );

    let size = completed.object.size;
    let body = file_body(&completed.path, 0, size).await?;

    let mut response = (StatusCode::OK, body).into_response();
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, content_type(&completed.object.mime_type));
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    insert_text(
        out,
        header::CONTENT_DISPOSITION,
        &content_disposition("attachment", &completed.file_name),
    );
    out.insert(
        HeaderName::from_static(CACHE_STATUS_HEADER),
        HeaderValue::from_static(completed.cache_status.as_str()),
    );

    Ok(response)
}

/// POST /api/preload/:channel/:message
pub async fn preload(
    State(gateway): State<Arc<Gateway>>,
    Path((channel_id, message_id)): Path<(i64, i64)>,
    Query(query): Query<NameQuery>,
) -> ApiResult<(StatusCode, Json<PreloadOutcome>)> {
    let outcome = gateway
        .preload(channel_id, message_id, query.name.as_deref())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

/// GET /api/tasks
pub async fn list_tasks(State(gateway): State<Arc<Gateway>>) -> Json<Vec<TaskView>> {
    let tasks = gateway.queue().list().await;
    Json(tasks.iter().map(TaskView::from).collect())
}

/// GET /api/tasks/:id
pub async fn get_task(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskView>> {
    task_view(&gateway, id).await.map(Json)
}

/// POST /api/tasks/:id/cancel
pub async fn cancel_task(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    gateway.queue().cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tasks/:id/retry
pub async fn retry_task(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    gateway.queue().retry(id).await?;
    Ok((StatusCode::ACCEPTED, Json(task_view(&gateway, id).await?)))
}

/// POST /api/tasks/:id/start
pub async fn start_task(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TaskView>)> {
    gateway.queue().trigger(id).await?;
    Ok((StatusCode::ACCEPTED, Json(task_view(&gateway, id).await?)))
}

/// POST /api/queue/pause
pub async fn pause_queue(State(gateway): State<Arc<Gateway>>) -> Json<PauseResponse> {
    let requeued = gateway.queue().pause().await;
    Json(PauseResponse {
        paused: true,
        affected: requeued,
    })
}

/// POST /api/queue/resume
pub async fn resume_queue(State(gateway): State<Arc<Gateway>>) -> Json<PauseResponse> {
    let started = gateway.queue().resume().await;
    Json(PauseResponse {
        paused: false,
        affected: started,
    })
}

/// GET /api/queue/stats
pub async fn queue_stats(State(gateway): State<Arc<Gateway>>) -> Json<QueueStatsResponse> {
    Json(QueueStatsResponse {
        stats: gateway.queue().stats().await,
        rates: gateway.tracker().latest(),
    })
}

/// GET /api/queue/history
pub async fn speed_history(State(gateway): State<Arc<Gateway>>) -> Json<Vec<SpeedSample>> {
    Json(gateway.tracker().history())
}

/// POST /api/uploads
pub async fn submit_upload(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<UploadRequest>,
) -> ApiResult<(StatusCode, Json<TaskCreated>)> {
    let task_id = gateway.submit_upload(request).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskCreated { task_id })))
}

async fn task_view(gateway: &Gateway, id: Uuid) -> ApiResult<TaskView> {
    gateway
        .queue()
        .get(id)
        .await
        .map(|task| TaskView::from(&task))
        .ok_or_else(|| QueueError::TaskNotFound { id }.into())
}

/// Stream `length` bytes of a file starting at `offset`
async fn file_body(path: &FsPath, offset: u64, length: u64) -> ApiResult<Body> {
    if length == 0 {
        return Ok(Body::empty());
    }
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| CacheError::io(path, e))?;
    if offset > 0 {
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| CacheError::io(path, e))?;
    }
    Ok(Body::from_stream(ReaderStream::new(file.take(length))))
}

fn content_type(mime_type: &str) -> HeaderValue {
    HeaderValue::from_str(mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE))
}

fn insert_text(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
