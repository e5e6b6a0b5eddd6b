//! Mapping of gateway errors onto HTTP responses

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::errors::{
    AppError, DownloadError, ProviderError, QueueError, StreamError, TransferError,
};

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Any gateway error on its way to becoming a response
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl<E> From<E> for ApiError
where
    E: Into<AppError>,
{
    fn from(error: E) -> Self {
        Self(error.into())
    }
}

impl ApiError {
    /// Status code a client sees for this error
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::Stream(StreamError::NotFound { .. })
            | AppError::Download(DownloadError::NotFound { .. })
            | AppError::Provider(ProviderError::NotFound { .. })
            | AppError::Queue(QueueError::TaskNotFound { .. }) => StatusCode::NOT_FOUND,

            AppError::Stream(StreamError::RangeNotSatisfiable { .. }) => {
                StatusCode::RANGE_NOT_SATISFIABLE
            }

            AppError::Download(DownloadError::Busy { .. })
            | AppError::Download(DownloadError::Canceled) => StatusCode::SERVICE_UNAVAILABLE,

            AppError::Provider(e)
            | AppError::Stream(StreamError::Remote(e))
            | AppError::Download(DownloadError::Remote(e))
                if matches!(
                    e,
                    ProviderError::Unavailable { .. } | ProviderError::RateLimited
                ) =>
            {
                StatusCode::SERVICE_UNAVAILABLE
            }

            AppError::Queue(QueueError::InvalidStateTransition { .. }) => StatusCode::CONFLICT,

            AppError::Transfer(TransferError::SourceMissing { .. })
            | AppError::Transfer(TransferError::InvalidTask { .. }) => StatusCode::BAD_REQUEST,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.0.category(), self.0);
        } else {
            warn!("Request rejected with {}: {}", status, self.0);
        }

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response();

        if let AppError::Stream(StreamError::RangeNotSatisfiable { total, .. }) = &self.0 {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", total)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}
