//! HTTP provider client with rate limiting and retry logic
//!
//! Talks to the provider bridge over a small REST surface:
//!
//! - `GET  {base}/channels/{channel}/messages/{message}` metadata as JSON
//! - `GET  {base}/channels/{channel}/messages/{message}/content` with `Range`
//! - `POST {base}/channels/{channel}/files?name=...` streamed upload body
//! - `GET  {base}/session` session readiness

use std::num::NonZeroU32;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};
use url::Url;

use crate::app::models::{ObjectMetadata, RemoteObjectRef};
use crate::errors::{ProviderError, ProviderResult};

use super::config::ProviderConfig;
use super::{RemoteProvider, UploadProgress};

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    size: u64,
    mime_type: Option<String>,
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    authorized: bool,
}

/// [`RemoteProvider`] backed by the provider's HTTP bridge
#[derive(Debug)]
pub struct HttpProvider {
    client: Client,
    base_url: Url,
    config: ProviderConfig,
    rate_limiter: DirectRateLimiter,
}

impl HttpProvider {
    /// Creates a new provider client
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the base URL is invalid, the rate limit is
    /// zero, or the HTTP client cannot be built
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let base = config.base_url.trim_end_matches('/').to_string() + "/";
        let base_url = Url::parse(&base).map_err(|e| ProviderError::InvalidUrl {
            url: config.base_url.clone(),
            error: e.to_string(),
        })?;
        let rate_limiter = Self::build_rate_limiter(config.rate_limit_rps)?;
        let client = config.build_http_client()?;

        Ok(Self {
            client,
            base_url,
            config,
            rate_limiter,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> ProviderResult<DirectRateLimiter> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or_else(|| ProviderError::InvalidUrl {
            url: "rate_limit_rps".to_string(),
            error: "rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    fn endpoint(&self, path: &str) -> ProviderResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ProviderError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                error: e.to_string(),
            })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Sends a request with rate limiting and retry on 429/503 and
    /// transport errors
    ///
    /// `build` is called once per attempt since a request builder cannot be
    /// reused after sending.
    async fn send_with_retry<F>(&self, build: F) -> ProviderResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        loop {
            // Apply rate limiting with jitter to avoid thundering herd
            self.rate_limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(50)))
                .await;

            let delay = self.config.retry_base_delay * 2_u32.saturating_pow(retries + 1);
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE
                    {
                        if retries < self.config.max_retries {
                            retries += 1;
                            warn!(
                                "Provider answered {}. Backing off for {}ms",
                                status.as_u16(),
                                delay.as_millis()
                            );
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        return Err(if status == StatusCode::TOO_MANY_REQUESTS {
                            ProviderError::RateLimited
                        } else {
                            ProviderError::Unavailable {
                                reason: "provider overloaded".to_string(),
                            }
                        });
                    }
                    return Ok(response);
                }
                Err(e) if retries < self.config.max_retries && (e.is_timeout() || e.is_connect()) => {
                    retries += 1;
                    warn!(
                        "Provider request failed (attempt {}/{}): {}. Retrying in {}ms",
                        retries,
                        self.config.max_retries,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(ProviderError::Http(e)),
            }
        }
    }
}

#[async_trait]
impl RemoteProvider for HttpProvider {
    async fn fetch_metadata(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> ProviderResult<ObjectMetadata> {
        let url = self.endpoint(&format!("channels/{}/messages/{}", channel_id, message_id))?;
        let response = self
            .send_with_retry(|| {
                self.authorize(self.client.get(url.clone()))
                    .timeout(self.config.request_timeout)
            })
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => {
                return Err(ProviderError::NotFound {
                    channel_id,
                    message_id,
                })
            }
            status => {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                })
            }
        }

        let body: MetadataResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        Ok(ObjectMetadata {
            size: body.size,
            mime_type: body
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            file_name: body
                .file_name
                .unwrap_or_else(|| format!("{}-{}", channel_id, message_id)),
        })
    }

    async fn fetch_range(
        &self,
        object: &RemoteObjectRef,
        offset: u64,
        length: u64,
    ) -> ProviderResult<Bytes> {
        if length == 0 {
            return Ok(Bytes::new());
        }

        let url = self.endpoint(&format!(
            "channels/{}/messages/{}/content",
            object.channel_id, object.message_id
        ))?;
        let range = format!("bytes={}-{}", offset, offset + length - 1);

        let response = self
            .send_with_retry(|| {
                self.authorize(self.client.get(url.clone()))
                    .header(header::RANGE, range.as_str())
                    .timeout(self.config.request_timeout)
            })
            .await?;

        let status = response.status();
        let body = match status {
            StatusCode::PARTIAL_CONTENT => response.bytes().await?,
            // Bridge ignored the range and sent everything
            StatusCode::OK => {
                let full = response.bytes().await?;
                let start = (offset as usize).min(full.len());
                let end = (offset.saturating_add(length) as usize).min(full.len());
                full.slice(start..end)
            }
            StatusCode::NOT_FOUND => {
                return Err(ProviderError::NotFound {
                    channel_id: object.channel_id,
                    message_id: object.message_id,
                })
            }
            status => {
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                })
            }
        };

        debug!(
            "Fetched {} bytes at offset {} of {}/{}",
            body.len(),
            offset,
            object.channel_id,
            object.message_id
        );
        Ok(body)
    }

    async fn upload(
        &self,
        channel_id: i64,
        name: &str,
        source: &Path,
        progress: UploadProgress,
    ) -> ProviderResult<i64> {
        let file = tokio::fs::File::open(source).await?;
        let length = file.metadata().await?.len();

        let mut url = self.endpoint(&format!("channels/{}/files", channel_id))?;
        url.query_pairs_mut().append_pair("name", name);

        let sent = Arc::new(AtomicU64::new(0));
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let total = sent.fetch_add(bytes.len() as u64, Ordering::Relaxed) + bytes.len() as u64;
                progress(total);
            }
            chunk
        });

        self.rate_limiter.until_ready().await;
        // Streamed bodies cannot be replayed, retries belong to the caller
        let response = self
            .authorize(self.client.post(url))
            .header(header::CONTENT_LENGTH, length)
            .timeout(self.config.upload_timeout)
            .body(reqwest::Body::wrap_stream(stream))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        let body: UploadResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::InvalidResponse {
                    reason: e.to_string(),
                })?;
        debug!(
            "Uploaded {} ({} bytes) to channel {} as message {}",
            name, length, channel_id, body.message_id
        );
        Ok(body.message_id)
    }

    async fn is_ready(&self) -> bool {
        let url = match self.endpoint("session") {
            Ok(url) => url,
            Err(_) => return false,
        };

        let response = self
            .authorize(self.client.get(url))
            .timeout(self.config.request_timeout)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => response
                .json::<SessionResponse>()
                .await
                .map(|session| session.authorized)
                .unwrap_or(false),
            Ok(response) => {
                debug!("Provider session check answered {}", response.status());
                false
            }
            Err(e) => {
                debug!("Provider session check failed: {}", e);
                false
            }
        }
    }
}
