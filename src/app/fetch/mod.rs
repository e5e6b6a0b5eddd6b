//! Chunked remote fetch adapter
//!
//! Turns arbitrary byte ranges into aligned provider requests. The adapter
//! holds no locks: concurrent callers for the same object simply issue their
//! own requests.

pub mod alignment;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::models::RemoteObjectRef;
use crate::app::provider::RemoteProvider;
use crate::constants::stream;
use crate::errors::{ConfigError, FetchResult};

pub use alignment::{align_range, split_span, AlignedSpan};

/// Alignment settings for provider reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Provider chunk alignment unit in bytes
    pub alignment: u64,
    /// Largest single provider request, a multiple of `alignment`
    pub max_request_size: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            alignment: stream::ALIGNMENT,
            max_request_size: stream::MAX_REQUEST_SIZE,
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alignment == 0 {
            return Err(ConfigError::invalid(
                "stream.alignment",
                self.alignment,
                "must be greater than 0",
            ));
        }
        if self.max_request_size == 0 || self.max_request_size % self.alignment != 0 {
            return Err(ConfigError::invalid(
                "stream.max_request_size",
                self.max_request_size,
                "must be a non-zero multiple of the alignment",
            ));
        }
        Ok(())
    }
}

/// Aligned range reader over a [`RemoteProvider`]
pub struct ChunkFetcher {
    provider: Arc<dyn RemoteProvider>,
    config: FetchConfig,
}

impl ChunkFetcher {
    pub fn new(provider: Arc<dyn RemoteProvider>, config: FetchConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Compute the aligned span for `[from, to]` of `object`
    pub fn plan(&self, object: &RemoteObjectRef, from: u64, to: u64) -> FetchResult<AlignedSpan> {
        align_range(from, to, self.config.alignment, object.size)
    }

    /// Fetch the whole aligned span, split into provider-sized requests
    pub async fn fetch_aligned(
        &self,
        object: &RemoteObjectRef,
        span: &AlignedSpan,
    ) -> FetchResult<Bytes> {
        let parts = split_span(span, self.config.max_request_size);
        debug!(
            "Fetching aligned span [{}, {}) of {}/{} in {} request(s)",
            span.aligned_from,
            span.aligned_to,
            object.channel_id,
            object.message_id,
            parts.len()
        );

        if let [(offset, length)] = parts.as_slice() {
            return Ok(self.provider.fetch_range(object, *offset, *length).await?);
        }

        let mut buffer = BytesMut::with_capacity(span.fetch_len() as usize);
        for (offset, length) in parts {
            let chunk = self.provider.fetch_range(object, offset, length).await?;
            let short = (chunk.len() as u64) < length;
            buffer.extend_from_slice(&chunk);
            if short {
                break;
            }
        }
        Ok(buffer.freeze())
    }

    /// Fetch exactly the bytes `[from, to]` of `object`
    pub async fn fetch_exact(&self, object: &RemoteObjectRef, from: u64, to: u64) -> FetchResult<Bytes> {
        let span = self.plan(object, from, to)?;
        let data = self.fetch_aligned(object, &span).await?;
        span.trim(data)
    }
}
