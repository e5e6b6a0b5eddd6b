//! Progressive range server
//!
//! Answers range requests from whatever mix of local cache and remote fetch
//! is cheapest. Bytes already on disk are never fetched again, and bytes
//! fetched for a client are appended to the cache when they extend it
//! contiguously and nobody else is writing that file. A file that belongs to
//! an unfinished download task is left to that task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, warn};

use crate::app::cache::{CacheEntry, CacheStore};
use crate::app::fetch::ChunkFetcher;
use crate::app::models::RemoteObjectRef;
use crate::app::provider::ObjectCatalog;
use crate::app::queue::TransferQueue;
use crate::errors::StreamResult;

use super::range::{parse_range_header, ServeWindow, StreamConfig};

/// Characters left readable in header file names
const FILE_NAME_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// `Content-Disposition` value with a percent-encoded file name
pub fn content_disposition(disposition: &str, file_name: &str) -> String {
    format!(
        "{}; filename=\"{}\"",
        disposition,
        utf8_percent_encode(file_name, FILE_NAME_SET)
    )
}

/// Where the bytes of a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    Cache,
    /// Disk prefix followed by fetched bytes
    Mixed,
    Remote,
}

/// Reply payload
#[derive(Debug, Clone)]
pub enum ReplyBody {
    /// A window of a cache file, read by the caller
    File {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
    /// Bytes already in memory
    Bytes(Bytes),
}

/// Everything the HTTP layer needs to answer one stream request
#[derive(Debug, Clone)]
pub struct StreamReply {
    pub object: RemoteObjectRef,
    pub file_name: String,
    pub window: ServeWindow,
    pub body: ReplyBody,
    pub served_from: ServedFrom,
}

impl StreamReply {
    /// 206 unless a probe covered the whole object
    pub fn is_partial(&self) -> bool {
        !self.window.is_whole_object(self.object.size)
    }

    pub fn content_length(&self) -> u64 {
        self.window.len(self.object.size)
    }

    pub fn content_range(&self) -> Option<String> {
        self.is_partial().then(|| {
            format!(
                "bytes {}-{}/{}",
                self.window.from, self.window.to, self.object.size
            )
        })
    }

    pub fn content_type(&self) -> &str {
        &self.object.mime_type
    }

    pub fn content_disposition(&self) -> String {
        content_disposition("inline", &self.file_name)
    }
}

/// Serves byte ranges of remote objects through the local cache
pub struct StreamServer {
    catalog: Arc<ObjectCatalog>,
    cache: Arc<CacheStore>,
    fetcher: ChunkFetcher,
    config: StreamConfig,
    queue: Option<Arc<TransferQueue>>,
}

impl std::fmt::Debug for StreamServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamServer")
            .field("config", &self.config)
            .field("fetch", self.fetcher.config())
            .finish_non_exhaustive()
    }
}

impl StreamServer {
    pub fn new(
        catalog: Arc<ObjectCatalog>,
        cache: Arc<CacheStore>,
        fetcher: ChunkFetcher,
        config: StreamConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            fetcher,
            config,
            queue: None,
        }
    }

    /// Leave files of unfinished queued downloads alone when filling
    pub fn with_queue(mut self, queue: Arc<TransferQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Answer a range request for message `message_id` in `channel_id`
    ///
    /// `range_header` is the raw `Range` value; a value that does not parse
    /// is treated as absent.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown objects, `RangeNotSatisfiable` when the range
    /// starts at or past the end, `Alignment` when range arithmetic breaks,
    /// and remote or cache failures otherwise.
    pub async fn serve(
        &self,
        channel_id: i64,
        message_id: i64,
        name: Option<&str>,
        range_header: Option<&str>,
    ) -> StreamResult<StreamReply> {
        let object = self.catalog.resolve(channel_id, message_id).await?;

        let range = range_header.and_then(parse_range_header);
        if let (Some(raw), None) = (range_header, range) {
            debug!("Ignoring malformed Range header {:?}", raw);
        }

        let window =
            self.config
                .window(range, object.size, self.fetcher.config().alignment)?;
        let entry = self
            .cache
            .entry(&object.cache_key(name), object.size)
            .await?;
        let file_name = object.display_name(name).to_string();

        debug!(
            "Stream {}/{} [{}, {}] of {}, {} cached",
            channel_id, message_id, window.from, window.to, object.size, entry.cached_bytes
        );

        let (body, served_from) = if object.size == 0 {
            (ReplyBody::Bytes(Bytes::new()), ServedFrom::Cache)
        } else if entry.covers(window.to) {
            (
                ReplyBody::File {
                    path: entry.file_path.clone(),
                    offset: window.from,
                    length: window.len(object.size),
                },
                ServedFrom::Cache,
            )
        } else {
            self.assemble(&object, &entry, &window).await?
        };

        Ok(StreamReply {
            object,
            file_name,
            window,
            body,
            served_from,
        })
    }

    async fn lazy_fill(
        &self,
        entry: &CacheEntry,
        data_start: u64,
        data: &Bytes,
        total_size: u64,
    ) {
        let Some(guard) = self.cache.locks().try_lock(&entry.file_path) else {
            debug!("Skipping lazy fill of {}, file is busy", entry.cache_key);
            return;
        };
        if self.owned_by_download(&entry.file_path).await {
            debug!(
                "Skipping lazy fill of {}, a queued download owns it",
                entry.cache_key
            );
            return;
        }

        if let Err(e) = self
            .cache
            .extend(&guard, &entry.file_path, data_start, data, total_size)
            .await
        {
            warn!("Lazy fill of {} failed: {}", entry.cache_key, e);
        }
    }

    async fn owned_by_download(&self, path: &Path) -> bool {
        match &self.queue {
            Some(queue) => queue.find_by_destination(path).await.is_some(),
            None => false,
        }
    }

    /// Disk prefix plus an aligned remote fetch for the rest
    async fn assemble(
        &self,
        object: &RemoteObjectRef,
        entry: &CacheEntry,
        window: &ServeWindow,
    ) -> StreamResult<(ReplyBody, ServedFrom)> {
        let remote_from = window.from.max(entry.cached_bytes);

        let prefix = if window.from < entry.cached_bytes {
            Some(
                self.cache
                    .read_range(&entry.file_path, window.from, entry.cached_bytes - window.from)
                    .await?,
            )
        } else {
            None
        };

        let span = self.fetcher.plan(object, remote_from, window.to)?;
        let fetched = self.fetcher.fetch_aligned(object, &span).await?;

        if span.aligned_from <= entry.cached_bytes {
            self.lazy_fill(entry, span.aligned_from, &fetched, object.size)
                .await;
        }

        let remote = span.trim(fetched)?;
        Ok(match prefix {
            None => (ReplyBody::Bytes(remote), ServedFrom::Remote),
            Some(prefix) => {
                let mut joined = BytesMut::with_capacity(prefix.len() + remote.len());
                joined.extend_from_slice(&prefix);
                joined.extend_from_slice(&remote);
                (ReplyBody::Bytes(joined.freeze()), ServedFrom::Mixed)
            }
        })
    }
}
