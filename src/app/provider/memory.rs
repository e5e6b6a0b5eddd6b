//! In-memory provider
//!
//! Holds objects as byte buffers and records every call made against it.
//! Used by the test suites and handy for exercising the gateway without a
//! provider bridge.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::app::models::{ObjectMetadata, RemoteObjectRef};
use crate::errors::{ProviderError, ProviderResult};

use super::{RemoteProvider, UploadProgress};

/// A recorded `fetch_range` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCall {
    pub channel_id: i64,
    pub message_id: i64,
    pub offset: u64,
    pub length: u64,
}

/// A recorded successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub channel_id: i64,
    pub name: String,
    pub size: u64,
    pub message_id: i64,
}

struct StoredObject {
    metadata: ObjectMetadata,
    data: Bytes,
}

/// [`RemoteProvider`] serving objects from memory
pub struct MemoryProvider {
    objects: RwLock<HashMap<(i64, i64), StoredObject>>,
    fetches: Mutex<Vec<FetchCall>>,
    uploads: Mutex<Vec<UploadCall>>,
    metadata_calls: AtomicUsize,
    ready: AtomicBool,
    upload_failures: AtomicU32,
    upload_attempts: AtomicU32,
    fetch_delay: Mutex<Option<Duration>>,
    next_message_id: AtomicUsize,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    /// Creates an empty provider that reports itself ready
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            metadata_calls: AtomicUsize::new(0),
            ready: AtomicBool::new(true),
            upload_failures: AtomicU32::new(0),
            upload_attempts: AtomicU32::new(0),
            fetch_delay: Mutex::new(None),
            next_message_id: AtomicUsize::new(1000),
        }
    }

    /// Adds an object and returns its reference
    pub async fn add_object(
        &self,
        channel_id: i64,
        message_id: i64,
        file_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> RemoteObjectRef {
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        };
        self.objects.write().await.insert(
            (channel_id, message_id),
            StoredObject {
                metadata: metadata.clone(),
                data: Bytes::from(data),
            },
        );
        RemoteObjectRef::from_metadata(channel_id, message_id, metadata)
    }

    /// Delete an object, as if its message was removed upstream
    pub async fn remove_object(&self, channel_id: i64, message_id: i64) -> bool {
        self.objects
            .write()
            .await
            .remove(&(channel_id, message_id))
            .is_some()
    }

    /// Every `fetch_range` call so far, in order
    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.fetches
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Forget recorded fetch calls
    pub fn clear_fetch_calls(&self) {
        if let Ok(mut calls) = self.fetches.lock() {
            calls.clear();
        }
    }

    /// Number of metadata lookups served
    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    /// Completed uploads
    pub fn uploads(&self) -> Vec<UploadCall> {
        self.uploads
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Upload attempts including failed ones
    pub fn upload_attempts(&self) -> u32 {
        self.upload_attempts.load(Ordering::SeqCst)
    }

    /// Toggle session readiness
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make the next `count` uploads fail with a transient error
    pub fn fail_next_uploads(&self, count: u32) {
        self.upload_failures.store(count, Ordering::SeqCst);
    }

    /// Delay every range fetch, for exercising cancellation and contention
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        if let Ok(mut slot) = self.fetch_delay.lock() {
            *slot = delay;
        }
    }

    fn current_fetch_delay(&self) -> Option<Duration> {
        self.fetch_delay.lock().ok().and_then(|slot| *slot)
    }
}

#[async_trait]
impl RemoteProvider for MemoryProvider {
    async fn fetch_metadata(
        &self,
        channel_id: i64,
        message_id: i64,
    ) -> ProviderResult<ObjectMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.objects
            .read()
            .await
            .get(&(channel_id, message_id))
            .map(|object| object.metadata.clone())
            .ok_or(ProviderError::NotFound {
                channel_id,
                message_id,
            })
    }

    async fn fetch_range(
        &self,
        object: &RemoteObjectRef,
        offset: u64,
        length: u64,
    ) -> ProviderResult<Bytes> {
        if let Ok(mut calls) = self.fetches.lock() {
            calls.push(FetchCall {
                channel_id: object.channel_id,
                message_id: object.message_id,
                offset,
                length,
            });
        }

        if let Some(delay) = self.current_fetch_delay() {
            tokio::time::sleep(delay).await;
        }

        let objects = self.objects.read().await;
        let stored = objects
            .get(&(object.channel_id, object.message_id))
            .ok_or(ProviderError::NotFound {
                channel_id: object.channel_id,
                message_id: object.message_id,
            })?;

        let len = stored.data.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        Ok(stored.data.slice(start..end))
    }

    async fn upload(
        &self,
        channel_id: i64,
        name: &str,
        source: &Path,
        progress: UploadProgress,
    ) -> ProviderResult<i64> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        let data = tokio::fs::read(source).await?;

        // Report half the file before a simulated failure
        let half = data.len() as u64 / 2;
        progress(half);

        let should_fail = self
            .upload_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ProviderError::Unavailable {
                reason: "simulated upload failure".to_string(),
            });
        }

        progress(data.len() as u64);

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) as i64;
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            mime_type: "application/octet-stream".to_string(),
            file_name: name.to_string(),
        };
        self.objects.write().await.insert(
            (channel_id, message_id),
            StoredObject {
                metadata,
                data: Bytes::from(data.clone()),
            },
        );

        if let Ok(mut uploads) = self.uploads.lock() {
            uploads.push(UploadCall {
                channel_id,
                name: name.to_string(),
                size: data.len() as u64,
                message_id,
            });
        }
        Ok(message_id)
    }

    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}
