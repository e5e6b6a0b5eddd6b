//! Remote provider abstraction
//!
//! The gateway talks to the message-addressed storage network only through
//! the [`RemoteProvider`] trait: metadata lookup, ranged reads, uploads and a
//! readiness probe for the provider session. [`HttpProvider`] is the
//! production implementation; [`MemoryProvider`] keeps objects in memory and
//! records every call, which the tests rely on.

pub mod catalog;
pub mod config;
pub mod http;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::app::models::{ObjectMetadata, RemoteObjectRef};
use crate::errors::ProviderResult;

pub use catalog::ObjectCatalog;
pub use config::ProviderConfig;
pub use http::HttpProvider;
pub use memory::{FetchCall, MemoryProvider, UploadCall};

/// Callback receiving the cumulative number of bytes sent by an upload
pub type UploadProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// Operations the gateway needs from the remote storage network
#[async_trait]
pub trait RemoteProvider: Send + Sync {
    /// Look up size, MIME type and file name of the file carried by a message
    async fn fetch_metadata(&self, channel_id: i64, message_id: i64)
        -> ProviderResult<ObjectMetadata>;

    /// Read `length` bytes starting at `offset`
    ///
    /// Implementations may return fewer bytes only at the end of the object.
    async fn fetch_range(
        &self,
        object: &RemoteObjectRef,
        offset: u64,
        length: u64,
    ) -> ProviderResult<Bytes>;

    /// Upload a local file into a channel, returning the new message id
    async fn upload(
        &self,
        channel_id: i64,
        name: &str,
        source: &Path,
        progress: UploadProgress,
    ) -> ProviderResult<i64>;

    /// Whether the provider session is connected and authorized
    async fn is_ready(&self) -> bool;
}
