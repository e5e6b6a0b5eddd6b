//! Core application logic for the media gateway
//!
//! A client range request reaches the [`stream`] server, which consults the
//! [`cache`] and fills gaps through the aligned [`fetch`] adapter on top of a
//! [`provider`]. Whole-file requests go through the [`download`]
//! orchestrator. Background transfers wait in the [`queue`], run on the
//! [`worker`], survive restarts through [`persistence`], and report rates
//! to [`progress`]. The [`coordinator`] wires it all together and [`api`]
//! exposes it over HTTP.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_gateway::app::{Gateway, GatewayConfig, MemoryProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(MemoryProvider::new());
//! provider
//!     .add_object(-100, 42, "clip.mp4", "video/mp4", vec![0u8; 4096])
//!     .await;
//!
//! let gateway = Gateway::open(GatewayConfig::with_data_root("./data"), provider).await?;
//! let reply = gateway
//!     .streams()
//!     .serve(-100, 42, None, Some("bytes=0-1023"))
//!     .await?;
//! println!("{:?}", reply.content_range());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cache;
pub mod coordinator;
pub mod download;
pub mod fetch;
pub mod models;
pub mod persistence;
pub mod progress;
pub mod provider;
pub mod queue;
pub mod stream;
pub mod worker;

// Re-export main public API
pub use cache::{CacheConfig, CacheEntry, CacheStore};
pub use coordinator::{Gateway, GatewayConfig};
pub use download::{CacheStatus, DownloadConfig, DownloadOrchestrator};
pub use fetch::{ChunkFetcher, FetchConfig};
pub use models::{ObjectMetadata, RemoteObjectRef};
pub use persistence::{JsonTaskStore, MemoryTaskStore, TaskPersistence, TaskStore};
pub use progress::{ProgressConfig, ProgressTracker};
pub use provider::{HttpProvider, MemoryProvider, ObjectCatalog, ProviderConfig, RemoteProvider};
pub use queue::{QueueConfig, TransferQueue, TransferState, TransferTask};
pub use stream::{StreamConfig, StreamReply, StreamServer};
pub use worker::{TransferWorker, WorkerConfig};
