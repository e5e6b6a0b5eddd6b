//! Prelude module for the media gateway library
//!
//! Re-exports the items most embedders need, so that
//! `use media_gateway::prelude::*;` is enough to assemble and drive a
//! gateway.
//!
//! # Usage
//!
//! ```rust,no_run
//! use media_gateway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None).await?.to_runtime_config()?;
//!     let provider = Arc::new(HttpProvider::new(config.provider.clone())?);
//!     let gateway = Gateway::open(config, provider).await?;
//!
//!     let shutdown = ShutdownSignal::new();
//!     let background = gateway.start_background(&shutdown);
//!     // ... serve requests ...
//!     shutdown.trigger();
//!     gateway.shutdown(background).await;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Assembly and lifecycle
pub use crate::app::coordinator::{
    Gateway, GatewayConfig, PreloadOutcome, PreloadStatus, ShutdownSignal, UploadRequest,
};
pub use crate::config::AppConfig;

// Providers
pub use crate::app::provider::{HttpProvider, MemoryProvider, ProviderConfig, RemoteProvider};

// Data types
pub use crate::app::models::{ObjectMetadata, RemoteObjectRef};
pub use crate::app::queue::{QueueStats, TaskView, TransferKind, TransferState, TransferTask};
pub use crate::app::stream::{StreamReply, StreamServer};

// Commonly used constants
pub use crate::constants::{ALIGNMENT, MAX_REQUEST_SIZE, PROBE_WINDOW};

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
