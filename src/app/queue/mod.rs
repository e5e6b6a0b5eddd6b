//! Transfer queue
//!
//! Background downloads, uploads and batches wait here until a slot for
//! their kind is free. The queue promotes tasks, hands them to a
//! [`TaskRunner`], records their progress and persists every transition so
//! unfinished work survives a restart.
//!
//! # Module Organization
//!
//! - [`types`] - Transfer kinds, states, tasks and views
//! - [`config`] - Per-kind concurrency bounds
//! - [`retry`] - Retry policy for non-resumable transfers
//! - [`state`] - Lock-protected queue state
//! - [`runner`] - Contract between the queue and its executor
//! - [`core`] - The [`TransferQueue`] itself
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use media_gateway::app::persistence::TaskPersistence;
//! use media_gateway::app::progress::{ProgressConfig, ProgressTracker};
//! use media_gateway::app::queue::{QueueConfig, TaskRunner, TransferQueue, TransferTask};
//!
//! # async fn example(runner: Arc<dyn TaskRunner>) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = TransferQueue::new(
//!     QueueConfig::default(),
//!     runner,
//!     Arc::new(TaskPersistence::in_memory()),
//!     ProgressTracker::new(ProgressConfig::default()),
//! )?;
//!
//! let task = TransferTask::upload("/tmp/clip.mp4".into(), -100, "clip.mp4", 1024);
//! let id = queue.enqueue(task).await;
//! println!("{:?}", queue.get(id).await.map(|t| t.state));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod retry;
pub mod runner;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::QueueConfig;
pub use self::core::TransferQueue;
pub use retry::{RetryDelay, RetryPolicy};
pub use runner::{RunContext, TaskRunner};
pub use state::QueueState;
pub use types::{
    BatchItem, KindSlot, QueueEvent, QueueStats, TaskOutcome, TaskView, TransferKind,
    TransferSource, TransferState, TransferTask,
};
