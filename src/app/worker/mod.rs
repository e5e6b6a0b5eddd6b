//! Background transfer execution
//!
//! [`TransferWorker`] is the [`TaskRunner`](crate::app::queue::TaskRunner)
//! the queue hands promoted tasks to, and the engine the download
//! orchestrator drives for blocking full-object fetches.
//!
//! - Downloads resume from the on-disk length. An unaligned resume point
//!   first reads up to the next alignment boundary, after which every read
//!   is a full aligned chunk.
//! - Uploads restart from zero on every attempt, following the configured
//!   [`RetryPolicy`](crate::app::queue::RetryPolicy).
//! - Batches run their children in order and skip children already marked
//!   complete.

pub mod config;
pub mod core;


pub use config::WorkerConfig;
pub use self::core::{outcome_of, TransferWorker};
