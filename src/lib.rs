//! Media Gateway Library
//!
//! A caching range-streaming gateway in front of a slow, chunk-aligned
//! remote file provider. Range requests are answered from a local partial
//! cache where possible and from aligned provider reads otherwise; whole
//! files are downloaded once and shared between concurrent callers, and
//! background transfers are queued, persisted and resumed across restarts.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

// Re-export commonly used types for convenience
pub use errors::{AppError, Result};
