//! Local partial cache
//!
//! Objects are cached as files named by their cache key in a single
//! directory. A file's length is the count of leading bytes already fetched,
//! so a partial file is always a valid prefix of the object.
//!
//! # Module Organization
//!
//! - [`config`] - Configuration types and defaults
//! - [`locks`] - Lock-per-path map enforcing one writer per file
//! - [`store`] - Entry lookup, prefix reads and contiguous appends

pub mod config;
pub mod locks;
pub mod store;

// Re-export main public API
pub use config::CacheConfig;
pub use locks::{KeyGuard, KeyedLocks};
pub use store::{file_len, CacheEntry, CacheStore, CachedFile};
