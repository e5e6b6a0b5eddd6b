//! Durable task records and restart recovery
//!
//! - [`record`] - Serialized task record
//! - [`store`] - [`TaskStore`] trait with JSON-file and in-memory stores
//! - [`debounce`] - Per-record progress write limiter
//! - [`service`] - [`TaskPersistence`], the queue's view of the store
//! - [`resume`] - [`ResumeService`], restoring records after a restart

pub mod debounce;
pub mod record;
pub mod resume;
pub mod service;
pub mod store;

pub use debounce::ProgressDebouncer;
pub use record::PersistedTaskRecord;
pub use resume::{ResumeConfig, ResumeReport, ResumeService};
pub use service::{PersistenceConfig, TaskPersistence};
pub use store::{JsonTaskStore, MemoryTaskStore, ProgressUpdate, TaskStore};
