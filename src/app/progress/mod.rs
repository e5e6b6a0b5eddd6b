//! Transfer progress and rate tracking

pub mod format;
pub mod tracker;

pub use format::{format_rate, format_size};
pub use tracker::{Direction, ProgressConfig, ProgressTracker, RateSnapshot, SpeedSample};
