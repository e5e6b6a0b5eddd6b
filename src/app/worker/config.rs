//! Worker configuration

use serde::{Deserialize, Serialize};

use crate::app::queue::RetryPolicy;
use crate::constants::stream;
use crate::errors::ConfigError;

/// Settings for background transfer execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Bytes requested per provider read once a download is aligned
    pub chunk_size: u64,
    /// Alignment boundary downloads snap to after a resume
    pub alignment: u64,
    /// Attempts and delays for uploads, which restart from zero each time
    pub upload_retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: stream::MAX_REQUEST_SIZE,
            alignment: stream::ALIGNMENT,
            upload_retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alignment == 0 {
            return Err(ConfigError::invalid(
                "download.alignment",
                self.alignment,
                "must be greater than 0",
            ));
        }
        if self.chunk_size == 0 || self.chunk_size % self.alignment != 0 {
            return Err(ConfigError::invalid(
                "download.chunk_size",
                self.chunk_size,
                "must be a non-zero multiple of the alignment",
            ));
        }
        Ok(())
    }
}
