//! Runtime configuration for a gateway instance
//!
//! Gathers the per-subsystem runtime configs in one place. The TOML layer
//! in [`crate::config`] produces this; tests build it directly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::cache::CacheConfig;
use crate::app::download::DownloadConfig;
use crate::app::fetch::FetchConfig;
use crate::app::persistence::{PersistenceConfig, ResumeConfig};
use crate::app::progress::ProgressConfig;
use crate::app::provider::ProviderConfig;
use crate::app::queue::QueueConfig;
use crate::app::stream::StreamConfig;
use crate::app::worker::WorkerConfig;
use crate::constants::{coordinator, server};
use crate::errors::{ConfigError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub fetch: FetchConfig,
    pub stream: StreamConfig,
    pub download: DownloadConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub persistence: PersistenceConfig,
    pub resume: ResumeConfig,
    pub progress: ProgressConfig,
    pub provider: ProviderConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, `host:port`
    pub bind: String,
    /// Grace period for in-flight requests on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
            shutdown_timeout: coordinator::SHUTDOWN_TIMEOUT,
        }
    }
}

impl GatewayConfig {
    /// Configuration rooted in one directory, with cache and state below it
    pub fn with_data_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut config = Self::default();
        config.cache.cache_root = Some(root.join(crate::constants::app::CACHE_DIR_NAME));
        config.persistence.state_dir = Some(root.join(crate::constants::app::STATE_DIR_NAME));
        config
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.fetch.validate()?;
        self.stream.validate()?;
        self.download.validate()?;
        self.worker.validate()?;
        self.queue.validate()?;

        if self.worker.alignment != self.fetch.alignment {
            return Err(ConfigError::invalid(
                "download.alignment",
                self.worker.alignment,
                format!("must match stream.alignment ({})", self.fetch.alignment),
            )
            .into());
        }
        if self.server.bind.trim().is_empty() {
            return Err(ConfigError::invalid("server.bind", "", "must not be empty").into());
        }
        Ok(())
    }
}
