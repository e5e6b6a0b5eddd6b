//! Configuration management for the media gateway
//!
//! Loads a TOML file from the first standard location that exists, applies
//! environment overrides for the provider endpoint, and converts the result
//! into the runtime [`GatewayConfig`]. Every section and field is optional;
//! durations are written in humantime form (`"500ms"`, `"10m"`, `"168h"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::coordinator::{GatewayConfig, ServerConfig};
use crate::app::queue::RetryPolicy;
use crate::app::{
    CacheConfig, DownloadConfig, FetchConfig, ProgressConfig, ProviderConfig, QueueConfig,
    StreamConfig, WorkerConfig,
};
use crate::app::persistence::{PersistenceConfig, ResumeConfig};
use crate::constants::{
    app, coordinator, download, env, http, limits, logging, persistence, progress, queue, resume,
    server, stream, upload,
};
use crate::errors::{AppError, ConfigError, Result};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfigToml,
    pub cache: CacheConfigToml,
    pub stream: StreamConfigToml,
    pub download: DownloadConfigToml,
    pub queue: QueueConfigToml,
    pub upload: UploadConfigToml,
    pub persistence: PersistenceConfigToml,
    pub resume: ResumeConfigToml,
    pub provider: ProviderConfigToml,
    pub progress: ProgressConfigToml,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfigToml {
    /// Listen address, `host:port`
    pub bind: String,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfigToml {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
            shutdown_timeout: coordinator::SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Cache directory (platform data directory if unset)
    pub cache_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfigToml {
    /// Provider chunk alignment unit in bytes
    pub alignment: u64,
    /// Largest single provider request in bytes
    pub max_request_size: u64,
    /// Last byte served to a request without a Range header
    pub probe_window: u64,
    /// Open-ended ranges are served this many alignment units at a time
    pub open_ended_units: u64,
}

impl Default for StreamConfigToml {
    fn default() -> Self {
        Self {
            alignment: stream::ALIGNMENT,
            max_request_size: stream::MAX_REQUEST_SIZE,
            probe_window: stream::PROBE_WINDOW,
            open_ended_units: stream::OPEN_ENDED_UNITS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfigToml {
    /// Full downloads running at once
    pub max_concurrent: usize,
    /// How long a request waits for a download slot
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// Bytes requested per provider read
    pub chunk_size: u64,
}

impl Default for DownloadConfigToml {
    fn default() -> Self {
        Self {
            max_concurrent: download::MAX_CONCURRENT,
            acquire_timeout: download::ACQUIRE_TIMEOUT,
            chunk_size: stream::MAX_REQUEST_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfigToml {
    pub max_active_downloads: usize,
    pub max_active_uploads: usize,
    pub max_active_batches: usize,
    /// Finished tasks kept for listing
    pub finished_history: usize,
}

impl Default for QueueConfigToml {
    fn default() -> Self {
        Self {
            max_active_downloads: queue::MAX_ACTIVE_DOWNLOADS,
            max_active_uploads: queue::MAX_ACTIVE_UPLOADS,
            max_active_batches: queue::MAX_ACTIVE_BATCHES,
            finished_history: queue::FINISHED_HISTORY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfigToml {
    /// Attempts per upload, including the first
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for UploadConfigToml {
    fn default() -> Self {
        Self {
            max_attempts: upload::MAX_ATTEMPTS,
            retry_delay: upload::RETRY_DELAY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfigToml {
    pub enabled: bool,
    /// Task record directory (platform data directory if unset)
    pub state_dir: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub progress_debounce: Duration,
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for PersistenceConfigToml {
    fn default() -> Self {
        Self {
            enabled: true,
            state_dir: None,
            progress_debounce: persistence::PROGRESS_DEBOUNCE,
            stale_after: persistence::STALE_AFTER,
            sweep_interval: persistence::SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfigToml {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ResumeConfigToml {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: resume::READY_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfigToml {
    pub base_url: String,
    pub api_token: Option<String>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Connection pool idle timeout (no timeout if unset)
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Option<Duration>,
    pub pool_max_per_host: usize,
    pub tcp_nodelay: bool,
    pub rate_limit_rps: u32,
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
}

impl Default for ProviderConfigToml {
    fn default() -> Self {
        let runtime = ProviderConfig::default();
        Self {
            base_url: runtime.base_url,
            api_token: None,
            request_timeout: http::DEFAULT_TIMEOUT,
            upload_timeout: http::UPLOAD_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            tcp_nodelay: true,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            max_retries: limits::MAX_RETRIES,
            retry_base_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfigToml {
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub history_window: Duration,
}

impl Default for ProgressConfigToml {
    fn default() -> Self {
        Self {
            tick_interval: progress::TICK_INTERVAL,
            history_window: progress::HISTORY_WINDOW,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when neither the command line nor RUST_LOG set one
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration with precedence: defaults, then the config file,
    /// then environment variables
    ///
    /// An explicit `config_file_override` must exist; the standard locations
    /// are optional.
    pub async fn load(config_file_override: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_file_override {
            Some(path) if path.exists() => Some(path),
            Some(path) => return Err(ConfigError::NotFound { path }.into()),
            None => Self::find_config_file(),
        };

        let mut config = match config_path {
            Some(path) => Self::load_from_file(&path).await?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };

        config.apply_overrides_from(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply provider endpoint overrides from a variable lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(env::PROVIDER_URL).filter(|v| !v.trim().is_empty()) {
            debug!("Provider URL overridden by {}", env::PROVIDER_URL);
            self.provider.base_url = url;
        }
        if let Some(token) = lookup(env::PROVIDER_TOKEN).filter(|v| !v.trim().is_empty()) {
            debug!("Provider token set from {}", env::PROVIDER_TOKEN);
            self.provider.api_token = Some(token);
        }
    }

    /// Write a commented default config file
    ///
    /// Returns the path written. Refuses to overwrite an existing file
    /// unless `force` is set.
    pub async fn initialize(path: Option<PathBuf>, force: bool) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path,
            None => Self::get_default_config_path()?,
        };

        if config_path.exists() && !force {
            return Err(AppError::generic(format!(
                "Config file already exists: {} (use --force to overwrite)",
                config_path.display()
            )));
        }

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::generic(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(|e| {
                AppError::generic(format!(
                    "Failed to write config file {}: {}",
                    config_path.display(),
                    e
                ))
            })?;

        info!("Wrote default configuration to {}", config_path.display());
        Ok(config_path)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![
            PathBuf::from(".").join(app::LOCAL_CONFIG_FILE),
            PathBuf::from("./config.toml"),
        ];
        if let Ok(user_config) = Self::get_default_config_path() {
            search_paths.push(user_config);
        }
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc").join(app::APP_DIR_NAME).join("config.toml"));

        let found = search_paths.into_iter().find(|path| path.exists());
        match &found {
            Some(path) => debug!("Found config file: {}", path.display()),
            None => debug!("No config file found in standard locations"),
        }
        found
    }

    /// Get the default config file path for the current user
    pub fn get_default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::generic("Could not determine user config directory"))?;
        Ok(config_dir.join(app::APP_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::generic(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: AppConfig = toml::from_str(&content).map_err(ConfigError::InvalidFormat)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Convert to the runtime configuration and validate it
    pub fn to_runtime_config(&self) -> Result<GatewayConfig> {
        let config = GatewayConfig {
            server: ServerConfig {
                bind: self.server.bind.clone(),
                shutdown_timeout: self.server.shutdown_timeout,
            },
            cache: CacheConfig {
                cache_root: self.cache.cache_root.clone(),
            },
            fetch: FetchConfig {
                alignment: self.stream.alignment,
                max_request_size: self.stream.max_request_size,
            },
            stream: StreamConfig {
                probe_window: self.stream.probe_window,
                open_ended_units: self.stream.open_ended_units,
            },
            download: DownloadConfig {
                max_concurrent: self.download.max_concurrent,
                acquire_timeout: self.download.acquire_timeout,
            },
            queue: QueueConfig {
                max_active_downloads: self.queue.max_active_downloads,
                max_active_uploads: self.queue.max_active_uploads,
                max_active_batches: self.queue.max_active_batches,
                finished_history: self.queue.finished_history,
            },
            worker: WorkerConfig {
                chunk_size: self.download.chunk_size,
                alignment: self.stream.alignment,
                upload_retry: RetryPolicy::fixed(self.upload.max_attempts, self.upload.retry_delay),
            },
            persistence: PersistenceConfig {
                enabled: self.persistence.enabled,
                state_dir: self.persistence.state_dir.clone(),
                progress_debounce: self.persistence.progress_debounce,
                stale_after: self.persistence.stale_after,
                sweep_interval: self.persistence.sweep_interval,
            },
            resume: ResumeConfig {
                enabled: self.resume.enabled,
                poll_interval: self.resume.poll_interval,
            },
            progress: ProgressConfig {
                tick_interval: self.progress.tick_interval,
                history_window: self.progress.history_window,
            },
            provider: ProviderConfig {
                base_url: self.provider.base_url.clone(),
                api_token: self.provider.api_token.clone(),
                request_timeout: self.provider.request_timeout,
                upload_timeout: self.provider.upload_timeout,
                connect_timeout: self.provider.connect_timeout,
                pool_idle_timeout: self.provider.pool_idle_timeout,
                pool_max_per_host: self.provider.pool_max_per_host,
                tcp_nodelay: self.provider.tcp_nodelay,
                rate_limit_rps: self.provider.rate_limit_rps,
                max_retries: self.provider.max_retries,
                retry_base_delay: self.provider.retry_base_delay,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Generate default configuration content with comments
    pub fn generate_default_config_content() -> String {
        format!(
            r#"# Media Gateway Configuration
# Every setting is optional; removing a line restores its default.
# Durations use humantime notation: "500ms", "30s", "10m", "1h".

[server]
bind = "{bind}"
shutdown_timeout = "30s"

[cache]
# Cache directory (leave unset to use the platform data directory)
# cache_root = "/var/lib/media-gateway/cache"

[stream]
# Provider chunk alignment, 512 KiB
alignment = {alignment}
# Largest single provider request, 1 MiB
max_request_size = {max_request}
# Bytes served to players that send no Range header, 2 MiB
probe_window = {probe}
# Open-ended ranges are served this many alignment units at a time
open_ended_units = {units}

[download]
max_concurrent = {downloads}
acquire_timeout = "10m"
chunk_size = {max_request}

[queue]
max_active_downloads = {queue_downloads}
max_active_uploads = {queue_uploads}
max_active_batches = {queue_batches}
finished_history = {history}

[upload]
max_attempts = {attempts}
retry_delay = "60s"

[persistence]
enabled = true
# state_dir = "/var/lib/media-gateway/state"
progress_debounce = "5s"
stale_after = "168h"
sweep_interval = "6h"

[resume]
enabled = true
poll_interval = "2s"

[provider]
# Can also be set with {url_var} and {token_var}
base_url = "{base_url}"
# api_token = "..."
request_timeout = "60s"
upload_timeout = "1h"
connect_timeout = "30s"
pool_idle_timeout = "90s"
pool_max_per_host = {pool}
tcp_nodelay = true
rate_limit_rps = {rps}
max_retries = {retries}
retry_base_delay = "500ms"

[progress]
tick_interval = "1s"
history_window = "10m"

[logging]
level = "{level}"  # error, warn, info, debug, trace
"#,
            bind = server::DEFAULT_BIND,
            alignment = stream::ALIGNMENT,
            max_request = stream::MAX_REQUEST_SIZE,
            probe = stream::PROBE_WINDOW,
            units = stream::OPEN_ENDED_UNITS,
            downloads = download::MAX_CONCURRENT,
            queue_downloads = queue::MAX_ACTIVE_DOWNLOADS,
            queue_uploads = queue::MAX_ACTIVE_UPLOADS,
            queue_batches = queue::MAX_ACTIVE_BATCHES,
            history = queue::FINISHED_HISTORY,
            attempts = upload::MAX_ATTEMPTS,
            url_var = env::PROVIDER_URL,
            token_var = env::PROVIDER_TOKEN,
            base_url = ProviderConfig::default().base_url,
            pool = http::POOL_MAX_PER_HOST,
            rps = limits::DEFAULT_RATE_LIMIT_RPS,
            retries = limits::MAX_RETRIES,
            level = logging::DEFAULT_LOG_LEVEL,
        )
    }
}
