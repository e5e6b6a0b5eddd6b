//! Application constants for the media gateway
//!
//! Defaults used by the configuration layer, grouped by subsystem. Most of
//! these can be overridden from the config file; the values here are the
//! behavior the gateway has when nothing is configured.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Base URL of the remote provider API
    pub const PROVIDER_URL: &str = "MEDIA_GATEWAY_PROVIDER_URL";

    /// Bearer token for the remote provider API
    pub const PROVIDER_TOKEN: &str = "MEDIA_GATEWAY_PROVIDER_TOKEN";
}

/// Application identity and file locations
pub mod app {
    /// Directory name used under the user config directory
    pub const APP_DIR_NAME: &str = "media-gateway";

    /// Project-local config file name
    pub const LOCAL_CONFIG_FILE: &str = "media-gateway.toml";

    /// Sub-directory of the data root holding cached objects
    pub const CACHE_DIR_NAME: &str = "cache";

    /// Sub-directory of the data root holding persisted task records
    pub const STATE_DIR_NAME: &str = "state";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// User agent for provider requests
    pub const USER_AGENT: &str = concat!("media-gateway/", env!("CARGO_PKG_VERSION"));

    /// Default provider request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 16;

    /// Upload request timeout, uploads of large media take a while
    pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);
}

/// Rate limiting and retry configuration for provider calls
pub mod limits {
    /// Default provider request rate (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 20;

    /// Maximum retry attempts for throttled provider requests
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
}

/// Streaming and chunk alignment
pub mod stream {
    /// Provider chunk alignment unit (512 KiB)
    pub const ALIGNMENT: u64 = 512 * 1024;

    /// Probe window end for requests without a Range header (2 MiB)
    pub const PROBE_WINDOW: u64 = 2 * 1024 * 1024;

    /// Open-ended ranges are served this many alignment units at a time
    pub const OPEN_ENDED_UNITS: u64 = 5;

    /// Largest single range request sent to the provider (1 MiB)
    pub const MAX_REQUEST_SIZE: u64 = 1024 * 1024;
}

/// Full-object download orchestrator
pub mod download {
    use super::Duration;

    /// Concurrent full downloads
    pub const MAX_CONCURRENT: usize = 3;

    /// How long a caller waits for a download slot before getting Busy
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
}

/// Transfer queue bounds
pub mod queue {
    /// Concurrent background downloads
    pub const MAX_ACTIVE_DOWNLOADS: usize = 1;

    /// Concurrent uploads
    pub const MAX_ACTIVE_UPLOADS: usize = 1;

    /// Concurrent batch transfers
    pub const MAX_ACTIVE_BATCHES: usize = 1;

    /// Finished tasks kept in memory for listing
    pub const FINISHED_HISTORY: usize = 200;

    /// Capacity of the task change broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Tasks tracked for record write ordering before old entries are pruned
    pub const WRITE_LOG_CAPACITY: usize = 4096;
}

/// Upload retry policy
pub mod upload {
    use super::Duration;

    /// Attempts per upload, including the first
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Fixed delay between upload attempts
    pub const RETRY_DELAY: Duration = Duration::from_secs(60);
}

/// Task persistence
pub mod persistence {
    use super::Duration;

    /// Minimum interval between progress writes for one record
    pub const PROGRESS_DEBOUNCE: Duration = Duration::from_secs(5);

    /// Records not updated for this long are deleted
    pub const STALE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// How often the stale sweep runs
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

    /// Record file extension
    pub const RECORD_EXTENSION: &str = "json";

    /// Suffix for in-flight record writes
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";
}

/// Resume at startup
pub mod resume {
    use super::Duration;

    /// Poll interval while waiting for the provider session
    pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
}

/// Progress tracking
pub mod progress {
    use super::Duration;

    /// Rate sampling tick
    pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

    /// Length of the speed history window
    pub const HISTORY_WINDOW: Duration = Duration::from_secs(600);

    /// Capacity of the rate broadcast channel
    pub const EVENT_CHANNEL_CAPACITY: usize = 16;

    /// Units used when formatting byte sizes
    pub const SIZE_UNITS: [&str; 7] = ["bytes", "KB", "MB", "GB", "TB", "PB", "EB"];
}

/// HTTP server
pub mod server {
    /// Default listen address
    pub const DEFAULT_BIND: &str = "127.0.0.1:8085";

    /// Cache status header on full downloads
    pub const CACHE_STATUS_HEADER: &str = "x-cache-status";
}

/// Gateway lifecycle
pub mod coordinator {
    use super::Duration;

    /// How long shutdown waits for each background task
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// How long the HTTP server may take to drain on shutdown
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
}

/// Logging
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use http::USER_AGENT;
pub use limits::DEFAULT_RATE_LIMIT_RPS;
pub use stream::{ALIGNMENT, MAX_REQUEST_SIZE, PROBE_WINDOW};
