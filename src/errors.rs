//! Error types for the media gateway
//!
//! Each subsystem has its own error enum so that callers can react to the
//! conditions they care about (not found, busy, canceled) while everything
//! still converts into the top-level [`AppError`].

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a remote provider implementation
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The channel or message does not exist on the remote side
    #[error("Remote object not found: channel {channel_id}, message {message_id}")]
    NotFound { channel_id: i64, message_id: i64 },

    /// HTTP transport error
    #[error("Provider HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an unexpected status
    #[error("Provider error: HTTP {status}")]
    Status { status: u16 },

    /// Provider kept rate limiting us after all retries
    #[error("Provider rate limit exceeded")]
    RateLimited,

    /// Provider is not connected or the session is not authorized yet
    #[error("Provider unavailable: {reason}")]
    Unavailable { reason: String },

    /// Provider returned a body we could not interpret
    #[error("Invalid provider response: {reason}")]
    InvalidResponse { reason: String },

    /// Invalid provider endpoint URL
    #[error("Invalid provider URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },

    /// Local I/O while talking to the provider (upload sources)
    #[error("Provider I/O error")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ProviderError::Status { status } => *status >= 500,
            ProviderError::RateLimited | ProviderError::Unavailable { .. } => true,
            _ => false,
        }
    }
}

/// Errors from the chunk-aligned fetch adapter
#[derive(Error, Debug)]
pub enum FetchError {
    /// Internal range arithmetic produced an impossible span
    #[error("Range alignment error: {reason}")]
    Alignment { reason: String },

    /// Remote fetch failed
    #[error(transparent)]
    Remote(#[from] ProviderError),
}

/// Local cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// I/O error on a cache file
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Requested bytes lie beyond what is on disk
    #[error("Cache read out of range: {path} has {available} bytes, requested up to {requested}")]
    OutOfRange {
        path: PathBuf,
        available: u64,
        requested: u64,
    },

    /// An append did not start at the current end of file
    #[error("Cache append at offset {offset} does not match file length {length}: {path}")]
    NonContiguousAppend {
        path: PathBuf,
        offset: u64,
        length: u64,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the progressive stream server
#[derive(Error, Debug)]
pub enum StreamError {
    /// Object or message does not exist
    #[error("Object not found: channel {channel_id}, message {message_id}")]
    NotFound { channel_id: i64, message_id: i64 },

    /// Requested start offset is at or past the end of the object
    #[error("Range not satisfiable: start {from} for object of {total} bytes")]
    RangeNotSatisfiable { from: u64, total: u64 },

    /// Range arithmetic inconsistency (always a bug)
    #[error("Range alignment error: {reason}")]
    Alignment { reason: String },

    /// Remote provider failure
    #[error(transparent)]
    Remote(ProviderError),

    /// Local cache failure
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<FetchError> for StreamError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Alignment { reason } => StreamError::Alignment { reason },
            FetchError::Remote(e) => StreamError::from(e),
        }
    }
}

impl From<ProviderError> for StreamError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound {
                channel_id,
                message_id,
            } => StreamError::NotFound {
                channel_id,
                message_id,
            },
            other => StreamError::Remote(other),
        }
    }
}

/// Errors from a single transfer (download, upload, batch item)
#[derive(Error, Debug)]
pub enum TransferError {
    /// The transfer was canceled through its token
    #[error("Transfer canceled")]
    Canceled,

    /// Upload source file vanished
    #[error("Source file no longer exists: {path}")]
    SourceMissing { path: PathBuf },

    /// Remote provider failure
    #[error(transparent)]
    Remote(#[from] ProviderError),

    /// Provider returned fewer bytes than requested for a chunk
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// The destination file is smaller than the object after the transfer
    #[error("Incomplete download: {received} of {expected} bytes on disk")]
    Incomplete { received: u64, expected: u64 },

    /// Task source does not match its kind
    #[error("Invalid task: {reason}")]
    InvalidTask { reason: String },

    /// Cache file could not be read or extended
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Local file I/O
    #[error("Transfer I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from the full-object download orchestrator
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Object or message does not exist
    #[error("Object not found: channel {channel_id}, message {message_id}")]
    NotFound { channel_id: i64, message_id: i64 },

    /// No download slot became free within the wait timeout
    #[error("Server busy: no download slot available after {seconds} seconds")]
    Busy { seconds: u64 },

    /// Caller went away or the gateway is shutting down
    #[error("Download canceled")]
    Canceled,

    /// Remote provider failure during metadata lookup
    #[error(transparent)]
    Remote(ProviderError),

    /// Local cache failure
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The transfer itself failed
    #[error("Download failed: {message}")]
    Failed { message: String },
}

impl From<ProviderError> for DownloadError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotFound {
                channel_id,
                message_id,
            } => DownloadError::NotFound {
                channel_id,
                message_id,
            },
            other => DownloadError::Remote(other),
        }
    }
}

/// Transfer queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// No task with this id is known
    #[error("Task not found: {id}")]
    TaskNotFound { id: Uuid },

    /// Operation not valid for the task's current state
    #[error("Invalid task state transition for {id}: {from} -> {to}")]
    InvalidStateTransition { id: Uuid, from: String, to: String },

    /// Queue configuration rejected
    #[error("Invalid queue configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Durable task store errors
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Record store I/O failure
    #[error("Task store I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Record could not be (de)serialized
    #[error("Task record serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// No record with this id
    #[error("Task record not found: {id}")]
    RecordNotFound { id: Uuid },
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Remote provider error
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Fetch adapter error
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Stream server error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Transfer error
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Download orchestrator error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Persistence error
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Provider(e)
            | AppError::Fetch(FetchError::Remote(e))
            | AppError::Stream(StreamError::Remote(e))
            | AppError::Transfer(TransferError::Remote(e))
            | AppError::Download(DownloadError::Remote(e)) => e.is_transient(),

            AppError::Download(DownloadError::Busy { .. })
            | AppError::Transfer(TransferError::ShortRead { .. }) => true,

            AppError::Fetch(FetchError::Alignment { .. })
            | AppError::Stream(StreamError::Alignment { .. })
            | AppError::Transfer(TransferError::SourceMissing { .. })
            | AppError::Config(_) => false,

            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Provider(_) => "provider",
            AppError::Fetch(_) => "fetch",
            AppError::Cache(_) => "cache",
            AppError::Stream(_) => "stream",
            AppError::Transfer(_) => "transfer",
            AppError::Download(_) => "download",
            AppError::Queue(_) => "queue",
            AppError::Persistence(_) => "persistence",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Provider result type alias
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Fetch result type alias
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Stream result type alias
pub type StreamResult<T> = std::result::Result<T, StreamError>;

/// Transfer result type alias
pub type TransferResult<T> = std::result::Result<T, TransferError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Queue result type alias
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Persistence result type alias
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;
