//! Cache configuration types and defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::app;

/// Configuration for the local partial cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory for cached objects (OS-specific if None)
    pub cache_root: Option<PathBuf>,
}

impl CacheConfig {
    /// Create a new cache configuration with custom cache root
    pub fn with_cache_root(cache_root: PathBuf) -> Self {
        Self {
            cache_root: Some(cache_root),
        }
    }

    /// Resolve the cache directory, falling back to the user data directory
    ///
    /// - Linux: ~/.local/share/media-gateway/cache
    /// - macOS: ~/Library/Application Support/media-gateway/cache
    /// - Windows: %APPDATA%/media-gateway/cache
    pub fn resolve_root(&self) -> Option<PathBuf> {
        self.cache_root.clone().or_else(|| {
            dirs::data_dir().map(|dir| dir.join(app::APP_DIR_NAME).join(app::CACHE_DIR_NAME))
        })
    }
}
