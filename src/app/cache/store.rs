//! Local partial cache store
//!
//! A cached object is a plain file named by its cache key. Its length is the
//! number of leading bytes already downloaded; files only ever grow by
//! appending at their current end, so `cached_bytes` never decreases.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::errors::{CacheError, CacheResult};

use super::config::CacheConfig;
use super::locks::{KeyGuard, KeyedLocks};

/// Snapshot of one object's local copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// `{channel}-{message}-{name}`
    pub cache_key: String,
    /// Location on disk
    pub file_path: PathBuf,
    /// Size of the remote object
    pub total_size: u64,
    /// Bytes on disk, never more than `total_size`
    pub cached_bytes: u64,
    /// On-disk length has reached the object size
    pub complete: bool,
}

impl CacheEntry {
    /// Whether `[from, to]` can be served from disk alone
    pub fn covers(&self, to: u64) -> bool {
        self.complete || to < self.cached_bytes
    }
}

/// A file found in the cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub cache_key: String,
    pub length: u64,
}

/// On-disk cache of partially and fully downloaded objects
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    locks: Arc<KeyedLocks>,
}

impl CacheStore {
    /// Create a cache store, creating the root directory if needed
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if no root can be determined or created
    pub async fn new(config: CacheConfig) -> CacheResult<Self> {
        let root = config
            .resolve_root()
            .ok_or_else(|| CacheError::DirectoryNotAccessible {
                path: PathBuf::from("system data directory"),
            })?;

        if !root.exists() {
            fs::create_dir_all(&root)
                .await
                .map_err(|_| CacheError::DirectoryNotAccessible { path: root.clone() })?;
            debug!("Created cache directory: {}", root.display());
        }

        info!("Initialized cache store with root: {}", root.display());
        Ok(Self {
            root,
            locks: Arc::new(KeyedLocks::new()),
        })
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-path writer locks shared with every component that writes files
    pub fn locks(&self) -> &Arc<KeyedLocks> {
        &self.locks
    }

    /// Path of the cache file for a key
    pub fn path_for(&self, cache_key: &str) -> PathBuf {
        self.root.join(cache_key)
    }

    /// Current state of the cache file for `cache_key`
    pub async fn entry(&self, cache_key: &str, total_size: u64) -> CacheResult<CacheEntry> {
        let file_path = self.path_for(cache_key);
        // A missing file is never complete, not even for an empty object
        let length = match fs::metadata(&file_path).await {
            Ok(metadata) => Some(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(CacheError::io(&file_path, e)),
        };
        Ok(CacheEntry {
            cache_key: cache_key.to_string(),
            cached_bytes: length.unwrap_or(0).min(total_size),
            complete: length.is_some_and(|length| length >= total_size),
            total_size,
            file_path,
        })
    }

    /// Read `length` bytes at `offset` from a cache file
    pub async fn read_range(&self, path: &Path, offset: u64, length: u64) -> CacheResult<Bytes> {
        let available = file_len(path).await?;
        let end = offset.saturating_add(length);
        if end > available {
            return Err(CacheError::OutOfRange {
                path: path.to_path_buf(),
                available,
                requested: end,
            });
        }

        let mut file = fs::File::open(path)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| CacheError::io(path, e))?;

        let mut buffer = BytesMut::zeroed(length as usize);
        file.read_exact(&mut buffer)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        Ok(buffer.freeze())
    }

    /// Append `data` at `offset`, which must equal the current file length
    ///
    /// The caller must hold the path's [`KeyGuard`].
    pub async fn append(&self, _guard: &KeyGuard, path: &Path, offset: u64, data: &[u8]) -> CacheResult<u64> {
        let length = file_len(path).await?;
        if length != offset {
            return Err(CacheError::NonContiguousAppend {
                path: path.to_path_buf(),
                offset,
                length,
            });
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        file.flush().await.map_err(|e| CacheError::io(path, e))?;

        Ok(offset + data.len() as u64)
    }

    /// Create the file if it does not exist yet, leaving any content alone
    pub async fn touch(&self, _guard: &KeyGuard, path: &Path) -> CacheResult<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| CacheError::io(path, e))?;
        Ok(())
    }

    /// Extend a cache file with fetched bytes
    ///
    /// `data` holds the object bytes starting at `data_start`. If the data
    /// overlaps or touches the end of the file, the new tail is appended.
    /// Returns the new length when something was written.
    pub async fn extend(
        &self,
        guard: &KeyGuard,
        path: &Path,
        data_start: u64,
        data: &Bytes,
        total_size: u64,
    ) -> CacheResult<Option<u64>> {
        let length = file_len(path).await?;
        let data_end = data_start + data.len() as u64;
        if length < data_start || length >= data_end || length >= total_size {
            return Ok(None);
        }

        let tail = &data[(length - data_start) as usize..];
        let new_length = self.append(guard, path, length, tail).await?;
        debug!(
            "Lazy fill extended {} from {} to {} bytes",
            path.display(),
            length,
            new_length
        );
        Ok(Some(new_length))
    }

    /// Files currently in the cache directory
    pub async fn list(&self) -> CacheResult<Vec<CachedFile>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::io(&self.root, e))?;
        let mut files = Vec::new();

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.root, e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| CacheError::io(entry.path(), e))?;
            if metadata.is_file() {
                files.push(CachedFile {
                    cache_key: entry.file_name().to_string_lossy().into_owned(),
                    length: metadata.len(),
                });
            }
        }

        files.sort_by(|a, b| a.cache_key.cmp(&b.cache_key));
        Ok(files)
    }
}

/// Length of a file, 0 when it does not exist
pub async fn file_len(path: &Path) -> CacheResult<u64> {
    match fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
