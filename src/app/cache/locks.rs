//! Lock-per-path map
//!
//! Every writer of a file (stream lazy fill, background download, full
//! download) takes the lock for that file's path first. Unrelated paths
//! never contend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard proving exclusive write access to one path
pub type KeyGuard = OwnedMutexGuard<()>;

/// Entries are pruned once the map grows past this many idle locks
const PRUNE_THRESHOLD: usize = 128;

/// Map of per-path async mutexes
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &Path) -> KeyGuard {
        self.slot(path).lock_owned().await
    }

    /// Take exclusive access to `path` only if nobody holds it
    pub fn try_lock(&self, path: &Path) -> Option<KeyGuard> {
        self.slot(path).try_lock_owned().ok()
    }

    /// Whether some writer currently holds `path`
    pub fn is_locked(&self, path: &Path) -> bool {
        let map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.get(path)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of tracked paths
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if map.len() > PRUNE_THRESHOLD {
            // Only the map holds an idle lock
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        map.entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
