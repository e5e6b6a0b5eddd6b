//! Task record stores
//!
//! [`TaskStore`] is the seam between the queue and durable storage.
//! [`JsonTaskStore`] keeps one JSON document per record in a state
//! directory; [`MemoryTaskStore`] backs tests and disabled persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::queue::TransferState;
use crate::constants::persistence::{RECORD_EXTENSION, TEMP_FILE_SUFFIX};
use crate::errors::{PersistenceError, PersistenceResult};

use super::record::PersistedTaskRecord;

/// Partial update applied on progress
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub transmitted_bytes: u64,
    pub progress: f64,
    pub completed_parts: Vec<usize>,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert or replace a record
    async fn save(&self, record: &PersistedTaskRecord) -> PersistenceResult<()>;

    /// Update progress fields of an existing record
    async fn update_progress(&self, update: &ProgressUpdate) -> PersistenceResult<()>;

    /// Remove a record; missing records are not an error
    async fn delete(&self, id: Uuid) -> PersistenceResult<()>;

    /// Flag a record as failed
    async fn mark_error(&self, id: Uuid, message: &str) -> PersistenceResult<()>;

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<PersistedTaskRecord>>;

    /// Records in a resumable state, oldest first
    async fn list_pending(&self) -> PersistenceResult<Vec<PersistedTaskRecord>>;

    /// Every record, oldest first
    async fn list_all(&self) -> PersistenceResult<Vec<PersistedTaskRecord>>;

    /// Delete records not updated since `cutoff`, returning how many
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize>;
}

fn sort_by_creation(records: &mut [PersistedTaskRecord]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.internal_id.cmp(&b.internal_id))
    });
}

/// One `{uuid}.json` file per record
#[derive(Debug)]
pub struct JsonTaskStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonTaskStore {
    /// Open a store in `dir`, creating the directory and clearing torn writes
    pub async fn open(dir: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::io(&dir, e))?;

        let store = Self {
            dir,
            write_lock: Mutex::new(()),
        };
        store.remove_temp_files().await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    async fn remove_temp_files(&self) -> PersistenceResult<()> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(TEMP_FILE_SUFFIX))
                .unwrap_or(false);
            if is_temp {
                debug!("Removing torn record write {}", path.display());
                let _ = fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    async fn read_record(&self, path: &Path) -> PersistenceResult<Option<PersistedTaskRecord>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    /// Write through a temp file and rename so readers never see half a record
    async fn write_record(&self, record: &PersistedTaskRecord) -> PersistenceResult<()> {
        let path = self.record_path(record.internal_id);
        let temp_path = path.with_extension(format!("{}{}", RECORD_EXTENSION, TEMP_FILE_SUFFIX));
        let json = serde_json::to_vec_pretty(record)?;

        fs::write(&temp_path, &json)
            .await
            .map_err(|e| PersistenceError::io(&temp_path, e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| PersistenceError::io(&path, e))?;
        Ok(())
    }

    async fn read_all(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PersistenceError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            // A corrupt record must not hide the others
            match self.read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable task record {}: {}", path.display(), e),
            }
        }

        sort_by_creation(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn save(&self, record: &PersistedTaskRecord) -> PersistenceResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_record(record).await
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> PersistenceResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(update.id);
        let mut record = self
            .read_record(&path)
            .await?
            .ok_or(PersistenceError::RecordNotFound { id: update.id })?;

        record.transmitted_bytes = update.transmitted_bytes;
        record.progress = update.progress;
        record.completed_parts = update.completed_parts.clone();
        record.last_updated = Utc::now();
        self.write_record(&record).await
    }

    async fn delete(&self, id: Uuid) -> PersistenceResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistenceError::io(path, e)),
        }
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> PersistenceResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.record_path(id);
        let mut record = self
            .read_record(&path)
            .await?
            .ok_or(PersistenceError::RecordNotFound { id })?;

        record.state = TransferState::Error;
        record.last_error = Some(message.to_string());
        record.last_updated = Utc::now();
        self.write_record(&record).await
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<PersistedTaskRecord>> {
        self.read_record(&self.record_path(id)).await
    }

    async fn list_pending(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        let records = self.read_all().await?;
        Ok(records.into_iter().filter(|r| r.is_resumable()).collect())
    }

    async fn list_all(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        self.read_all().await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize> {
        let stale: Vec<Uuid> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|record| record.last_updated < cutoff)
            .map(|record| record.internal_id)
            .collect();

        for id in &stale {
            self.delete(*id).await?;
        }
        Ok(stale.len())
    }
}

/// Records held in memory only
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<Uuid, PersistedTaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, record: &PersistedTaskRecord) -> PersistenceResult<()> {
        self.records
            .write()
            .await
            .insert(record.internal_id, record.clone());
        Ok(())
    }

    async fn update_progress(&self, update: &ProgressUpdate) -> PersistenceResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&update.id)
            .ok_or(PersistenceError::RecordNotFound { id: update.id })?;
        record.transmitted_bytes = update.transmitted_bytes;
        record.progress = update.progress;
        record.completed_parts = update.completed_parts.clone();
        record.last_updated = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> PersistenceResult<()> {
        self.records.write().await.remove(&id);
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, message: &str) -> PersistenceResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(PersistenceError::RecordNotFound { id })?;
        record.state = TransferState::Error;
        record.last_error = Some(message.to_string());
        record.last_updated = Utc::now();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> PersistenceResult<Option<PersistedTaskRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_pending(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        let mut records: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.is_resumable())
            .cloned()
            .collect();
        sort_by_creation(&mut records);
        Ok(records)
    }

    async fn list_all(&self) -> PersistenceResult<Vec<PersistedTaskRecord>> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        sort_by_creation(&mut records);
        Ok(records)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PersistenceResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.last_updated >= cutoff);
        Ok(before - records.len())
    }
}
