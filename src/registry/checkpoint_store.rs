//! Checkpoint storage collaborators
//!
//! The registry decides when to persist; a [`CheckpointStore`] only knows
//! how. `FileCheckpointStore` writes one JSON file per batch,
//! `MemoryCheckpointStore` keeps them in a map.
//!
//! Besides periodic checkpoints a store keeps a batch record: the state a
//! batch started from, written once when the batch is created. It makes
//! every advertised batch id resumable even before its first checkpoint.

use crate::error::{AppResult, StorageError};
use crate::models::batch::{BatchId, Checkpoint};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>>;

    async fn save_checkpoint(&self, batch_id: &BatchId, snapshot: &Checkpoint) -> AppResult<()>;

    async fn load_batch_record(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>>;

    async fn save_batch_record(&self, batch_id: &BatchId, record: &Checkpoint) -> AppResult<()>;
}

/// `<dir>/<batch_id>.json`, batch records in `<dir>/<batch_id>.batch.json`
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, batch_id: &BatchId) -> PathBuf {
        self.dir.join(format!("{}.json", safe_name(batch_id)))
    }

    fn record_path_for(&self, batch_id: &BatchId) -> PathBuf {
        self.dir.join(format!("{}.batch.json", safe_name(batch_id)))
    }

    async fn read(&self, path: PathBuf) -> AppResult<Option<Checkpoint>> {
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StorageError::ReadFailed {
                    path: path.display().to_string(),
                    source,
                }
                .into())
            }
        };
        let checkpoint = serde_json::from_str(&content).map_err(|source| StorageError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Some(checkpoint))
    }

    async fn write(&self, path: PathBuf, snapshot: &Checkpoint) -> AppResult<()> {
        let write_failed = |path: &PathBuf, source| StorageError::WriteFailed {
            path: path.display().to_string(),
            source,
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_failed(&self.dir, e))?;

        let tmp = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;

        // write-then-rename so a crash never leaves half a checkpoint
        fs::write(&tmp, json).await.map_err(|e| write_failed(&tmp, e))?;
        fs::rename(&tmp, &path).await.map_err(|e| write_failed(&path, e))?;
        Ok(())
    }
}

fn safe_name(batch_id: &BatchId) -> String {
    batch_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load_checkpoint(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>> {
        self.read(self.path_for(batch_id)).await
    }

    async fn save_checkpoint(&self, batch_id: &BatchId, snapshot: &Checkpoint) -> AppResult<()> {
        self.write(self.path_for(batch_id), snapshot).await?;
        debug!(
            "checkpoint {} saved: {} completed",
            batch_id,
            snapshot.completed_visit_ids.len()
        );
        Ok(())
    }

    async fn load_batch_record(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>> {
        self.read(self.record_path_for(batch_id)).await
    }

    async fn save_batch_record(&self, batch_id: &BatchId, record: &Checkpoint) -> AppResult<()> {
        self.write(self.record_path_for(batch_id), record).await?;
        debug!(
            "batch record {} saved: {} carried over",
            batch_id,
            record.completed_visit_ids.len()
        );
        Ok(())
    }
}

/// In-process store. Counts checkpoint saves so callers can check the
/// cadence; batch records are kept apart and not counted.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<BatchId, Checkpoint>>,
    records: Mutex<HashMap<BatchId, Checkpoint>>,
    saves: AtomicUsize,
    history: Mutex<Vec<Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Every snapshot saved, in order
    pub async fn history(&self) -> Vec<Checkpoint> {
        self.history.lock().await.clone()
    }

    /// Seed a checkpoint as if an earlier run had saved it
    pub async fn insert(&self, checkpoint: Checkpoint) {
        self.checkpoints
            .lock()
            .await
            .insert(checkpoint.batch_id.clone(), checkpoint);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load_checkpoint(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>> {
        Ok(self.checkpoints.lock().await.get(batch_id).cloned())
    }

    async fn save_checkpoint(&self, batch_id: &BatchId, snapshot: &Checkpoint) -> AppResult<()> {
        self.checkpoints
            .lock()
            .await
            .insert(batch_id.clone(), snapshot.clone());
        self.history.lock().await.push(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_batch_record(&self, batch_id: &BatchId) -> AppResult<Option<Checkpoint>> {
        Ok(self.records.lock().await.get(batch_id).cloned())
    }

    async fn save_batch_record(&self, batch_id: &BatchId, record: &Checkpoint) -> AppResult<()> {
        self.records
            .lock()
            .await
            .insert(batch_id.clone(), record.clone());
        Ok(())
    }
}
