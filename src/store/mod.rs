//! Durable mapping from video id to embedding record.
//!
//! The store is the source of truth for index rebuilds. Records live in a
//! concurrent map for reads; every mutation is first appended to the record
//! log (when the store is file backed) and only then published in memory.
//! Versions come from one store-wide sequence shared by puts and removes.

mod log;
mod record;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::vector::{Metric, VectorDimension, VectorError, VideoId, validate_finite};

pub use log::{LOG_FILE_NAME, LogEntry, RecordLog, Replay};
pub use record::{EmbeddingRecord, Metadata};

/// Errors raised by the vector store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}\nSuggestion: Check disk space and permissions of the index directory")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record log at {path}: {reason}\nSuggestion: Restore from backup or remove the log and re-import")]
    Corrupt { path: PathBuf, reason: String },

    #[error(
        "Store {field} mismatch: log holds {stored}, configuration requests {requested}\nSuggestion: Use the original settings or point index_path at a new directory"
    )]
    StoreMismatch {
        field: &'static str,
        stored: String,
        requested: String,
    },

    #[error(
        "Record log {path} refuses writes after a failed append: {reason}\nSuggestion: Restart the service so the log is replayed and repaired"
    )]
    LogPoisoned { path: PathBuf, reason: String },

    #[error("Failed to encode or decode a log frame: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Vector(#[from] VectorError),
}

/// Concurrent, optionally persistent record store.
#[derive(Debug)]
pub struct VectorStore {
    records: DashMap<VideoId, Arc<EmbeddingRecord>>,
    /// Serializes writers; holds the log for file-backed stores.
    writer: Mutex<Option<RecordLog>>,
    /// Last sequence number whose write is visible in `records`.
    sequence: AtomicU64,
    dimension: VectorDimension,
    metric: Metric,
}

impl VectorStore {
    /// Creates a store that lives only in memory.
    #[must_use]
    pub fn in_memory(dimension: VectorDimension, metric: Metric) -> Self {
        Self {
            records: DashMap::new(),
            writer: Mutex::new(None),
            sequence: AtomicU64::new(0),
            dimension,
            metric,
        }
    }

    /// Opens the store persisted under `dir`, replaying its log.
    pub fn open(
        dir: impl AsRef<Path>,
        dimension: VectorDimension,
        metric: Metric,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        if u32::try_from(dimension.get()).is_err() {
            return Err(VectorError::InvalidDimension {
                dimension: dimension.get(),
                reason: "Vector dimension does not fit the log header",
            }
            .into());
        }
        std::fs::create_dir_all(dir)?;

        let (log, replay) = RecordLog::open(dir.join(LOG_FILE_NAME), dimension, metric)?;

        let records = DashMap::new();
        let mut sequence = 0;
        for entry in replay.entries {
            sequence = sequence.max(entry.sequence());
            match entry {
                LogEntry::Put(record) => {
                    if record.vector.len() != dimension.get() {
                        return Err(StoreError::Corrupt {
                            path: log.path().to_path_buf(),
                            reason: format!(
                                "record '{}' has {} components",
                                record.video_id,
                                record.vector.len()
                            ),
                        });
                    }
                    records.insert(record.video_id.clone(), Arc::new(record));
                }
                LogEntry::Remove { video_id, .. } => {
                    records.remove(&video_id);
                }
                LogEntry::Checkpoint { .. } => {}
            }
        }

        tracing::info!(
            "opened vector store at {} ({} records, sequence {sequence})",
            dir.display(),
            records.len()
        );

        Ok(Self {
            records,
            writer: Mutex::new(Some(log)),
            sequence: AtomicU64::new(sequence),
            dimension,
            metric,
        })
    }

    /// Stores a new version of `video_id`.
    ///
    /// The vector is validated and, for cosine, normalized before it is
    /// written; zero vectors are rejected under cosine. Nothing is written
    /// when validation fails. Returns the stored
    /// record; its `version` is the new version number.
    pub fn put(
        &self,
        video_id: VideoId,
        mut vector: Vec<f32>,
        metadata: Metadata,
    ) -> Result<Arc<EmbeddingRecord>, StoreError> {
        self.dimension.validate_vector(&vector)?;
        validate_finite(&vector)?;
        self.metric.prepare(&mut vector)?;

        let mut writer = self.writer.lock();
        let version = self.sequence.load(Ordering::Acquire) + 1;
        let record = EmbeddingRecord {
            video_id,
            vector,
            metadata,
            version,
        };

        if let Some(log) = writer.as_mut() {
            log.append(&LogEntry::Put(record.clone()))?;
        }

        let record = Arc::new(record);
        self.records
            .insert(record.video_id.clone(), Arc::clone(&record));
        self.sequence.store(version, Ordering::Release);
        Ok(record)
    }

    #[must_use]
    pub fn get(&self, video_id: &VideoId) -> Option<Arc<EmbeddingRecord>> {
        self.records.get(video_id).map(|r| Arc::clone(r.value()))
    }

    #[must_use]
    pub fn contains(&self, video_id: &VideoId) -> bool {
        self.records.contains_key(video_id)
    }

    /// Removes `video_id`.
    ///
    /// Returns the sequence number assigned to the removal, or `None` when the
    /// id was not stored.
    pub fn remove(&self, video_id: &VideoId) -> Result<Option<u64>, StoreError> {
        let mut writer = self.writer.lock();
        if !self.records.contains_key(video_id) {
            return Ok(None);
        }

        let sequence = self.sequence.load(Ordering::Acquire) + 1;
        if let Some(log) = writer.as_mut() {
            log.append(&LogEntry::Remove {
                video_id: video_id.clone(),
                sequence,
            })?;
        }

        self.records.remove(video_id);
        self.sequence.store(sequence, Ordering::Release);
        Ok(Some(sequence))
    }

    /// Copies out every record.
    ///
    /// Each record is read atomically, but writes that race with the scan may
    /// or may not be included.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<EmbeddingRecord>> {
        self.records.iter().map(|r| Arc::clone(r.value())).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Sequence number of the most recent visible write.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Path of the backing log, if any.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.writer.lock().as_ref().map(|log| log.path().to_path_buf())
    }

    /// Size of the backing log in bytes (0 for in-memory stores).
    pub fn log_size_bytes(&self) -> Result<u64, StoreError> {
        match self.writer.lock().as_ref() {
            Some(log) => log.size_bytes(),
            None => Ok(0),
        }
    }

    /// Rewrites the log so it holds only live records.
    ///
    /// Returns the number of bytes reclaimed. No-op for in-memory stores.
    pub fn compact(&self) -> Result<u64, StoreError> {
        let mut writer = self.writer.lock();
        let Some(log) = writer.as_mut() else {
            return Ok(0);
        };

        let before = log.size_bytes()?;
        let mut live = self.snapshot();
        live.sort_by(|a, b| a.version.cmp(&b.version));
        log.rewrite(live.iter().map(AsRef::as_ref), self.last_sequence())?;
        let after = log.size_bytes()?;

        tracing::debug!(
            "compacted {} ({before} -> {after} bytes, {} records)",
            log.path().display(),
            live.len()
        );
        Ok(before.saturating_sub(after))
    }
}
