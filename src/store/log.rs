//! Append-only record log backing the vector store.
//!
//! # File Format
//!
//! ```text
//! Header (16 bytes): [magic "VSLG"] [format version u32] [dimension u32] [metric tag u32]
//! Frame:             [payload len u32] [checksum 4B] [json payload: len bytes]
//! ```
//!
//! All integers are little-endian. The checksum is the first four bytes of
//! the SHA-256 digest of the payload. Every frame is written with a single
//! `write_all` followed by `sync_data`, so a crash can leave at most one torn
//! frame at the tail; replay stops there and the file is truncated back to the
//! last complete frame.
//!
//! A write or sync that fails while the process keeps running is rolled back
//! by truncating the file to its length before the append. If the rollback
//! itself fails, the log is poisoned and refuses further appends.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::StoreError;
use crate::store::record::EmbeddingRecord;
use crate::vector::{Metric, VectorDimension, VideoId};

/// Current log format version.
const LOG_VERSION: u32 = 1;

/// Size of the log header in bytes.
pub(crate) const HEADER_SIZE: usize = 16;

/// Magic bytes identifying a vector log.
const MAGIC_BYTES: &[u8; 4] = b"VSLG";

/// Frame prefix: payload length plus checksum.
const FRAME_PREFIX_SIZE: usize = 8;

/// File name of the log inside the index directory.
pub const LOG_FILE_NAME: &str = "vectors.log";

/// One durable mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LogEntry {
    Put(EmbeddingRecord),
    Remove { video_id: VideoId, sequence: u64 },
    /// Carries the store sequence across compaction.
    Checkpoint { sequence: u64 },
}

impl LogEntry {
    /// Sequence number carried by the entry.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            LogEntry::Put(record) => record.version,
            LogEntry::Remove { sequence, .. } | LogEntry::Checkpoint { sequence } => *sequence,
        }
    }
}

/// Result of replaying an existing log.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: Vec<LogEntry>,
    /// Bytes dropped from a torn or corrupt tail.
    pub truncated_bytes: u64,
}

/// Writer half of the on-disk log.
#[derive(Debug)]
pub struct RecordLog {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last acknowledged frame.
    len: u64,
    /// Set when a failed append could not be rolled back.
    poisoned: Option<String>,
    dimension: VectorDimension,
    metric: Metric,
    #[cfg(test)]
    fail_next_write: Option<usize>,
    #[cfg(test)]
    fail_rollback: bool,
}

impl RecordLog {
    /// Opens (or creates) the log at `path` and replays its frames.
    ///
    /// Fails with `StoreMismatch` when the file was written for a different
    /// dimension or metric.
    pub fn open(
        path: impl AsRef<Path>,
        dimension: VectorDimension,
        metric: Metric,
    ) -> Result<(Self, Replay), StoreError> {
        let path = path.as_ref().to_path_buf();

        let existing_len = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        if existing_len == 0 {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?;
            file.write_all(&encode_header(dimension, metric))?;
            file.sync_all()?;
            tracing::debug!("created record log at {}", path.display());

            let file = OpenOptions::new().append(true).open(&path)?;
            return Ok((
                Self::with_file(path, file, HEADER_SIZE as u64, dimension, metric),
                Replay::default(),
            ));
        }

        let (entries, valid_len) = {
            let file = File::open(&path)?;
            // SAFETY: the log is only appended to by this process while open,
            // and the map is dropped before the file is truncated below.
            let mmap = unsafe { Mmap::map(&file)? };
            check_header(&path, &mmap, dimension, metric)?;
            replay_frames(&mmap)
        };

        let truncated_bytes = existing_len - valid_len as u64;
        if truncated_bytes > 0 {
            tracing::warn!(
                "discarding {truncated_bytes} trailing bytes of {} (torn or corrupt frame)",
                path.display()
            );
            let file = OpenOptions::new().write(true).open(&path)?;
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((
            Self::with_file(path, file, valid_len as u64, dimension, metric),
            Replay {
                entries,
                truncated_bytes,
            },
        ))
    }

    fn with_file(
        path: PathBuf,
        file: File,
        len: u64,
        dimension: VectorDimension,
        metric: Metric,
    ) -> Self {
        Self {
            path,
            file,
            len,
            poisoned: None,
            dimension,
            metric,
            #[cfg(test)]
            fail_next_write: None,
            #[cfg(test)]
            fail_rollback: false,
        }
    }

    /// Appends one entry and syncs it to disk.
    ///
    /// On error nothing of the entry remains in the file.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), StoreError> {
        if let Some(reason) = &self.poisoned {
            return Err(StoreError::LogPoisoned {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }

        let frame = encode_frame(entry)?;
        if let Err(error) = self.write_frame(&frame) {
            if let Err(rollback) = self.rollback() {
                let reason = format!("{error}; rollback failed: {rollback}");
                tracing::error!(
                    "record log {} poisoned after a failed append: {reason}",
                    self.path.display()
                );
                self.poisoned = Some(reason);
            } else {
                tracing::warn!(
                    "append to {} failed and was rolled back: {error}",
                    self.path.display()
                );
            }
            return Err(error.into());
        }

        self.len += frame.len() as u64;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        {
            if let Some(written) = self.fail_next_write.take() {
                self.file.write_all(&frame[..written.min(frame.len())])?;
                return Err(io::Error::other("injected write failure"));
            }
        }

        self.file.write_all(frame)?;
        self.file.sync_data()
    }

    /// Truncates the file back to the last acknowledged frame.
    fn rollback(&mut self) -> io::Result<()> {
        #[cfg(test)]
        {
            if self.fail_rollback {
                return Err(io::Error::other("injected rollback failure"));
            }
        }

        self.file.set_len(self.len)?;
        self.file.sync_data()
    }

    /// Whether a failed append left the log unusable.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Makes the next append write only `written` bytes of its frame and fail.
    #[cfg(test)]
    pub(crate) fn fail_next_write(&mut self, written: usize, rollback_fails: bool) {
        self.fail_next_write = Some(written);
        self.fail_rollback = rollback_fails;
    }

    /// Replaces the log with one `Put` frame per live record.
    ///
    /// The new log is written to a temporary file in the same directory and
    /// renamed over the old one, so a crash leaves either log intact.
    pub fn rewrite<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a EmbeddingRecord>,
        sequence: u64,
    ) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        {
            let mut writer = io::BufWriter::new(temp.as_file_mut());
            writer.write_all(&encode_header(self.dimension, self.metric))?;
            for record in records {
                writer.write_all(&encode_frame(&LogEntry::Put(record.clone()))?)?;
            }
            writer.write_all(&encode_frame(&LogEntry::Checkpoint { sequence })?)?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.len = self.file.metadata()?.len();
        self.poisoned = None;
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> Result<u64, StoreError> {
        Ok(self.file.metadata()?.len())
    }
}

fn encode_header(dimension: VectorDimension, metric: Metric) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(MAGIC_BYTES);
    header[4..8].copy_from_slice(&LOG_VERSION.to_le_bytes());
    // Dimensions beyond u32 are rejected by the store before a log exists
    #[allow(clippy::cast_possible_truncation)]
    header[8..12].copy_from_slice(&(dimension.get() as u32).to_le_bytes());
    header[12..16].copy_from_slice(&metric.tag().to_le_bytes());
    header
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn check_header(
    path: &Path,
    bytes: &[u8],
    dimension: VectorDimension,
    metric: Metric,
) -> Result<(), StoreError> {
    if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC_BYTES {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "missing VSLG header".to_string(),
        });
    }

    let version = read_u32(bytes, 4);
    if version != LOG_VERSION {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unsupported log version {version} (expected {LOG_VERSION})"),
        });
    }

    let stored_dimension = read_u32(bytes, 8) as usize;
    if stored_dimension != dimension.get() {
        return Err(StoreError::StoreMismatch {
            field: "dimension",
            stored: stored_dimension.to_string(),
            requested: dimension.get().to_string(),
        });
    }

    let tag = read_u32(bytes, 12);
    match Metric::from_tag(tag) {
        Some(stored) if stored == metric => Ok(()),
        Some(stored) => Err(StoreError::StoreMismatch {
            field: "metric",
            stored: stored.to_string(),
            requested: metric.to_string(),
        }),
        None => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!("unknown metric tag {tag}"),
        }),
    }
}

fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

fn encode_frame(entry: &LogEntry) -> Result<Vec<u8>, StoreError> {
    let payload = serde_json::to_vec(entry)?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "log frame exceeds 4 GiB",
        ))
    })?;

    let mut frame = Vec::with_capacity(FRAME_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&checksum(&payload));
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decodes frames after the header, stopping at the first incomplete or
/// corrupt one. Returns the entries and the length of the valid prefix.
fn replay_frames(bytes: &[u8]) -> (Vec<LogEntry>, usize) {
    let mut entries = Vec::new();
    let mut pos = HEADER_SIZE;

    while pos + FRAME_PREFIX_SIZE <= bytes.len() {
        let len = read_u32(bytes, pos) as usize;
        let start = pos + FRAME_PREFIX_SIZE;
        let Some(end) = start.checked_add(len).filter(|&end| end <= bytes.len()) else {
            break;
        };

        let payload = &bytes[start..end];
        if checksum(payload) != bytes[pos + 4..pos + 8] {
            break;
        }
        match serde_json::from_slice::<LogEntry>(payload) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("undecodable log frame at offset {pos}: {e}");
                break;
            }
        }
        pos = end;
    }

    (entries, pos)
}
