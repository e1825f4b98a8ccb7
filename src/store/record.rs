//! The unit of storage: one embedding per video.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vector::VideoId;

/// Opaque key/value metadata attached to a video (title, channel, thumbnail path, ...).
pub type Metadata = BTreeMap<String, String>;

/// An embedding vector together with its video id, metadata and version.
///
/// Versions come from a store-wide sequence, so a re-upsert of the same id
/// always carries a larger version than the record it supersedes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub video_id: VideoId,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub version: u64,
}

impl EmbeddingRecord {
    /// Looks up a metadata value.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
