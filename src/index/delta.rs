//! Exact-search buffer for records written since the last rebuild.
//!
//! A published `DeltaBuffer` is never mutated: writers derive a new buffer
//! with `with_record` / `without` and publish it through a new view.

use std::collections::HashMap;
use std::sync::Arc;

use crate::store::EmbeddingRecord;
use crate::vector::{Candidate, Metric, Score, TopK, VideoId};

#[derive(Debug, Clone, Default)]
pub struct DeltaBuffer {
    entries: HashMap<VideoId, Arc<EmbeddingRecord>>,
}

impl DeltaBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of this buffer with `record` inserted (replacing any older entry).
    #[must_use]
    pub fn with_record(&self, record: Arc<EmbeddingRecord>) -> Self {
        let mut entries = self.entries.clone();
        entries.insert(record.video_id.clone(), record);
        Self { entries }
    }

    /// Copy of this buffer without `id`.
    #[must_use]
    pub fn without(&self, id: &VideoId) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(id);
        Self { entries }
    }

    /// Entries written after `sequence`; everything at or before it is in the new segment.
    #[must_use]
    pub fn retain_after(&self, sequence: u64) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(_, record)| record.version > sequence)
                .map(|(id, record)| (id.clone(), Arc::clone(record)))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, id: &VideoId) -> Option<&Arc<EmbeddingRecord>> {
        self.entries.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &VideoId) -> bool {
        self.entries.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<EmbeddingRecord>> {
        self.entries.values()
    }

    /// Brute-force top-k over every admitted entry.
    pub fn search<F>(&self, query: &[f32], k: usize, metric: Metric, admit: F) -> Vec<Candidate>
    where
        F: Fn(&EmbeddingRecord) -> bool,
    {
        let mut top = TopK::new(k);
        for record in self.entries.values() {
            if !admit(record) {
                continue;
            }
            if let Ok(score) = Score::new(metric.score(query, &record.vector)) {
                top.push(Candidate::new(Arc::clone(record), score));
            }
        }
        top.into_sorted_vec()
    }
}
