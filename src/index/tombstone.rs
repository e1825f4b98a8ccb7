//! Ids deleted since the last rebuild.

use std::collections::HashMap;

use crate::vector::VideoId;

/// Immutable set of deleted ids, each tagged with the sequence of its deletion.
#[derive(Debug, Clone, Default)]
pub struct TombstoneSet {
    deleted: HashMap<VideoId, u64>,
}

impl TombstoneSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tombstone(&self, id: VideoId, sequence: u64) -> Self {
        let mut deleted = self.deleted.clone();
        let entry = deleted.entry(id).or_insert(sequence);
        *entry = (*entry).max(sequence);
        Self { deleted }
    }

    #[must_use]
    pub fn without(&self, id: &VideoId) -> Self {
        let mut deleted = self.deleted.clone();
        deleted.remove(id);
        Self { deleted }
    }

    /// Tombstones recorded after `sequence`.
    #[must_use]
    pub fn retain_after(&self, sequence: u64) -> Self {
        Self {
            deleted: self
                .deleted
                .iter()
                .filter(|(_, seq)| **seq > sequence)
                .map(|(id, seq)| (id.clone(), *seq))
                .collect(),
        }
    }

    #[must_use]
    pub fn contains(&self, id: &VideoId) -> bool {
        self.deleted.contains_key(id)
    }

    /// Sequence number of the deletion of `id`.
    #[must_use]
    pub fn sequence_of(&self, id: &VideoId) -> Option<u64> {
        self.deleted.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deleted.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
    }
}
