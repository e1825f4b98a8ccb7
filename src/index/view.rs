//! The unit of publication: one segment, one delta, one tombstone set.
//!
//! Every query loads exactly one `IndexView`, so it observes the corpus at a
//! single point in time no matter what writers or rebuilds do meanwhile.

use std::sync::Arc;

use crate::index::delta::DeltaBuffer;
use crate::index::tombstone::TombstoneSet;
use crate::store::EmbeddingRecord;
use crate::vector::{IndexSegment, VideoId};

#[derive(Debug, Clone, Default)]
pub struct IndexView {
    pub segment: Option<Arc<IndexSegment>>,
    pub delta: Arc<DeltaBuffer>,
    pub tombstones: Arc<TombstoneSet>,
    /// Incremented on every publish.
    pub generation: u64,
    /// Store sequence the segment was built through; 0 before the first build.
    pub built_through: u64,
}

impl IndexView {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether there is anything to search.
    #[must_use]
    pub fn is_searchable(&self) -> bool {
        !self.delta.is_empty() || self.segment.as_ref().is_some_and(|s| !s.is_empty())
    }

    #[must_use]
    pub fn segment_len(&self) -> usize {
        self.segment.as_ref().map_or(0, |s| s.len())
    }

    /// A segment hit is live unless it was deleted or superseded by a delta entry.
    #[must_use]
    pub fn segment_entry_is_live(&self, record: &EmbeddingRecord) -> bool {
        !self.tombstones.contains(&record.video_id) && !self.delta.contains(&record.video_id)
    }

    /// The record a query would see for `id`.
    #[must_use]
    pub fn lookup(&self, id: &VideoId) -> Option<&Arc<EmbeddingRecord>> {
        if let Some(record) = self.delta.get(id) {
            return Some(record);
        }
        if self.tombstones.contains(id) {
            return None;
        }
        self.segment.as_ref().and_then(|s| s.get(id))
    }

    /// Number of ids a query can return.
    #[must_use]
    pub fn live_count(&self) -> usize {
        let segment_live = self.segment.as_ref().map_or(0, |segment| {
            segment
                .records()
                .filter(|r| self.segment_entry_is_live(r))
                .count()
        });
        segment_live + self.delta.len()
    }

    /// Newest version this view knows for `id`, counting deletions.
    #[must_use]
    pub fn latest_sequence(&self, id: &VideoId) -> Option<u64> {
        [
            self.delta.get(id).map(|r| r.version),
            self.tombstones.sequence_of(id),
            self.segment.as_ref().and_then(|s| s.get(id)).map(|r| r.version),
        ]
        .into_iter()
        .flatten()
        .max()
    }

    /// Copy of this view with new delta and tombstones and the next generation.
    #[must_use]
    pub fn derive(&self, delta: Arc<DeltaBuffer>, tombstones: Arc<TombstoneSet>) -> Self {
        Self {
            segment: self.segment.clone(),
            delta,
            tombstones,
            generation: self.generation + 1,
            built_through: self.built_through,
        }
    }

    /// Whether `record` is older than the segment it would be layered on.
    ///
    /// Every write at or below `built_through` was visible to the rebuild
    /// snapshot, so such a record is current only if the segment holds that
    /// exact version. Anything else was superseded or removed in the store.
    #[must_use]
    pub fn predates_segment(&self, record: &EmbeddingRecord) -> bool {
        if record.version > self.built_through {
            return false;
        }
        self.segment
            .as_ref()
            .and_then(|s| s.get(&record.video_id))
            .is_none_or(|indexed| indexed.version != record.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Metadata;
    use crate::vector::{IvfParams, Metric, VectorDimension};

    fn record(id: &str, vector: Vec<f32>, version: u64) -> Arc<EmbeddingRecord> {
        Arc::new(EmbeddingRecord {
            video_id: VideoId::new(id).unwrap(),
            vector,
            metadata: Metadata::new(),
            version,
        })
    }

    fn view_with_segment() -> IndexView {
        let segment = IndexSegment::build(
            1,
            vec![record("a", vec![1.0, 0.0], 1), record("b", vec![0.0, 1.0], 2)],
            VectorDimension::new(2).unwrap(),
            Metric::Cosine,
            &IvfParams::default(),
        )
        .unwrap();
        IndexView {
            segment: Some(Arc::new(segment)),
            ..IndexView::default()
        }
    }

    #[test]
    fn test_empty_view_is_not_searchable() {
        assert!(!IndexView::empty().is_searchable());
        let view = IndexView::empty().derive(
            Arc::new(DeltaBuffer::new().with_record(record("x", vec![1.0, 0.0], 1))),
            Arc::default(),
        );
        assert!(view.is_searchable());
        assert_eq!(view.generation, 1);
    }

    #[test]
    fn test_tombstones_and_shadowing() {
        let base = view_with_segment();
        let a = VideoId::new("a").unwrap();
        let b = VideoId::new("b").unwrap();

        let deleted = base.derive(
            Arc::default(),
            Arc::new(TombstoneSet::new().with_tombstone(a.clone(), 3)),
        );
        assert!(deleted.lookup(&a).is_none());
        assert_eq!(deleted.live_count(), 1);
        assert_eq!(deleted.latest_sequence(&a), Some(3));

        let shadowed = base.derive(
            Arc::new(DeltaBuffer::new().with_record(record("b", vec![1.0, 0.0], 4))),
            Arc::default(),
        );
        let segment_b = shadowed.segment.as_ref().unwrap().get(&b).unwrap();
        assert!(!shadowed.segment_entry_is_live(segment_b));
        assert_eq!(shadowed.lookup(&b).unwrap().version, 4);
        assert_eq!(shadowed.live_count(), 2);
    }

    #[test]
    fn test_predates_segment() {
        let view = IndexView {
            built_through: 5,
            ..view_with_segment()
        };

        // Indexed at exactly this version
        assert!(!view.predates_segment(&record("a", vec![1.0, 0.0], 1)));
        // Removed or superseded before the build
        assert!(view.predates_segment(&record("a", vec![1.0, 0.0], 4)));
        assert!(view.predates_segment(&record("z", vec![1.0, 0.0], 3)));
        // Written after the build
        assert!(!view.predates_segment(&record("z", vec![1.0, 0.0], 6)));
        assert!(!IndexView::empty().predates_segment(&record("z", vec![1.0, 0.0], 1)));
    }
}
