//! Bounded top-k selection.
//!
//! A min-heap of size k keeps the best candidates seen so far. "Best" means
//! higher score; equal scores prefer the smaller `VideoId` so results are
//! deterministic across runs and across the delta/segment merge.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::store::EmbeddingRecord;
use crate::vector::types::{Score, VideoId};

/// A scored record produced by a scan.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: Arc<EmbeddingRecord>,
    pub score: Score,
}

impl Candidate {
    #[must_use]
    pub fn new(record: Arc<EmbeddingRecord>, score: Score) -> Self {
        Self { record, score }
    }

    #[must_use]
    pub fn video_id(&self) -> &VideoId {
        &self.record.video_id
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// `Greater` means ranked higher.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .cmp(&other.score)
            .then_with(|| other.video_id().cmp(self.video_id()))
    }
}

/// Keeps the `k` highest ranked candidates.
#[derive(Debug)]
pub struct TopK {
    k: usize,
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl TopK {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    /// Offers a candidate; returns `true` when it was kept.
    pub fn push(&mut self, candidate: Candidate) -> bool {
        if self.k == 0 {
            return false;
        }
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return true;
        }
        let replace = match self.heap.peek() {
            Some(Reverse(worst)) => candidate > *worst,
            None => true,
        };
        if replace {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
        replace
    }

    /// Number of candidates currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether k candidates have been collected.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Consumes the heap, returning candidates best first.
    #[must_use]
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        // Ascending order of Reverse(c) is descending order of c
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(c)| c)
            .collect()
    }
}
