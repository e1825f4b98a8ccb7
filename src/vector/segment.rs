//! Immutable IVF index segment.
//!
//! A segment is built once from a snapshot of embedding records and never
//! mutated afterwards. The vector space is partitioned into `nlist` clusters
//! by k-means over a training sample; every record is assigned to its nearest
//! centroid and stored in that cluster's inverted list. A query ranks the
//! centroids and scans only the `nprobe` most promising lists.
//!
//! # Search guarantees
//! - Ties on score are broken by the smaller `VideoId`.
//! - When the first `nprobe` lists yield fewer than `k` admitted candidates,
//!   probing continues in centroid order until `k` are found or the segment
//!   is exhausted.
//! - A deadline is checked between lists. At least one list is always
//!   scanned; an expired deadline returns the best candidates so far.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::store::EmbeddingRecord;
use crate::vector::clustering::{KMeansParams, assign_all, kmeans_clustering};
use crate::vector::metric::Metric;
use crate::vector::quantization::{Quantization, Sq8Code};
use crate::vector::topk::{Candidate, TopK};
use crate::vector::types::{Score, VectorDimension, VectorError, VideoId};

/// Build and probe parameters for an IVF segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvfParams {
    /// Number of coarse clusters (upper bound; capped at the record count).
    pub nlist: usize,
    /// Number of clusters probed per query.
    pub nprobe: usize,
    /// Maximum number of vectors used to train the centroids.
    pub train_sample_size: usize,
    /// Iteration cap for k-means.
    pub kmeans_iterations: usize,
    /// Seed for training sample selection and k-means++.
    pub seed: u64,
    /// Inverted list encoding.
    pub quantization: Quantization,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 64,
            nprobe: 8,
            train_sample_size: 16_384,
            kmeans_iterations: 25,
            seed: 42,
            quantization: Quantization::None,
        }
    }
}

#[derive(Debug)]
enum ListStorage {
    /// Scored straight from the full-precision vectors in `entries`.
    Exact,
    Sq8(Vec<Sq8Code>),
}

#[derive(Debug)]
struct InvertedList {
    /// Positions into `IndexSegment::entries`.
    ordinals: Vec<u32>,
    storage: ListStorage,
}

impl InvertedList {
    fn len(&self) -> usize {
        self.ordinals.len()
    }
}

/// Result of probing a segment.
#[derive(Debug, Default)]
pub struct SegmentHits {
    /// Admitted candidates, best first.
    pub hits: Vec<Candidate>,
    /// The deadline expired before probing finished.
    pub partial: bool,
    /// Number of inverted lists scanned.
    pub lists_probed: usize,
    /// Number of vectors scored.
    pub scanned: usize,
}

/// An immutable, queryable IVF structure.
#[derive(Debug)]
pub struct IndexSegment {
    id: u64,
    dimension: VectorDimension,
    metric: Metric,
    quantization: Quantization,
    centroids: Vec<Vec<f32>>,
    lists: Vec<InvertedList>,
    entries: Vec<Arc<EmbeddingRecord>>,
    positions: HashMap<VideoId, u32>,
    built_at: DateTime<Utc>,
    build_duration: Duration,
    kmeans_iterations: usize,
}

impl IndexSegment {
    /// Builds a segment from a snapshot of records.
    ///
    /// Records must already be prepared for `metric` (normalized for cosine).
    /// Duplicate ids keep the highest version.
    pub fn build(
        id: u64,
        records: Vec<Arc<EmbeddingRecord>>,
        dimension: VectorDimension,
        metric: Metric,
        params: &IvfParams,
    ) -> Result<Self, VectorError> {
        let started = Instant::now();

        for record in &records {
            dimension.validate_vector(&record.vector)?;
        }

        let mut entries = records;
        entries.sort_by(|a, b| {
            a.video_id
                .cmp(&b.video_id)
                .then_with(|| b.version.cmp(&a.version))
        });
        entries.dedup_by(|later, earlier| later.video_id == earlier.video_id);

        if entries.len() > u32::MAX as usize {
            return Err(VectorError::ClusteringFailed(format!(
                "segment of {} records exceeds the addressable size",
                entries.len()
            )));
        }

        let positions: HashMap<VideoId, u32> = entries
            .iter()
            .enumerate()
            .map(|(i, r)| (r.video_id.clone(), i as u32))
            .collect();

        if entries.is_empty() {
            return Ok(Self {
                id,
                dimension,
                metric,
                quantization: params.quantization,
                centroids: Vec::new(),
                lists: Vec::new(),
                entries,
                positions,
                built_at: Utc::now(),
                build_duration: started.elapsed(),
                kmeans_iterations: 0,
            });
        }

        let vectors: Vec<&[f32]> = entries.iter().map(|r| r.vector.as_slice()).collect();
        let nlist = params.nlist.clamp(1, vectors.len());

        let training: Vec<&[f32]> = if vectors.len() > params.train_sample_size.max(nlist) {
            let mut rng = StdRng::seed_from_u64(params.seed);
            let mut picked =
                rand::seq::index::sample(&mut rng, vectors.len(), params.train_sample_size.max(nlist))
                    .into_vec();
            picked.sort_unstable();
            picked.into_iter().map(|i| vectors[i]).collect()
        } else {
            vectors.clone()
        };

        let clustering = kmeans_clustering(
            &training,
            KMeansParams {
                k: nlist,
                max_iterations: params.kmeans_iterations,
                seed: params.seed,
                metric,
            },
        )
        .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        let assignments = assign_all(&vectors, &clustering.centroids, metric);

        let mut ordinals: Vec<Vec<u32>> = vec![Vec::new(); nlist];
        for (ordinal, cluster) in assignments.iter().enumerate() {
            ordinals[cluster.index()].push(ordinal as u32);
        }

        let lists = ordinals
            .into_iter()
            .map(|ordinals| {
                let storage = match params.quantization {
                    Quantization::None => ListStorage::Exact,
                    Quantization::Sq8 => ListStorage::Sq8(
                        ordinals
                            .iter()
                            .map(|&o| Sq8Code::encode(&entries[o as usize].vector))
                            .collect(),
                    ),
                };
                InvertedList { ordinals, storage }
            })
            .collect();

        Ok(Self {
            id,
            dimension,
            metric,
            quantization: params.quantization,
            centroids: clustering.centroids,
            lists,
            entries,
            positions,
            built_at: Utc::now(),
            build_duration: started.elapsed(),
            kmeans_iterations: clustering.iterations,
        })
    }

    /// Returns the `k` best admitted records for `query`.
    ///
    /// `query` must already be prepared for the segment metric. `admit`
    /// decides per candidate whether it may enter the result set.
    pub fn search<F>(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
        deadline: Option<Instant>,
        admit: F,
    ) -> Result<SegmentHits, VectorError>
    where
        F: Fn(&EmbeddingRecord) -> bool,
    {
        self.dimension.validate_vector(query)?;

        if k == 0 || self.lists.is_empty() {
            return Ok(SegmentHits::default());
        }

        let order = self.rank_lists(query);
        let nprobe = nprobe.max(1);
        let mut top = TopK::new(k);
        let mut result = SegmentHits::default();

        for (probe, &list_idx) in order.iter().enumerate() {
            if probe >= nprobe && top.is_full() {
                break;
            }
            if probe > 0 && deadline.is_some_and(|d| Instant::now() >= d) {
                result.partial = true;
                break;
            }

            let list = &self.lists[list_idx];
            result.lists_probed += 1;
            result.scanned += self.scan_list(list, query, &admit, &mut top);
        }

        result.hits = top.into_sorted_vec();
        Ok(result)
    }

    /// Exhaustive search over every list; used as the recall reference.
    pub fn exact_search<F>(
        &self,
        query: &[f32],
        k: usize,
        admit: F,
    ) -> Result<Vec<Candidate>, VectorError>
    where
        F: Fn(&EmbeddingRecord) -> bool,
    {
        Ok(self
            .search(query, k, self.lists.len(), None, admit)?
            .hits)
    }

    /// Centroid positions sorted by decreasing score, ties by position.
    fn rank_lists(&self, query: &[f32]) -> Vec<usize> {
        let mut scored: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, self.metric.score(query, c)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.into_iter().map(|(i, _)| i).collect()
    }

    fn scan_list<F>(&self, list: &InvertedList, query: &[f32], admit: &F, top: &mut TopK) -> usize
    where
        F: Fn(&EmbeddingRecord) -> bool,
    {
        let mut scanned = 0;

        for (slot, &ordinal) in list.ordinals.iter().enumerate() {
            let record = &self.entries[ordinal as usize];
            if !admit(record) {
                continue;
            }
            let raw = match &list.storage {
                ListStorage::Exact => self.metric.score(query, &record.vector),
                ListStorage::Sq8(codes) => codes[slot].score(query, self.metric),
            };
            scanned += 1;
            if let Ok(score) = Score::new(raw) {
                top.push(Candidate::new(Arc::clone(record), score));
            }
        }

        scanned
    }

    /// Segment ordinal assigned by the index manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of records in the segment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Effective number of inverted lists.
    #[must_use]
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    /// Sizes of the inverted lists, in centroid order.
    #[must_use]
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(InvertedList::len).collect()
    }

    #[must_use]
    pub fn contains(&self, id: &VideoId) -> bool {
        self.positions.contains_key(id)
    }

    /// Record stored in this segment for `id`, if any.
    #[must_use]
    pub fn get(&self, id: &VideoId) -> Option<&Arc<EmbeddingRecord>> {
        self.positions
            .get(id)
            .map(|&ordinal| &self.entries[ordinal as usize])
    }

    /// All records, ordered by video id.
    pub fn records(&self) -> impl Iterator<Item = &Arc<EmbeddingRecord>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn quantization(&self) -> Quantization {
        self.quantization
    }

    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[must_use]
    pub fn build_duration(&self) -> Duration {
        self.build_duration
    }

    #[must_use]
    pub fn kmeans_iterations(&self) -> usize {
        self.kmeans_iterations
    }

    /// Approximate bytes owned by the segment.
    ///
    /// Records are shared with the store through `Arc`, so their vectors and
    /// metadata are not counted; only the entry table and id index are.
    #[must_use]
    pub fn memory_bytes(&self) -> usize {
        let centroids = self.centroids.len() * self.dimension.get() * std::mem::size_of::<f32>();
        let lists: usize = self
            .lists
            .iter()
            .map(|list| {
                let codes = match &list.storage {
                    ListStorage::Exact => 0,
                    ListStorage::Sq8(codes) => codes.iter().map(Sq8Code::memory_bytes).sum(),
                };
                codes + list.ordinals.len() * std::mem::size_of::<u32>()
            })
            .sum();
        let entries = self.entries.len() * std::mem::size_of::<Arc<EmbeddingRecord>>();
        let positions = self.positions.len()
            * (std::mem::size_of::<VideoId>() + std::mem::size_of::<u32>());
        centroids + lists + entries + positions
    }
}
