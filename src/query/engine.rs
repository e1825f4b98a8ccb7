//! Query execution against one published index view.
//!
//! A search scans the delta buffer exactly and the segment approximately,
//! excludes deleted and superseded segment entries, applies metadata filters
//! while scanning, optionally re-ranks quantized candidates with exact
//! scores, and merges everything into one ranked list.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::QueryConfig;
use crate::error::{SearchError, SearchResult};
use crate::index::IndexView;
use crate::query::filter::Filter;
use crate::store::{EmbeddingRecord, Metadata};
use crate::vector::{
    Candidate, Metric, Quantization, Score, TopK, VectorDimension, VideoId, validate_finite,
};

/// A top-k similarity query.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub k: usize,
    pub filter: Filter,
    /// Time budget; the configured default applies when `None`.
    pub deadline: Option<Duration>,
    /// Lists to probe; the index default applies when `None`.
    pub nprobe: Option<usize>,
    /// Overrides the configured score floor.
    pub min_score: Option<f32>,
}

impl SearchRequest {
    #[must_use]
    pub fn new(vector: Vec<f32>, k: usize) -> Self {
        Self {
            vector,
            k,
            filter: Filter::All,
            deadline: None,
            nprobe: None,
            min_score: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Equality filters in the map form used by the HTTP layer.
    #[must_use]
    pub fn with_filter_pairs(mut self, pairs: &HashMap<String, String>) -> Self {
        self.filter = Filter::from(pairs);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_deadline_millis(self, millis: u64) -> Self {
        self.with_deadline(Duration::from_millis(millis))
    }

    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    #[must_use]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub video_id: VideoId,
    pub score: f32,
    pub metadata: Metadata,
    pub version: u64,
}

/// Ranked results plus execution details.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    /// The deadline expired before every needed list was probed.
    pub partial: bool,
    pub segment_candidates: usize,
    pub delta_candidates: usize,
    pub lists_probed: usize,
    /// Generation of the view that answered the query.
    pub generation: u64,
    pub elapsed_ms: f64,
}

impl SearchResponse {
    /// Result ids in rank order.
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.video_id.as_str()).collect()
    }
}

/// Stateless query executor.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    config: QueryConfig,
    dimension: VectorDimension,
    metric: Metric,
    default_nprobe: usize,
}

impl QueryEngine {
    #[must_use]
    pub fn new(
        config: QueryConfig,
        dimension: VectorDimension,
        metric: Metric,
        default_nprobe: usize,
    ) -> Self {
        Self {
            config,
            dimension,
            metric,
            default_nprobe,
        }
    }

    #[must_use]
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Answers `request` against `view`.
    ///
    /// Returns fewer than `k` hits when fewer records match. An expired
    /// deadline is not an error; the response is flagged `partial`.
    pub fn search(&self, view: &IndexView, request: &SearchRequest) -> SearchResult<SearchResponse> {
        let started = Instant::now();
        let query = self.prepare_query(request)?;

        if !view.is_searchable() {
            return Err(SearchError::EmptyIndex);
        }

        let k = request.k;
        let deadline = started
            + request
                .deadline
                .unwrap_or(Duration::from_millis(self.config.default_deadline_ms));
        let filter = &request.filter;
        let min_score = request.min_score.or(self.config.min_score);

        let delta_hits = view
            .delta
            .search(&query, k, self.metric, |r| filter.matches(&r.metadata));
        let delta_candidates = delta_hits.len();

        let mut partial = false;
        let mut lists_probed = 0;
        let mut segment_hits = Vec::new();

        if let Some(segment) = view.segment.as_ref().filter(|s| !s.is_empty()) {
            let quantized = segment.quantization() == Quantization::Sq8;
            let fetch = if quantized {
                k.saturating_mul(self.config.rerank_factor.max(1))
            } else {
                k
            };
            let nprobe = request.nprobe.unwrap_or(self.default_nprobe);

            let admit = |record: &EmbeddingRecord| {
                view.segment_entry_is_live(record) && filter.matches(&record.metadata)
            };
            let probed = segment.search(&query, fetch, nprobe, Some(deadline), admit)?;

            partial = probed.partial;
            lists_probed = probed.lists_probed;
            segment_hits = if quantized {
                self.rerank(&query, probed.hits)
            } else {
                probed.hits
            };
        }
        let segment_candidates = segment_hits.len();

        let mut top = TopK::new(k);
        for candidate in delta_hits.into_iter().chain(segment_hits) {
            if min_score.is_some_and(|floor| candidate.score.get() < floor) {
                continue;
            }
            top.push(candidate);
        }

        let hits = top
            .into_sorted_vec()
            .into_iter()
            .map(|c| SearchHit {
                video_id: c.record.video_id.clone(),
                score: c.score.get(),
                metadata: c.record.metadata.clone(),
                version: c.record.version,
            })
            .collect();

        if partial {
            tracing::debug!("search hit its deadline after {lists_probed} lists");
        }

        Ok(SearchResponse {
            hits,
            partial,
            segment_candidates,
            delta_candidates,
            lists_probed,
            generation: view.generation,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Validates the request shape and applies the metric's normalization.
    fn prepare_query(&self, request: &SearchRequest) -> SearchResult<Vec<f32>> {
        if request.k == 0 || request.k > self.config.max_k {
            return Err(SearchError::InvalidK {
                k: request.k,
                max_k: self.config.max_k,
            });
        }
        self.dimension.validate_vector(&request.vector)?;
        validate_finite(&request.vector)?;

        let mut query = request.vector.clone();
        if self.metric.normalizes() && query.iter().all(|v| *v == 0.0) {
            return Err(SearchError::InvalidQuery {
                reason: "a zero vector has no direction under the cosine metric".to_string(),
            });
        }
        self.metric.prepare(&mut query)?;
        Ok(query)
    }

    /// Re-scores quantized candidates with their full-precision vectors.
    fn rerank(&self, query: &[f32], candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates
            .into_iter()
            .filter_map(|c| {
                let exact = self.metric.score(query, &c.record.vector);
                Score::new(exact)
                    .ok()
                    .map(|score| Candidate::new(Arc::clone(&c.record), score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{DeltaBuffer, TombstoneSet};
    use crate::store::VectorStore;
    use crate::vector::{IndexSegment, IvfParams};

    fn id(s: &str) -> VideoId {
        VideoId::new(s).unwrap()
    }

    fn engine(dim: usize) -> QueryEngine {
        QueryEngine::new(
            QueryConfig::default(),
            VectorDimension::new(dim).unwrap(),
            Metric::Cosine,
            8,
        )
    }

    fn segment_view(store: &VectorStore, params: &IvfParams) -> IndexView {
        let segment = IndexSegment::build(
            1,
            store.snapshot(),
            store.dimension(),
            store.metric(),
            params,
        )
        .unwrap();
        IndexView {
            segment: Some(Arc::new(segment)),
            ..IndexView::default()
        }
    }

    fn abc_store() -> VectorStore {
        let store = VectorStore::in_memory(VectorDimension::new(2).unwrap(), Metric::Cosine);
        store.put(id("A"), vec![1.0, 0.0], Metadata::new()).unwrap();
        store.put(id("B"), vec![0.0, 1.0], Metadata::new()).unwrap();
        store.put(id("C"), vec![0.9, 0.1], Metadata::new()).unwrap();
        store
    }

    #[test]
    fn test_reference_scenario() {
        let store = abc_store();
        let view = segment_view(&store, &IvfParams::default());
        let engine = engine(2);

        let response = engine
            .search(&view, &SearchRequest::new(vec![1.0, 0.0], 2))
            .unwrap();
        assert_eq!(response.ids(), vec!["A", "C"]);
        assert!((response.hits[0].score - 1.0).abs() < 1e-6);
        assert!((response.hits[1].score - 0.9939).abs() < 1e-3);

        let deleted = view.derive(
            Arc::clone(&view.delta),
            Arc::new(TombstoneSet::new().with_tombstone(id("A"), 4)),
        );
        let response = engine
            .search(&deleted, &SearchRequest::new(vec![1.0, 0.0], 2))
            .unwrap();
        assert_eq!(response.ids(), vec!["C", "B"]);
        assert!(response.hits[1].score.abs() < 1e-6);
    }

    #[test]
    fn test_invalid_k() {
        let store = abc_store();
        let view = segment_view(&store, &IvfParams::default());
        let engine = engine(2);

        for k in [0, 101] {
            let err = engine
                .search(&view, &SearchRequest::new(vec![1.0, 0.0], k))
                .unwrap_err();
            assert!(matches!(err, SearchError::InvalidK { max_k: 100, .. }));
        }
    }

    #[test]
    fn test_invalid_vectors() {
        let store = abc_store();
        let view = segment_view(&store, &IvfParams::default());
        let engine = engine(2);

        let err = engine
            .search(&view, &SearchRequest::new(vec![1.0, 0.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));

        let err = engine
            .search(&view, &SearchRequest::new(vec![f32::NAN, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery { .. }));

        let err = engine
            .search(&view, &SearchRequest::new(vec![0.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery { .. }));
    }

    #[test]
    fn test_empty_index() {
        let engine = engine(2);
        let err = engine
            .search(&IndexView::empty(), &SearchRequest::new(vec![1.0, 0.0], 1))
            .unwrap_err();
        assert!(matches!(err, SearchError::EmptyIndex));

        // A delta alone is searchable
        let record = Arc::new(EmbeddingRecord {
            video_id: id("x"),
            vector: vec![1.0, 0.0],
            metadata: Metadata::new(),
            version: 1,
        });
        let view = IndexView::empty().derive(
            Arc::new(DeltaBuffer::new().with_record(record)),
            Arc::default(),
        );
        let response = engine
            .search(&view, &SearchRequest::new(vec![1.0, 0.0], 5))
            .unwrap();
        assert_eq!(response.ids(), vec!["x"]);
        assert_eq!(response.delta_candidates, 1);
    }

    #[test]
    fn test_delta_entry_shadows_segment_copy() {
        let store = abc_store();
        let view = segment_view(&store, &IvfParams::default());
        let engine = engine(2);

        // B moves next to the query
        let moved = store.put(id("B"), vec![1.0, 0.05], Metadata::new()).unwrap();
        let view = view.derive(
            Arc::new(DeltaBuffer::new().with_record(moved)),
            Arc::default(),
        );

        let response = engine
            .search(&view, &SearchRequest::new(vec![1.0, 0.0], 3))
            .unwrap();
        assert_eq!(response.ids(), vec!["A", "B", "C"]);
        let distinct: std::collections::HashSet<_> = response.ids().into_iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_filters_and_min_score() {
        let store = VectorStore::in_memory(VectorDimension::new(2).unwrap(), Metric::Cosine);
        let lang = |l: &str| Metadata::from([("lang".to_string(), l.to_string())]);
        store.put(id("en1"), vec![1.0, 0.0], lang("en")).unwrap();
        store.put(id("fr1"), vec![1.0, 0.1], lang("fr")).unwrap();
        store.put(id("en2"), vec![0.0, 1.0], lang("en")).unwrap();
        let view = segment_view(&store, &IvfParams::default());
        let engine = engine(2);

        let request = SearchRequest::new(vec![1.0, 0.0], 10)
            .with_filter_pairs(&HashMap::from([("lang".to_string(), "en".to_string())]));
        let response = engine.search(&view, &request).unwrap();
        assert_eq!(response.ids(), vec!["en1", "en2"]);

        let response = engine
            .search(&view, &request.with_min_score(0.5))
            .unwrap();
        assert_eq!(response.ids(), vec!["en1"]);
    }

    #[test]
    fn test_quantized_candidates_are_reranked_exactly() {
        let store = VectorStore::in_memory(VectorDimension::new(8).unwrap(), Metric::Cosine);
        for i in 0..40 {
            let v: Vec<f32> = (0..8).map(|j| ((i * 7 + j * 3) % 11) as f32 - 5.0).collect();
            store.put(id(&format!("v{i:02}")), v, Metadata::new()).unwrap();
        }
        let params = IvfParams {
            nlist: 4,
            quantization: Quantization::Sq8,
            ..IvfParams::default()
        };
        let view = segment_view(&store, &params);
        let engine = engine(8);

        let target = store.get(&id("v07")).unwrap();
        let response = engine
            .search(&view, &SearchRequest::new(target.vector.clone(), 3).with_nprobe(4))
            .unwrap();

        assert_eq!(response.hits[0].video_id, id("v07"));
        assert!((response.hits[0].score - 1.0).abs() < 1e-5);
        for hit in &response.hits {
            let record = store.get(&hit.video_id).unwrap();
            let exact = Metric::Cosine.score(&target.vector, &record.vector);
            assert!((hit.score - exact).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fewer_matches_than_k() {
        let store = abc_store();
        let view = segment_view(&store, &IvfParams::default());
        let response = engine(2)
            .search(&view, &SearchRequest::new(vec![0.5, 0.5], 50))
            .unwrap();
        assert_eq!(response.hits.len(), 3);
    }

    #[test]
    fn test_zero_deadline_returns_partial_results() {
        let store = VectorStore::in_memory(VectorDimension::new(4).unwrap(), Metric::Cosine);
        for i in 0..64 {
            let angle = i as f32 * 0.1;
            store
                .put(
                    id(&format!("v{i:02}")),
                    vec![angle.cos(), angle.sin(), 0.1, 0.0],
                    Metadata::new(),
                )
                .unwrap();
        }
        let params = IvfParams {
            nlist: 16,
            ..IvfParams::default()
        };
        let view = segment_view(&store, &params);

        let request = SearchRequest::new(vec![1.0, 0.0, 0.1, 0.0], 10)
            .with_nprobe(16)
            .with_deadline(Duration::ZERO);
        let response = engine(4).search(&view, &request).unwrap();
        assert!(response.partial);
        assert_eq!(response.lists_probed, 1);
        assert!(response.hits.len() <= 10);
    }
}
