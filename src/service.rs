//! Search service facade.
//!
//! `SearchService` wires the store, the index manager and the query engine
//! together and exposes the operations an HTTP layer needs. It trusts its
//! caller: authentication and request parsing happen outside this crate.

use std::sync::Arc;

use serde::Serialize;

use crate::config::Settings;
use crate::error::{SearchError, SearchResult};
use crate::index::{IndexManager, IndexStats, RebuildOutcome};
use crate::query::{Filter, QueryEngine, SearchRequest, SearchResponse};
use crate::store::{Metadata, VectorStore};
use crate::vector::{EmbedInput, EmbeddingGenerator, Metric, VectorDimension, VideoId};

/// Service level statistics, ready for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub state: String,
    pub generation: u64,
    pub dimension: usize,
    pub metric: String,
    pub segment_id: Option<u64>,
    pub segment_size: usize,
    pub nlist: usize,
    pub largest_list: usize,
    pub quantization: Option<String>,
    pub segment_memory_bytes: usize,
    pub delta_size: usize,
    pub tombstone_count: usize,
    /// Ids a query can currently return.
    pub live_count: usize,
    /// RFC 3339 timestamp of the last successful rebuild.
    pub last_rebuild_timestamp: Option<String>,
    pub last_rebuild_duration_ms: Option<f64>,
    pub rebuilds_completed: u64,
    pub rebuilds_failed: u64,
    pub last_error: Option<String>,
    pub retired_segments_alive: usize,
    pub rebuilding: bool,
    pub store_size: usize,
    pub store_bytes: Option<u64>,
    pub last_sequence: u64,
}

/// Result of comparing the published index with the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub generation: u64,
    pub store_records: usize,
    pub index_live: usize,
    /// Stored ids a query cannot return.
    pub missing_from_index: Vec<VideoId>,
    /// Ids the index serves with a different version than the store holds.
    pub stale_in_index: Vec<VideoId>,
    /// Ids the index serves that the store no longer holds.
    pub orphaned_in_index: Vec<VideoId>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty()
            && self.stale_in_index.is_empty()
            && self.orphaned_in_index.is_empty()
    }
}

/// Entry point for search, ingestion and maintenance.
#[derive(Debug, Clone)]
pub struct SearchService {
    settings: Arc<Settings>,
    manager: IndexManager,
    engine: QueryEngine,
}

impl SearchService {
    /// Opens the store under `settings.index_path` and builds the initial index.
    pub fn open(settings: Arc<Settings>) -> SearchResult<Self> {
        let (dimension, metric) = Self::validate_settings(&settings)?;
        let store = VectorStore::open(&settings.index_path, dimension, metric)?;

        tracing::info!(
            "opened store at {} with {} records",
            settings.index_path.display(),
            store.len()
        );
        Self::with_store(settings, Arc::new(store))
    }

    /// A service whose store lives only in memory.
    pub fn in_memory(settings: Arc<Settings>) -> SearchResult<Self> {
        let (dimension, metric) = Self::validate_settings(&settings)?;
        Self::with_store(settings, Arc::new(VectorStore::in_memory(dimension, metric)))
    }

    fn validate_settings(settings: &Settings) -> SearchResult<(VectorDimension, Metric)> {
        settings
            .validate()
            .map_err(|reason| SearchError::ConfigError { reason })?;
        let dimension = VectorDimension::new(settings.index.dimension)?;
        Ok((dimension, settings.index.metric))
    }

    fn with_store(settings: Arc<Settings>, store: Arc<VectorStore>) -> SearchResult<Self> {
        let manager = IndexManager::new(
            Arc::clone(&store),
            settings.index.ivf_params(),
            settings.manager.clone(),
        );
        let engine = QueryEngine::new(
            settings.query.clone(),
            store.dimension(),
            store.metric(),
            settings.index.nprobe,
        );

        if !store.is_empty() {
            manager.rebuild_now()?;
        }

        Ok(Self {
            settings,
            manager,
            engine,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn manager(&self) -> &IndexManager {
        &self.manager
    }

    #[must_use]
    pub fn store(&self) -> &Arc<VectorStore> {
        self.manager.store()
    }

    /// Top-k search with the default `nprobe`.
    ///
    /// `deadline_millis` falls back to the configured default when `None`.
    pub fn search(
        &self,
        query_vector: Vec<f32>,
        k: usize,
        filter: &Filter,
        deadline_millis: Option<u64>,
    ) -> SearchResult<SearchResponse> {
        let mut request = SearchRequest::new(query_vector, k).with_filter(filter.clone());
        if let Some(millis) = deadline_millis {
            request = request.with_deadline_millis(millis);
        }
        self.execute(&request)
    }

    /// Runs a fully specified request against the current view.
    pub fn execute(&self, request: &SearchRequest) -> SearchResult<SearchResponse> {
        let view = self.manager.view();
        let response = self.engine.search(&view, request)?;
        tracing::debug!(
            "search k={} returned {} hits in {:.2}ms (generation {}, partial: {})",
            request.k,
            response.hits.len(),
            response.elapsed_ms,
            response.generation,
            response.partial
        );
        Ok(response)
    }

    /// Stores `vector` under `video_id` and makes it searchable.
    ///
    /// Returns the version assigned to the record.
    pub fn upsert(&self, video_id: &str, vector: Vec<f32>, metadata: Metadata) -> SearchResult<u64> {
        let id = VideoId::new(video_id)?;
        let record = self.store().put(id, vector, metadata)?;
        let version = record.version;
        self.manager.upsert(record);
        Ok(version)
    }

    /// Deletes `video_id`. Returns whether it existed.
    pub fn delete(&self, video_id: &str) -> SearchResult<bool> {
        let id = VideoId::new(video_id)?;
        match self.store().remove(&id)? {
            Some(sequence) => {
                self.manager.delete(&id, sequence);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Embeds `text` and searches with the result.
    pub fn search_text(
        &self,
        generator: &dyn EmbeddingGenerator,
        text: &str,
        k: usize,
        filter: &Filter,
        deadline_millis: Option<u64>,
    ) -> SearchResult<SearchResponse> {
        let vector = self.embed(generator, &EmbedInput::Text(text.to_string()))?;
        self.search(vector, k, filter, deadline_millis)
    }

    /// Embeds `input` and upserts the result under `video_id`.
    pub fn upsert_with(
        &self,
        generator: &dyn EmbeddingGenerator,
        video_id: &str,
        input: &EmbedInput,
        metadata: Metadata,
    ) -> SearchResult<u64> {
        let vector = self.embed(generator, input)?;
        self.upsert(video_id, vector, metadata)
    }

    fn embed(
        &self,
        generator: &dyn EmbeddingGenerator,
        input: &EmbedInput,
    ) -> SearchResult<Vec<f32>> {
        let expected = self.store().dimension().get();
        if generator.dimension().get() != expected {
            return Err(SearchError::DimensionMismatch {
                expected,
                actual: generator.dimension().get(),
            });
        }
        Ok(generator.embed(input)?)
    }

    /// Rebuilds the index on the calling thread.
    pub fn rebuild(&self) -> SearchResult<RebuildOutcome> {
        self.manager.rebuild_now()
    }

    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let IndexStats {
            state,
            generation,
            segment_id,
            segment_size,
            nlist,
            largest_list,
            quantization,
            segment_memory_bytes,
            delta_size,
            tombstone_count,
            last_rebuild_at,
            last_rebuild_duration,
            rebuilds_completed,
            rebuilds_failed,
            last_error,
            retired_segments_alive,
            rebuilding,
        } = self.manager.stats();
        let store = self.store();

        ServiceStats {
            state: state.to_string(),
            generation,
            dimension: store.dimension().get(),
            metric: store.metric().to_string(),
            segment_id,
            segment_size,
            nlist,
            largest_list,
            quantization: quantization.map(|q| format!("{q:?}").to_lowercase()),
            segment_memory_bytes,
            delta_size,
            tombstone_count,
            live_count: self.manager.view().live_count(),
            last_rebuild_timestamp: last_rebuild_at.map(|at| at.to_rfc3339()),
            last_rebuild_duration_ms: last_rebuild_duration.map(|d| d.as_secs_f64() * 1000.0),
            rebuilds_completed,
            rebuilds_failed,
            last_error,
            retired_segments_alive,
            rebuilding,
            store_size: store.len(),
            store_bytes: store.log_size_bytes().ok().filter(|_| store.is_persistent()),
            last_sequence: store.last_sequence(),
        }
    }

    /// Compares what queries can see with what the store holds.
    ///
    /// Writes that land between the two scans can show up as transient
    /// differences; run it on a quiescent service for a definitive answer.
    #[must_use]
    pub fn verify(&self) -> VerifyReport {
        let view = self.manager.view();
        let store = self.store();
        let mut report = VerifyReport {
            generation: view.generation,
            store_records: store.len(),
            index_live: view.live_count(),
            ..VerifyReport::default()
        };

        for record in store.snapshot() {
            match view.lookup(&record.video_id) {
                None => report.missing_from_index.push(record.video_id.clone()),
                Some(indexed) if indexed.version != record.version => {
                    report.stale_in_index.push(record.video_id.clone());
                }
                Some(_) => {}
            }
        }

        let segment_live = view
            .segment
            .iter()
            .flat_map(|segment| segment.records())
            .filter(|record| view.segment_entry_is_live(record));
        for record in segment_live.chain(view.delta.records()) {
            if !store.contains(&record.video_id) {
                report.orphaned_in_index.push(record.video_id.clone());
            }
        }

        report.missing_from_index.sort();
        report.stale_in_index.sort();
        report.orphaned_in_index.sort();

        if report.is_consistent() {
            tracing::debug!("verify: index generation {} matches the store", view.generation);
        } else {
            tracing::warn!(
                "verify: {} missing, {} stale, {} orphaned",
                report.missing_from_index.len(),
                report.stale_in_index.len(),
                report.orphaned_in_index.len()
            );
        }
        report
    }
}
