//! Index lifecycle: initial build, incremental writes, coalesced rebuilds.
//!
//! # State machine
//!
//! ```text
//! Empty --build--> Building --ok--> Ready --trigger--> Rebuilding --ok--> Ready
//!                     |                                    |
//!                     +--err--> Empty                      +--err--> Ready (old view)
//! ```
//!
//! Readers load the published [`IndexView`] with one atomic pointer load and
//! never wait for writers or rebuilds. Writers serialize on a single mutex and
//! publish a fresh view built from copy-on-write delta and tombstone sets.
//!
//! A rebuild records the store sequence under the writer lock, snapshots the
//! store, builds a new segment off the hot path, then swaps it in while
//! keeping only delta entries and tombstones newer than the recorded sequence.
//! Requests that arrive while a rebuild runs are coalesced into it; when it
//! ends, the delta and tombstone bounds are checked again and another rebuild
//! starts if they are still exceeded.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::config::ManagerConfig;
use crate::error::{SearchError, SearchResult};
use crate::index::view::IndexView;
use crate::store::{EmbeddingRecord, VectorStore};
use crate::vector::{IndexSegment, IvfParams, Quantization, VideoId};

/// Lifecycle state of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    Building,
    Ready,
    Rebuilding,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IndexState::Empty => "empty",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Rebuilding => "rebuilding",
        };
        f.write_str(name)
    }
}

/// Why a rebuild was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildTrigger {
    /// The delta buffer reached its capacity.
    DeltaFull,
    /// Deletions reached the configured share of the segment.
    TombstoneRatio,
    /// Operator or API request.
    Manual,
}

impl RebuildTrigger {
    fn is_automatic(self) -> bool {
        !matches!(self, RebuildTrigger::Manual)
    }
}

impl fmt::Display for RebuildTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebuildTrigger::DeltaFull => "delta full",
            RebuildTrigger::TombstoneRatio => "tombstone ratio",
            RebuildTrigger::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// What happened to a rebuild request.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildOutcome {
    /// Ran to completion on the calling thread.
    Completed(RebuildSummary),
    /// Started on the background thread.
    Scheduled,
    /// Another rebuild is in flight; its result covers this request.
    Coalesced,
    /// Automatic rebuilds are paused after a recent failure.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebuildSummary {
    pub segment_id: u64,
    pub records: usize,
    pub nlist: usize,
    pub generation: u64,
    pub duration: Duration,
}

/// Point-in-time statistics of the manager.
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub state: IndexState,
    pub generation: u64,
    pub segment_id: Option<u64>,
    pub segment_size: usize,
    pub nlist: usize,
    pub largest_list: usize,
    pub quantization: Option<Quantization>,
    pub segment_memory_bytes: usize,
    pub delta_size: usize,
    pub tombstone_count: usize,
    pub last_rebuild_at: Option<DateTime<Utc>>,
    pub last_rebuild_duration: Option<Duration>,
    pub rebuilds_completed: u64,
    pub rebuilds_failed: u64,
    pub last_error: Option<String>,
    pub retired_segments_alive: usize,
    pub rebuilding: bool,
}

#[derive(Debug, Default)]
struct RebuildHistory {
    last_rebuild_at: Option<DateTime<Utc>>,
    last_duration: Option<Duration>,
    completed: u64,
    failed: u64,
    last_failure: Option<Instant>,
    last_error: Option<String>,
}

#[derive(Debug)]
struct Shared {
    store: Arc<VectorStore>,
    params: IvfParams,
    config: ManagerConfig,
    view: ArcSwap<IndexView>,
    /// Serializes every publish of a new view.
    writer: Mutex<()>,
    state: RwLock<IndexState>,
    rebuilding: AtomicBool,
    /// Set when a request was coalesced into the running rebuild.
    pending: AtomicBool,
    next_segment_id: AtomicU64,
    retired: Mutex<Vec<Weak<IndexSegment>>>,
    history: Mutex<RebuildHistory>,
    /// Background rebuild threads not yet joined.
    workers: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(test)]
    fail_next_build: AtomicBool,
}

/// Clears the in-flight flag when a rebuild ends, including by panic, and
/// follows up on requests coalesced into it.
struct InFlight(Arc<Shared>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.rebuilding.store(false, Ordering::SeqCst);
        if self.0.pending.swap(false, Ordering::SeqCst) {
            let view = self.0.view.load_full();
            if let Some(trigger) = self.0.due_trigger(&view) {
                tracing::debug!("bounds still exceeded after rebuild, rescheduling ({trigger})");
                Shared::request_rebuild(&self.0, trigger);
            }
        }
    }
}

/// Owner of the published index view.
#[derive(Debug, Clone)]
pub struct IndexManager {
    shared: Arc<Shared>,
}

impl IndexManager {
    /// Creates a manager in the `Empty` state with nothing published.
    #[must_use]
    pub fn new(store: Arc<VectorStore>, params: IvfParams, config: ManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                params,
                config,
                view: ArcSwap::from_pointee(IndexView::empty()),
                writer: Mutex::new(()),
                state: RwLock::new(IndexState::Empty),
                rebuilding: AtomicBool::new(false),
                pending: AtomicBool::new(false),
                next_segment_id: AtomicU64::new(0),
                retired: Mutex::new(Vec::new()),
                history: Mutex::new(RebuildHistory::default()),
                workers: Mutex::new(Vec::new()),
                #[cfg(test)]
                fail_next_build: AtomicBool::new(false),
            }),
        }
    }

    /// The currently published view.
    #[must_use]
    pub fn view(&self) -> Arc<IndexView> {
        self.shared.view.load_full()
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        *self.shared.state.read()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.shared.store
    }

    #[must_use]
    pub fn params(&self) -> &IvfParams {
        &self.shared.params
    }

    /// Whether a rebuild is currently running.
    #[must_use]
    pub fn is_rebuilding(&self) -> bool {
        self.shared.rebuilding.load(Ordering::Acquire)
    }

    /// Makes `record` visible to the next query.
    ///
    /// Returns `false` when the view already holds a newer version of the id
    /// (a racing writer got there first), or when the published segment was
    /// built after the record was superseded or removed in the store.
    pub fn upsert(&self, record: Arc<EmbeddingRecord>) -> bool {
        let next = {
            let _writer = self.shared.writer.lock();
            let current = self.shared.view.load_full();

            if current
                .latest_sequence(&record.video_id)
                .is_some_and(|seq| seq > record.version)
                || current.predates_segment(&record)
            {
                tracing::debug!(
                    "ignoring stale upsert of '{}' (version {})",
                    record.video_id,
                    record.version
                );
                return false;
            }

            let tombstones = if current.tombstones.contains(&record.video_id) {
                Arc::new(current.tombstones.without(&record.video_id))
            } else {
                Arc::clone(&current.tombstones)
            };
            let delta = Arc::new(current.delta.with_record(record));
            let next = Arc::new(current.derive(delta, tombstones));
            self.shared.view.store(Arc::clone(&next));
            next
        };

        if let Some(trigger) = self.shared.due_trigger(&next) {
            self.request_rebuild(trigger);
        }
        true
    }

    /// Hides `id` from every subsequent query.
    ///
    /// `sequence` is the store sequence assigned to the removal. Returns
    /// whether the id was visible before the call.
    pub fn delete(&self, id: &VideoId, sequence: u64) -> bool {
        let (was_visible, next) = {
            let _writer = self.shared.writer.lock();
            let current = self.shared.view.load_full();

            if current.latest_sequence(id).is_some_and(|seq| seq > sequence) {
                tracing::debug!("ignoring stale delete of '{id}' (sequence {sequence})");
                return false;
            }

            let was_visible = current.lookup(id).is_some();
            let delta = if current.delta.contains(id) {
                Arc::new(current.delta.without(id))
            } else {
                Arc::clone(&current.delta)
            };
            let tombstones = Arc::new(current.tombstones.with_tombstone(id.clone(), sequence));
            let next = Arc::new(current.derive(delta, tombstones));
            self.shared.view.store(Arc::clone(&next));
            (was_visible, next)
        };

        if let Some(trigger) = self.shared.due_trigger(&next) {
            self.request_rebuild(trigger);
        }
        was_visible
    }

    /// Rebuilds on the calling thread.
    ///
    /// Returns `Coalesced` without waiting when a rebuild is already running.
    pub fn rebuild_now(&self) -> SearchResult<RebuildOutcome> {
        let Some(guard) = self.try_begin() else {
            self.shared.pending.store(true, Ordering::SeqCst);
            return Ok(RebuildOutcome::Coalesced);
        };
        let summary = Shared::run_rebuild(&self.shared, RebuildTrigger::Manual);
        drop(guard);
        summary.map(RebuildOutcome::Completed)
    }

    /// Starts a rebuild on the background thread.
    pub fn request_rebuild(&self, trigger: RebuildTrigger) -> RebuildOutcome {
        Shared::request_rebuild(&self.shared, trigger)
    }

    /// Blocks until background rebuilds finish, including follow-ups
    /// scheduled when a rebuild ends.
    pub fn wait_for_rebuild(&self) {
        loop {
            let handles = std::mem::take(&mut *self.shared.workers.lock());
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if handle.join().is_err() {
                    tracing::error!("rebuild thread panicked");
                }
            }
        }
    }

    /// Retired segments still referenced by in-flight readers.
    #[must_use]
    pub fn retired_segments_alive(&self) -> usize {
        let mut retired = self.shared.retired.lock();
        retired.retain(|segment| segment.strong_count() > 0);
        retired.len()
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        let view = self.view();
        let retired_segments_alive = self.retired_segments_alive();
        let history = self.shared.history.lock();
        let segment = view.segment.as_deref();

        IndexStats {
            state: self.state(),
            generation: view.generation,
            segment_id: segment.map(IndexSegment::id),
            segment_size: view.segment_len(),
            nlist: segment.map_or(0, IndexSegment::nlist),
            largest_list: segment
                .and_then(|s| s.list_sizes().into_iter().max())
                .unwrap_or(0),
            quantization: segment.map(IndexSegment::quantization),
            segment_memory_bytes: segment.map_or(0, IndexSegment::memory_bytes),
            delta_size: view.delta.len(),
            tombstone_count: view.tombstones.len(),
            last_rebuild_at: history.last_rebuild_at,
            last_rebuild_duration: history.last_duration,
            rebuilds_completed: history.completed,
            rebuilds_failed: history.failed,
            last_error: history.last_error.clone(),
            retired_segments_alive,
            rebuilding: self.is_rebuilding(),
        }
    }

    fn try_begin(&self) -> Option<InFlight> {
        Shared::try_begin(&self.shared)
    }

    #[cfg(test)]
    fn fail_next_build(&self) {
        self.shared.fail_next_build.store(true, Ordering::Release);
    }
}

impl Shared {
    fn try_begin(shared: &Arc<Shared>) -> Option<InFlight> {
        shared
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(Arc::clone(shared)))
    }

    fn in_backoff(&self) -> bool {
        let backoff = self.config.retry_backoff();
        self.history
            .lock()
            .last_failure
            .is_some_and(|at| at.elapsed() < backoff)
    }

    /// The automatic trigger `view` has reached, if any.
    fn due_trigger(&self, view: &IndexView) -> Option<RebuildTrigger> {
        let config = &self.config;
        let tombstones = view.tombstones.len();
        if view.delta.len() >= config.delta_capacity {
            Some(RebuildTrigger::DeltaFull)
        } else if tombstones >= config.min_tombstones_for_compaction
            && tombstones as f32 / view.segment_len().max(1) as f32 >= config.tombstone_ratio
        {
            Some(RebuildTrigger::TombstoneRatio)
        } else {
            None
        }
    }

    fn request_rebuild(shared: &Arc<Shared>, trigger: RebuildTrigger) -> RebuildOutcome {
        if trigger.is_automatic() && shared.in_backoff() {
            tracing::debug!("{trigger} rebuild suppressed after a recent failure");
            return RebuildOutcome::Suppressed;
        }

        // A request flagged while the running rebuild is still in flight is
        // seen by its InFlight drop; otherwise the rebuild already ended and
        // this request starts the next one.
        let guard = loop {
            if let Some(guard) = Shared::try_begin(shared) {
                break guard;
            }
            shared.pending.store(true, Ordering::SeqCst);
            if shared.rebuilding.load(Ordering::SeqCst) {
                return RebuildOutcome::Coalesced;
            }
        };

        let worker = Arc::clone(shared);
        let spawned = std::thread::Builder::new()
            .name("vidsearch-rebuild".to_string())
            .spawn(move || {
                let _guard = guard;
                // Failures are logged and recorded by run_rebuild
                let _ = Shared::run_rebuild(&worker, trigger);
            });

        match spawned {
            Ok(handle) => {
                let mut workers = shared.workers.lock();
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
                RebuildOutcome::Scheduled
            }
            Err(e) => {
                tracing::error!("failed to spawn rebuild thread: {e}");
                RebuildOutcome::Suppressed
            }
        }
    }

    fn run_rebuild(shared: &Arc<Shared>, trigger: RebuildTrigger) -> SearchResult<RebuildSummary> {
        let started = Instant::now();

        let cutoff = {
            let _writer = shared.writer.lock();
            shared.store.last_sequence()
        };

        let prior = {
            let mut state = shared.state.write();
            let prior = *state;
            *state = match prior {
                IndexState::Empty | IndexState::Building => IndexState::Building,
                IndexState::Ready | IndexState::Rebuilding => IndexState::Rebuilding,
            };
            prior
        };

        tracing::info!("rebuilding index ({trigger}, through sequence {cutoff})");

        let segment_id = shared.next_segment_id.fetch_add(1, Ordering::Relaxed) + 1;
        let segment = match shared.build_segment(segment_id) {
            Ok(segment) => Arc::new(segment),
            Err(reason) => {
                *shared.state.write() = prior;
                let mut history = shared.history.lock();
                history.failed += 1;
                history.last_failure = Some(Instant::now());
                history.last_error = Some(reason.clone());
                tracing::error!(
                    "index rebuild failed ({trigger}): {reason}; previous index keeps serving"
                );
                return Err(SearchError::RebuildFailure { reason });
            }
        };

        let (generation, previous) = {
            let _writer = shared.writer.lock();
            let current = shared.view.load_full();
            let next = IndexView {
                segment: Some(Arc::clone(&segment)),
                delta: Arc::new(current.delta.retain_after(cutoff)),
                tombstones: Arc::new(current.tombstones.retain_after(cutoff)),
                generation: current.generation + 1,
                built_through: cutoff,
            };
            let generation = next.generation;
            shared.view.store(Arc::new(next));
            *shared.state.write() = IndexState::Ready;
            (generation, current.segment.clone())
        };

        if let Some(previous) = previous {
            let mut retired = shared.retired.lock();
            retired.retain(|segment| segment.strong_count() > 0);
            retired.push(Arc::downgrade(&previous));
        }

        let duration = started.elapsed();
        {
            let mut history = shared.history.lock();
            history.completed += 1;
            history.last_rebuild_at = Some(Utc::now());
            history.last_duration = Some(duration);
            history.last_failure = None;
            history.last_error = None;
        }

        tracing::info!(
            "published segment {segment_id}: {} records in {} lists, generation {generation} ({:.1?})",
            segment.len(),
            segment.nlist(),
            duration
        );

        if shared.config.compact_store_on_rebuild {
            match shared.store.compact() {
                Ok(reclaimed) if reclaimed > 0 => {
                    tracing::debug!("store compaction reclaimed {reclaimed} bytes");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("store compaction failed: {e}"),
            }
        }

        Ok(RebuildSummary {
            segment_id,
            records: segment.len(),
            nlist: segment.nlist(),
            generation,
            duration,
        })
    }

    fn build_segment(&self, segment_id: u64) -> Result<IndexSegment, String> {
        #[cfg(test)]
        {
            if self.fail_next_build.swap(false, Ordering::AcqRel) {
                return Err("injected build failure".to_string());
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.build_threads.max(1))
            .thread_name(|i| format!("vidsearch-build-{i}"))
            .build()
            .map_err(|e| format!("cannot start build workers: {e}"))?;

        let snapshot = self.store.snapshot();
        pool.install(|| {
            IndexSegment::build(
                segment_id,
                snapshot,
                self.store.dimension(),
                self.store.metric(),
                &self.params,
            )
        })
        .map_err(|e| e.to_string())
    }
}
