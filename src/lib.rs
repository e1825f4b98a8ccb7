/// The main library module for vidsearch
pub mod config;
pub mod display;
pub mod error;
pub mod index;
pub mod query;
pub mod service;
pub mod store;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{SearchError, SearchResult};
pub use index::{IndexManager, IndexState, IndexView, RebuildOutcome, RebuildTrigger};
pub use query::{Filter, QueryEngine, SearchHit, SearchRequest, SearchResponse};
pub use service::{SearchService, ServiceStats, VerifyReport};
pub use store::{EmbeddingRecord, Metadata, StoreError, VectorStore};
pub use vector::{
    EmbedInput, EmbeddingGenerator, IndexSegment, IvfParams, Metric, MockEmbeddingGenerator,
    Quantization, VectorDimension, VectorError, VideoId,
};
