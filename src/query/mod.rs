//! Query execution: validation, filtered candidate scans and ranking.

mod engine;
mod filter;

pub use engine::{QueryEngine, SearchHit, SearchRequest, SearchResponse};
pub use filter::Filter;
