//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vidsearch::config::{IndexConfig, ManagerConfig};
use vidsearch::{Metadata, SearchService, Settings};

pub fn video_id(i: usize) -> String {
    format!("vid{i:05}")
}

/// Settings for an in-memory or temp-dir service of `dimension` dims.
pub fn settings(dimension: usize, nlist: usize) -> Settings {
    Settings {
        index: IndexConfig {
            dimension,
            nlist,
            ..IndexConfig::default()
        },
        manager: ManagerConfig {
            min_tombstones_for_compaction: usize::MAX,
            ..ManagerConfig::default()
        },
        ..Settings::default()
    }
}

pub fn in_memory(settings: Settings) -> SearchService {
    SearchService::in_memory(Arc::new(settings)).expect("service")
}

/// Uniform vectors in `[-1, 1]^dimension`.
pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

/// Points scattered around `clusters` random centers, the shape real
/// embedding corpora tend to have.
pub fn clustered_vectors(
    count: usize,
    dimension: usize,
    clusters: usize,
    spread: f32,
    seed: u64,
) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = random_vectors(clusters, dimension, seed.wrapping_add(1));
    (0..count)
        .map(|i| {
            centers[i % clusters]
                .iter()
                .map(|c| c + rng.random_range(-spread..spread))
                .collect()
        })
        .collect()
}

/// Upserts `vectors` as `vid00000`, `vid00001`, ...
pub fn load(service: &SearchService, vectors: &[Vec<f32>]) {
    for (i, vector) in vectors.iter().enumerate() {
        service
            .upsert(&video_id(i), vector.clone(), Metadata::new())
            .expect("upsert");
    }
}

pub fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
