//! Recall of the IVF index against brute force.

use std::collections::HashSet;

use vidsearch::vector::normalize_vector_copy;
use vidsearch::{Filter, Metric, Quantization, SearchRequest};

use crate::common::{clustered_vectors, in_memory, load, random_vectors, settings, video_id};

const DIMENSION: usize = 32;
const CORPUS: usize = 4000;
const QUERIES: usize = 50;
const K: usize = 10;

fn brute_force(corpus: &[Vec<f32>], query: &[f32], k: usize) -> HashSet<String> {
    let query = normalize_vector_copy(query);
    let mut scored: Vec<(f32, usize)> = corpus
        .iter()
        .enumerate()
        .map(|(i, v)| (Metric::Cosine.score(&query, &normalize_vector_copy(v)), i))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, i)| video_id(i)).collect()
}

fn mean_recall(quantization: Quantization) -> f64 {
    let mut config = settings(DIMENSION, 64);
    config.index.quantization = quantization;
    let service = in_memory(config);

    let corpus = clustered_vectors(CORPUS, DIMENSION, 40, 0.25, 11);
    load(&service, &corpus);
    service.rebuild().unwrap();
    assert_eq!(service.stats().delta_size, 0);

    // Queries land near stored videos, like a "more like this" request
    let noise = random_vectors(QUERIES, DIMENSION, 12);
    let queries: Vec<Vec<f32>> = noise
        .iter()
        .enumerate()
        .map(|(i, n)| {
            corpus[(i * 79) % CORPUS]
                .iter()
                .zip(n)
                .map(|(c, e)| c + 0.1 * e)
                .collect()
        })
        .collect();

    let mut total = 0.0;
    for query in &queries {
        let expected = brute_force(&corpus, query, K);
        let request = SearchRequest::new(query.clone(), K)
            .with_filter(Filter::All)
            .with_deadline_millis(10_000);
        let response = service.execute(&request).unwrap();
        assert!(!response.partial);

        let found = response
            .ids()
            .into_iter()
            .filter(|id| expected.contains(*id))
            .count();
        total += found as f64 / K as f64;
    }
    total / QUERIES as f64
}

#[test]
fn test_recall_at_default_nprobe() {
    let recall = mean_recall(Quantization::None);
    assert!(recall >= 0.9, "recall@{K} was {recall:.3}");
}

#[test]
fn test_recall_with_sq8_and_rerank() {
    let recall = mean_recall(Quantization::Sq8);
    assert!(recall >= 0.9, "recall@{K} was {recall:.3}");
}

#[test]
fn test_full_probe_is_exact() {
    let service = in_memory(settings(DIMENSION, 16));
    let corpus = clustered_vectors(800, DIMENSION, 10, 0.5, 21);
    load(&service, &corpus);
    service.rebuild().unwrap();

    for query in clustered_vectors(10, DIMENSION, 10, 0.5, 22) {
        let expected = brute_force(&corpus, &query, K);
        let request = SearchRequest::new(query, K)
            .with_nprobe(16)
            .with_deadline_millis(10_000);
        let found: HashSet<String> = service
            .execute(&request)
            .unwrap()
            .ids()
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(found, expected);
    }
}
