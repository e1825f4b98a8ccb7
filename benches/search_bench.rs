//! Performance benchmarks for top-k search
//!
//! Compares IVF probing at several nprobe values against a full scan and
//! measures the cost of searching a populated delta buffer.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::sync::Arc;
use vidsearch::config::IndexConfig;
use vidsearch::{Filter, Metadata, SearchRequest, SearchService, Settings};

const DIMENSION: usize = 128;

fn random_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..DIMENSION).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

fn populated_service(count: usize, nlist: usize) -> SearchService {
    let settings = Settings {
        index: IndexConfig {
            dimension: DIMENSION,
            nlist,
            ..IndexConfig::default()
        },
        ..Settings::default()
    };
    let service = SearchService::in_memory(Arc::new(settings)).unwrap();
    for (i, vector) in random_vectors(count, 1).into_iter().enumerate() {
        service
            .upsert(&format!("vid{i}"), vector, Metadata::new())
            .unwrap();
    }
    service.manager().wait_for_rebuild();
    service.rebuild().unwrap();
    service
}

fn bench_nprobe(c: &mut Criterion) {
    let service = populated_service(20_000, 64);
    let queries = random_vectors(64, 2);
    let mut group = c.benchmark_group("search_20k_top10");

    for nprobe in [1, 8, 32, 64] {
        group.bench_with_input(BenchmarkId::new("nprobe", nprobe), &nprobe, |b, &nprobe| {
            let mut i = 0;
            b.iter(|| {
                let request = SearchRequest::new(queries[i % queries.len()].clone(), 10)
                    .with_nprobe(nprobe)
                    .with_deadline_millis(60_000);
                i += 1;
                black_box(service.execute(&request).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_filtered(c: &mut Criterion) {
    let service = populated_service(5_000, 32);
    let query = random_vectors(1, 3).remove(0);
    let filter = Filter::eq("channel_title", "missing");

    c.bench_function("search_5k_filter_rejects_all", |b| {
        b.iter(|| {
            black_box(
                service
                    .search(black_box(query.clone()), 10, &filter, Some(60_000))
                    .unwrap(),
            );
        });
    });
}

fn bench_delta_scan(c: &mut Criterion) {
    let settings = Settings {
        index: IndexConfig {
            dimension: DIMENSION,
            ..IndexConfig::default()
        },
        ..Settings::default()
    };
    let service = SearchService::in_memory(Arc::new(settings)).unwrap();
    // Stays below the default delta capacity, so nothing is rebuilt
    for (i, vector) in random_vectors(1_000, 4).into_iter().enumerate() {
        service
            .upsert(&format!("vid{i}"), vector, Metadata::new())
            .unwrap();
    }
    let query = random_vectors(1, 5).remove(0);

    c.bench_function("search_delta_1000_top10", |b| {
        b.iter(|| {
            black_box(
                service
                    .search(black_box(query.clone()), 10, &Filter::All, None)
                    .unwrap(),
            );
        });
    });
}

criterion_group!(benches, bench_nprobe, bench_filtered, bench_delta_scan);
criterion_main!(benches);
