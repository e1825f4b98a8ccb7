//! On-disk store behavior across service restarts.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;
use vidsearch::store::LOG_FILE_NAME;
use vidsearch::{Filter, IndexState, Metadata, SearchError, SearchService, Settings, StoreError};

use crate::common::{load, meta, random_vectors, settings, video_id};

const DIMENSION: usize = 8;

fn on_disk(dir: &TempDir) -> Arc<Settings> {
    let mut config = settings(DIMENSION, 4);
    config.index_path = dir.path().join("index");
    Arc::new(config)
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let vectors = random_vectors(40, DIMENSION, 17);

    let before = {
        let service = SearchService::open(on_disk(&dir)).unwrap();
        load(&service, &vectors);
        service
            .upsert("titled", vectors[0].clone(), meta(&[("title", "Moon landing")]))
            .unwrap();
        service.delete(&video_id(1)).unwrap();
        service
            .search(vectors[0].clone(), 10, &Filter::All, None)
            .unwrap()
    };

    let service = SearchService::open(on_disk(&dir)).unwrap();
    assert_eq!(service.manager().state(), IndexState::Ready);
    assert_eq!(service.store().len(), 40);

    let after = service
        .search(vectors[0].clone(), 10, &Filter::All, None)
        .unwrap();
    assert_eq!(before.ids(), after.ids());

    let titled = service
        .search(vectors[0].clone(), 1, &Filter::exists("title"), None)
        .unwrap();
    assert_eq!(titled.ids(), vec!["titled"]);
    assert!(service.store().get(&vidsearch::VideoId::new(video_id(1)).unwrap()).is_none());
}

#[test]
fn test_versions_keep_increasing_after_reopen() {
    let dir = TempDir::new().unwrap();
    let first = {
        let service = SearchService::open(on_disk(&dir)).unwrap();
        service.upsert("a", vec![1.0; DIMENSION], Metadata::new()).unwrap();
        let removed = service.upsert("b", vec![0.5; DIMENSION], Metadata::new()).unwrap();
        service.delete("b").unwrap();
        removed
    };

    // Opening rebuilds and compacts; the sequence must not restart
    let service = SearchService::open(on_disk(&dir)).unwrap();
    let next = service.upsert("c", vec![1.0; DIMENSION], Metadata::new()).unwrap();
    assert!(next > first + 1, "{next} <= {}", first + 1);
}

#[test]
fn test_torn_tail_is_discarded() {
    let dir = TempDir::new().unwrap();
    let mut config = (*on_disk(&dir)).clone();
    // Keep the replayed log as is so the truncation is observable
    config.manager.compact_store_on_rebuild = false;
    let settings = Arc::new(config);
    {
        let service = SearchService::open(Arc::clone(&settings)).unwrap();
        service.upsert("a", vec![1.0; DIMENSION], Metadata::new()).unwrap();
        service.upsert("b", vec![-1.0; DIMENSION], Metadata::new()).unwrap();
    }

    let log_path = settings.index_path.join(LOG_FILE_NAME);
    let intact_len = std::fs::metadata(&log_path).unwrap().len();
    {
        // A frame header promising far more bytes than were written
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&[0x40, 0x00, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef, b'{'])
            .unwrap();
    }

    let service = SearchService::open(settings).unwrap();
    assert_eq!(service.store().len(), 2);
    assert_eq!(std::fs::metadata(&log_path).unwrap().len(), intact_len);

    let response = service
        .search(vec![1.0; DIMENSION], 1, &Filter::All, None)
        .unwrap();
    assert_eq!(response.ids(), vec!["a"]);
}

#[test]
fn test_reopen_with_other_dimension_fails() {
    let dir = TempDir::new().unwrap();
    {
        let service = SearchService::open(on_disk(&dir)).unwrap();
        service.upsert("a", vec![1.0; DIMENSION], Metadata::new()).unwrap();
    }

    let mut config = (*on_disk(&dir)).clone();
    config.index.dimension = DIMENSION * 2;
    let error = SearchService::open(Arc::new(config)).unwrap_err();
    assert!(
        matches!(
            error,
            SearchError::Store(StoreError::StoreMismatch {
                field: "dimension",
                ..
            })
        ),
        "{error}"
    );
}

#[test]
fn test_rebuild_compacts_the_log() {
    let dir = TempDir::new().unwrap();
    let settings = on_disk(&dir);
    let service = SearchService::open(Arc::clone(&settings)).unwrap();

    for round in 0..20 {
        let vector: Vec<f32> = (0..DIMENSION).map(|d| (round + d) as f32).collect();
        service.upsert("churn", vector, Metadata::new()).unwrap();
    }
    let before = service.stats().store_bytes.unwrap();

    service.rebuild().unwrap();
    let after = service.stats().store_bytes.unwrap();
    assert!(after < before, "{after} >= {before}");

    drop(service);
    let service = SearchService::open(settings).unwrap();
    assert_eq!(service.store().len(), 1);
}
