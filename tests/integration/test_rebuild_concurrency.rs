//! Searches racing writers and background rebuilds.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use vidsearch::{Filter, Metadata, SearchService, VideoId};

use crate::common::{load, random_vectors, settings, video_id};

const DIMENSION: usize = 16;

fn service(delta_capacity: usize) -> Arc<SearchService> {
    let mut config = settings(DIMENSION, 8);
    config.manager.delta_capacity = delta_capacity;
    Arc::new(SearchService::in_memory(Arc::new(config)).unwrap())
}

#[test]
fn test_searches_during_rebuilds_never_fail() {
    let service = service(40);
    let vectors = random_vectors(600, DIMENSION, 5);
    load(&service, &vectors[..100]);
    service.rebuild().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let service = Arc::clone(&service);
            let stop = Arc::clone(&stop);
            let queries = random_vectors(32, DIMENSION, 100 + r);
            thread::spawn(move || {
                let mut searches = 0usize;
                while !stop.load(Ordering::Acquire) {
                    let query = queries[searches % queries.len()].clone();
                    let response = service
                        .search(query, 20, &Filter::All, Some(5_000))
                        .expect("search during rebuild");

                    assert_eq!(response.hits.len(), 20);
                    let distinct: HashSet<_> = response.ids().into_iter().collect();
                    assert_eq!(distinct.len(), 20);
                    for pair in response.hits.windows(2) {
                        assert!(pair[0].score >= pair[1].score);
                    }
                    searches += 1;
                }
                searches
            })
        })
        .collect();

    for (i, vector) in vectors.iter().enumerate().skip(100) {
        service
            .upsert(&video_id(i), vector.clone(), Metadata::new())
            .unwrap();
    }
    service.manager().wait_for_rebuild();
    stop.store(true, Ordering::Release);

    let searches: usize = readers.into_iter().map(|r| r.join().unwrap()).sum();
    assert!(searches > 0);

    let stats = service.stats();
    assert!(stats.rebuilds_completed >= 2, "{stats:?}");
    assert_eq!(stats.rebuilds_failed, 0);
    assert_eq!(stats.live_count, 600);

    let report = service.verify();
    assert!(report.is_consistent(), "{report:?}");
}

#[test]
fn test_deletes_are_visible_immediately_under_rebuilds() {
    let service = service(16);
    let vectors = random_vectors(300, DIMENSION, 8);
    load(&service, &vectors[..150]);
    service.rebuild().unwrap();

    // Writer keeps the delta churning so rebuilds run in the background
    let writer = {
        let service = Arc::clone(&service);
        let vectors = vectors.clone();
        thread::spawn(move || {
            for (i, vector) in vectors.iter().enumerate().skip(150) {
                service
                    .upsert(&video_id(i), vector.clone(), Metadata::new())
                    .unwrap();
            }
        })
    };

    for i in (0..150).step_by(3) {
        let id = video_id(i);
        assert!(service.delete(&id).unwrap());
        let response = service
            .search(vectors[i].clone(), 5, &Filter::All, Some(5_000))
            .unwrap();
        assert!(
            !response.ids().contains(&id.as_str()),
            "deleted {id} returned by generation {}",
            response.generation
        );
    }

    writer.join().unwrap();
    service.manager().wait_for_rebuild();

    for i in (0..150).step_by(3) {
        let response = service
            .search(vectors[i].clone(), 5, &Filter::All, Some(5_000))
            .unwrap();
        assert!(!response.ids().contains(&video_id(i).as_str()));
    }
    assert!(service.verify().is_consistent());
}

#[test]
fn test_readers_keep_retired_segments_alive() {
    let service = service(1024);
    load(&service, &random_vectors(64, DIMENSION, 2));
    service.rebuild().unwrap();

    let pinned = service.manager().view();
    service.rebuild().unwrap();
    assert_eq!(service.manager().retired_segments_alive(), 1);

    // The pinned view still answers from its own segment
    assert_eq!(pinned.live_count(), 64);
    drop(pinned);
    assert_eq!(service.manager().retired_segments_alive(), 0);
}

#[test]
fn test_delta_is_bounded_once_writers_stop() {
    let capacity = 16;
    let service = service(capacity);
    let vectors = Arc::new(random_vectors(800, DIMENSION, 21));
    load(&service, &vectors[..50]);
    service.rebuild().unwrap();

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let service = Arc::clone(&service);
            let vectors = Arc::clone(&vectors);
            thread::spawn(move || {
                for i in (50 + w..vectors.len()).step_by(4) {
                    service
                        .upsert(&video_id(i), vectors[i].clone(), Metadata::new())
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    service.manager().wait_for_rebuild();

    let stats = service.stats();
    assert!(stats.delta_size < capacity, "{stats:?}");
    assert!(!stats.rebuilding);
    assert_eq!(stats.live_count, 800);
    assert!(service.verify().is_consistent());
}

#[test]
fn test_late_index_update_does_not_resurrect_deleted_video() {
    let service = service(1024);
    let vectors = random_vectors(40, DIMENSION, 13);
    load(&service, &vectors);
    service.rebuild().unwrap();

    // A writer stored a new version but has not reached the index yet
    let id = VideoId::new(video_id(7)).unwrap();
    let late = service
        .store()
        .put(id.clone(), vectors[0].clone(), Metadata::new())
        .unwrap();

    // Meanwhile the video is deleted and a rebuild absorbs the deletion
    let sequence = service.store().remove(&id).unwrap().unwrap();
    service.manager().delete(&id, sequence);
    service.rebuild().unwrap();

    assert!(!service.manager().upsert(late));

    let response = service
        .search(vectors[0].clone(), 10, &Filter::All, Some(5_000))
        .unwrap();
    assert!(!response.ids().contains(&id.as_str()));
    let report = service.verify();
    assert!(report.is_consistent(), "{report:?}");
}
