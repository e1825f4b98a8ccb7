//! Ranking, visibility and filtering behavior through the public service API.

use std::collections::{HashMap, HashSet};

use vidsearch::{Filter, Metadata, Metric, SearchError, SearchRequest};

use crate::common::{in_memory, load, meta, random_vectors, settings, video_id};

fn assert_ranked(scores: &[f32]) {
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1], "scores not sorted: {scores:?}");
    }
}

#[test]
fn test_reference_corpus_before_and_after_rebuild() {
    let service = in_memory(settings(2, 4));
    service.upsert("A", vec![1.0, 0.0], Metadata::new()).unwrap();
    service.upsert("B", vec![0.0, 1.0], Metadata::new()).unwrap();
    service.upsert("C", vec![0.9, 0.1], Metadata::new()).unwrap();

    for rebuild in [false, true] {
        if rebuild {
            service.rebuild().unwrap();
        }
        let response = service.search(vec![1.0, 0.0], 2, &Filter::All, None).unwrap();
        assert_eq!(response.ids(), vec!["A", "C"]);
        assert!((response.hits[0].score - 1.0).abs() < 1e-6);
        assert!((response.hits[1].score - 0.994).abs() < 1e-3);
    }

    assert!(service.delete("A").unwrap());
    let response = service.search(vec![1.0, 0.0], 2, &Filter::All, None).unwrap();
    assert_eq!(response.ids(), vec!["C", "B"]);
    assert!(response.hits[1].score.abs() < 1e-6);
}

#[test]
fn test_returns_exactly_k_distinct_ranked_ids() {
    let service = in_memory(settings(16, 8));
    let vectors = random_vectors(300, 16, 7);
    load(&service, &vectors[..200]);
    service.rebuild().unwrap();
    // The rest stays in the delta buffer
    for (i, vector) in vectors.iter().enumerate().skip(200) {
        service.upsert(&video_id(i), vector.clone(), Metadata::new()).unwrap();
    }

    for query in random_vectors(20, 16, 99) {
        let response = service.search(query, 25, &Filter::All, None).unwrap();
        assert_eq!(response.hits.len(), 25);
        let distinct: HashSet<_> = response.ids().into_iter().collect();
        assert_eq!(distinct.len(), 25);
        let scores: Vec<f32> = response.hits.iter().map(|h| h.score).collect();
        assert_ranked(&scores);
    }
}

#[test]
fn test_reupsert_moves_the_video() {
    let service = in_memory(settings(2, 2));
    service.upsert("A", vec![1.0, 0.0], Metadata::new()).unwrap();
    service.upsert("B", vec![0.0, 1.0], Metadata::new()).unwrap();
    service.rebuild().unwrap();

    service.upsert("A", vec![0.0, 1.0], Metadata::new()).unwrap();
    let response = service.search(vec![1.0, 0.0], 2, &Filter::All, None).unwrap();
    assert_eq!(response.hits.len(), 2);
    assert!(response.hits.iter().all(|h| h.score.abs() < 1e-6));

    let response = service.search(vec![0.0, 1.0], 1, &Filter::All, None).unwrap();
    assert!((response.hits[0].score - 1.0).abs() < 1e-6);
}

#[test]
fn test_same_vector_twice_keeps_ranking() {
    let service = in_memory(settings(2, 2));
    service.upsert("A", vec![1.0, 0.0], Metadata::new()).unwrap();
    service.upsert("C", vec![0.9, 0.1], Metadata::new()).unwrap();
    service.rebuild().unwrap();
    let before = service.search(vec![1.0, 0.0], 2, &Filter::All, None).unwrap();

    let v1 = before.hits[0].version;
    let v2 = service.upsert("A", vec![1.0, 0.0], Metadata::new()).unwrap();
    assert!(v2 > v1);

    let after = service.search(vec![1.0, 0.0], 2, &Filter::All, None).unwrap();
    assert_eq!(before.ids(), after.ids());
    assert_eq!(after.hits[0].version, v2);
}

#[test]
fn test_deleted_ids_stay_hidden_until_reupserted() {
    let service = in_memory(settings(8, 4));
    let vectors = random_vectors(50, 8, 3);
    load(&service, &vectors);
    service.rebuild().unwrap();

    let target = video_id(10);
    assert!(service.delete(&target).unwrap());

    let response = service
        .search(vectors[10].clone(), 50, &Filter::All, None)
        .unwrap();
    assert_eq!(response.hits.len(), 49);
    assert!(!response.ids().contains(&target.as_str()));

    service.rebuild().unwrap();
    let response = service
        .search(vectors[10].clone(), 50, &Filter::All, None)
        .unwrap();
    assert!(!response.ids().contains(&target.as_str()));

    service
        .upsert(&target, vectors[10].clone(), Metadata::new())
        .unwrap();
    let response = service
        .search(vectors[10].clone(), 1, &Filter::All, None)
        .unwrap();
    assert_eq!(response.ids(), vec![target.as_str()]);
}

#[test]
fn test_metadata_filters() {
    let service = in_memory(settings(2, 2));
    service
        .upsert("nasa1", vec![1.0, 0.0], meta(&[("channel_title", "NASA"), ("lang", "en")]))
        .unwrap();
    service
        .upsert("esa1", vec![1.0, 0.1], meta(&[("channel_title", "ESA"), ("lang", "fr")]))
        .unwrap();
    service
        .upsert("nasa2", vec![0.0, 1.0], meta(&[("channel_title", "NASA")]))
        .unwrap();
    service.rebuild().unwrap();

    let pairs = HashMap::from([("channel_title".to_string(), "NASA".to_string())]);
    let request = SearchRequest::new(vec![1.0, 0.0], 10).with_filter_pairs(&pairs);
    assert_eq!(service.execute(&request).unwrap().ids(), vec!["nasa1", "nasa2"]);

    let filter = Filter::not(Filter::exists("lang"));
    let response = service.search(vec![1.0, 0.0], 10, &filter, None).unwrap();
    assert_eq!(response.ids(), vec!["nasa2"]);

    let none = Filter::eq("channel_title", "JAXA");
    let response = service.search(vec![1.0, 0.0], 10, &none, None).unwrap();
    assert!(response.hits.is_empty());
}

#[test]
fn test_l2_metric_scores() {
    let mut config = settings(2, 2);
    config.index.metric = Metric::L2;
    let service = in_memory(config);
    service.upsert("near", vec![1.0, 1.0], Metadata::new()).unwrap();
    service.upsert("far", vec![4.0, 5.0], Metadata::new()).unwrap();
    service.rebuild().unwrap();

    let response = service.search(vec![1.0, 2.0], 2, &Filter::All, None).unwrap();
    assert_eq!(response.ids(), vec!["near", "far"]);
    // squared distances 1 and 18
    assert!((response.hits[0].score - 0.5).abs() < 1e-6);
    assert!((response.hits[1].score - 1.0 / 19.0).abs() < 1e-6);
}

#[test]
fn test_request_validation() {
    let service = in_memory(settings(2, 2));
    service.upsert("A", vec![1.0, 0.0], Metadata::new()).unwrap();

    assert!(matches!(
        service.search(vec![1.0, 0.0], 0, &Filter::All, None),
        Err(SearchError::InvalidK { k: 0, .. })
    ));
    assert!(matches!(
        service.search(vec![1.0, 0.0, 0.0], 1, &Filter::All, None),
        Err(SearchError::DimensionMismatch { .. })
    ));
    assert!(matches!(
        service.search(vec![f32::INFINITY, 0.0], 1, &Filter::All, None),
        Err(SearchError::InvalidQuery { .. })
    ));

    let error = service
        .search(vec![1.0, 0.0], 1000, &Filter::All, None)
        .unwrap_err();
    assert!(error.is_client_error());
}
