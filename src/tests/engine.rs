use std::sync::Arc;
use std::time::Duration;

use crate::recommender::embeddings::Vectorizer;
use crate::recommender::preprocess::l2_norm;
use crate::recommender::storage::VectorStorage;
use crate::recommender::{
    CacheOrigin, RecommendOptions, RecommenderError, SortOrder,
};
use crate::tests::support::{
    axis, open_engine, record, sample_catalog, with_score, FakeVectorizer, FAKE_DIMENSIONS,
};

/// Eight records whose scores against the pinned query are 0.9, 0.8 ... 0.2,
/// stored out of score order.
fn graded_fixture() -> (Vec<crate::catalog::CatalogRecord>, FakeVectorizer) {
    let scores = [0.5, 0.9, 0.2, 0.7, 0.4, 0.8, 0.3, 0.6];
    let catalog: Vec<_> = scores
        .iter()
        .enumerate()
        .map(|(idx, _)| record(&format!("graded-{idx}"), &format!("Graded {idx}"), "Ability", ""))
        .collect();

    let mut fake = FakeVectorizer::new().pin_query("graded", axis(FAKE_DIMENSIONS, 0));
    for (record, score) in catalog.iter().zip(scores) {
        fake = fake.pin_record(record, with_score(FAKE_DIMENSIONS, score));
    }
    (catalog, fake)
}

#[test]
fn test_cache_rows_follow_catalog_order() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = sample_catalog();
    let fake = Arc::new(FakeVectorizer::new());
    open_engine(catalog.clone(), &fake, tmp.path()).unwrap();

    let (matrix, metadata) = VectorStorage::new(tmp.path().to_path_buf())
        .load(&fake.model_id_hash(), fake.dimensions())
        .unwrap();

    assert_eq!(matrix.len(), catalog.len());
    for (meta, record) in metadata.iter().zip(&catalog) {
        assert_eq!(meta.url, record.url);
        assert_eq!(meta.assessment_name, record.assessment_name);
    }
    for row in matrix.rows() {
        assert!((l2_norm(row) - 1.0).abs() < 1e-5);
    }
}

#[test]
fn test_query_matching_a_record_ranks_it_first() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog = sample_catalog();
    let target = &catalog[3];
    let fake = Arc::new(
        FakeVectorizer::new()
            .pin_record(&catalog[0], axis(FAKE_DIMENSIONS, 0))
            .pin_record(&catalog[1], axis(FAKE_DIMENSIONS, 1))
            .pin_record(&catalog[2], axis(FAKE_DIMENSIONS, 2))
            .pin_record(target, axis(FAKE_DIMENSIONS, 3))
            .pin_record(&catalog[4], axis(FAKE_DIMENSIONS, 4))
            .pin_record(&catalog[5], axis(FAKE_DIMENSIONS, 5))
            .pin_query("java streams", axis(FAKE_DIMENSIONS, 3)),
    );
    let engine = open_engine(catalog.clone(), &fake, tmp.path()).unwrap();

    let results = engine.recommend("java streams", 3).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].url, target.url);
    assert_eq!(results[0].assessment_name, target.assessment_name);
    assert_eq!(results[0].test_type.as_deref(), Some("Knowledge"));
    assert!((results[0].score - 1.0).abs() < 1e-5);
    assert!(results[1].score.abs() < 1e-5);
}

#[test]
fn test_scores_are_non_increasing() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let results = engine.recommend("personality questionnaire at work", 6).unwrap();
    assert_eq!(results.len(), 6);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for r in &results {
        assert!(r.score <= 1.0 + 1e-5);
    }
}

#[test]
fn test_recommend_is_deterministic() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let first = engine.recommend("numerical reasoning", 4).unwrap();
    let second = engine.recommend("numerical reasoning", 4).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_top_k_bounds() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    assert!(engine.recommend("numerical", 0).unwrap().is_empty());
    assert_eq!(engine.recommend("numerical", 100).unwrap().len(), 6);
}

#[test]
fn test_blank_query_skips_embedding() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    assert!(engine.recommend("", 5).unwrap().is_empty());
    assert!(engine.recommend("   \t", 5).unwrap().is_empty());
    assert_eq!(fake.embed_calls(), 0);
}

#[test]
fn test_threshold_filters_after_truncation() {
    let tmp = tempfile::tempdir().unwrap();
    let (catalog, fake) = graded_fixture();
    let engine = open_engine(catalog, &Arc::new(fake), tmp.path()).unwrap();

    // five records clear 0.45, but only the top three are ranked
    let options = RecommendOptions::new(3).with_min_score(0.45);
    let results = engine.recommend_with("graded", &options).unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.assessment_name.as_str()).collect();
    assert_eq!(names, vec!["Graded 1", "Graded 5", "Graded 3"]);

    let options = RecommendOptions::new(8).with_min_score(0.45);
    let results = engine.recommend_with("graded", &options).unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.score >= 0.45));
}

#[test]
fn test_threshold_above_every_score() {
    let tmp = tempfile::tempdir().unwrap();
    let (catalog, fake) = graded_fixture();
    let engine = open_engine(catalog, &Arc::new(fake), tmp.path()).unwrap();

    let options = RecommendOptions::new(8).with_min_score(0.95);
    assert!(engine.recommend_with("graded", &options).unwrap().is_empty());
}

#[test]
fn test_ties_keep_catalog_order() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog: Vec<_> = (0..4)
        .map(|idx| record(&format!("tie-{idx}"), &format!("Tie {idx}"), "Ability", ""))
        .collect();
    let fake = Arc::new(
        FakeVectorizer::new()
            .pin_record(&catalog[0], with_score(FAKE_DIMENSIONS, 0.5))
            .pin_record(&catalog[1], with_score(FAKE_DIMENSIONS, 0.9))
            .pin_record(&catalog[2], with_score(FAKE_DIMENSIONS, 0.5))
            .pin_record(&catalog[3], with_score(FAKE_DIMENSIONS, 0.9))
            .pin_query("tie", axis(FAKE_DIMENSIONS, 0)),
    );
    let engine = open_engine(catalog, &fake, tmp.path()).unwrap();

    let results = engine.recommend("tie", 4).unwrap();
    let names: Vec<&str> = results.iter().map(|r| r.assessment_name.as_str()).collect();
    assert_eq!(names, vec!["Tie 1", "Tie 3", "Tie 0", "Tie 2"]);
}

#[test]
fn test_type_filter_and_sort() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let options = RecommendOptions::new(6)
        .with_types(["personality", "ABILITY"])
        .with_sort(SortOrder::Name);
    let results = engine.recommend_with("reasoning", &options).unwrap();

    let names: Vec<&str> = results.iter().map(|r| r.assessment_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Motivational Questionnaire",
            "OPQ32r",
            "Verify Numerical",
            "Verify Verbal"
        ]
    );
}

#[test]
fn test_second_engine_reuses_cache() {
    let tmp = tempfile::tempdir().unwrap();

    let first = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &first, tmp.path()).unwrap();
    assert!(first.embed_many_calls() > 0);
    assert_eq!(engine.cache_status().unwrap().origin, CacheOrigin::Built);
    let expected = engine.recommend("verbal reasoning", 3).unwrap();

    let second = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &second, tmp.path()).unwrap();
    assert_eq!(second.embed_many_calls(), 0);

    let status = engine.cache_status().unwrap();
    assert_eq!(status.origin, CacheOrigin::Loaded);
    assert_eq!(status.rows, 6);
    assert_eq!(engine.recommend("verbal reasoning", 3).unwrap(), expected);
}

#[test]
fn test_catalog_change_rebuilds_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let mut catalog = sample_catalog();
    catalog.push(record("coding-python", "Python Coding", "Knowledge", "python"));

    let fresh = Arc::new(FakeVectorizer::new());
    let engine = open_engine(catalog, &fresh, tmp.path()).unwrap();
    assert!(fresh.embed_many_calls() > 0);
    assert_eq!(engine.cache_status().unwrap().rows, 7);
}

#[test]
fn test_model_change_rebuilds_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let other = Arc::new(FakeVectorizer::new().named("other-model"));
    let engine = open_engine(sample_catalog(), &other, tmp.path()).unwrap();
    assert!(other.embed_many_calls() > 0);
    assert_eq!(engine.cache_status().unwrap().origin, CacheOrigin::Built);
}

#[test]
fn test_corrupt_cache_is_rebuilt() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    let storage = VectorStorage::new(tmp.path().to_path_buf());
    std::fs::write(storage.vectors_path(), b"garbage").unwrap();

    let fresh = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fresh, tmp.path()).unwrap();
    assert!(fresh.embed_many_calls() > 0);
    assert_eq!(engine.recommend("numerical", 2).unwrap().len(), 2);
}

#[test]
fn test_persist_failure_is_not_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"").unwrap();

    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, &blocker.join("cache")).unwrap();

    let status = engine.cache_status().unwrap();
    assert!(!status.persisted);
    assert!(status.persist_error.is_some());
    assert_eq!(engine.recommend("numerical", 3).unwrap().len(), 3);
}

#[test]
fn test_embedding_failure_aborts_build() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    fake.fail(true);

    let result = open_engine(sample_catalog(), &fake, tmp.path());
    assert!(matches!(result, Err(RecommenderError::CacheBuild(_))));
    assert!(!VectorStorage::new(tmp.path().to_path_buf()).exists());
}

#[test]
fn test_query_embedding_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();

    fake.fail(true);
    let result = engine.recommend("numerical", 3);
    assert!(matches!(result, Err(RecommenderError::QueryEmbedding(_))));
}

#[test]
fn test_empty_catalog_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());

    let result = open_engine(vec![], &fake, tmp.path());
    assert!(matches!(result, Err(RecommenderError::CatalogLoad(_))));
}

#[test]
fn test_rebuild_reembeds_catalog() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();
    let calls = fake.embed_many_calls();

    let status = engine.rebuild().unwrap();
    assert_eq!(status.origin, CacheOrigin::Built);
    assert!(status.persisted);
    assert_eq!(fake.embed_many_calls(), calls * 2);
}

#[test]
fn test_concurrent_queries() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new());
    let engine = Arc::new(open_engine(sample_catalog(), &fake, tmp.path()).unwrap());
    let expected = engine.recommend("verbal", 3).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.recommend("verbal", 3).unwrap())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_concurrent_rebuilds_do_not_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakeVectorizer::new().with_batch_delay(Duration::from_millis(30)));
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();
    let calls = fake.embed_many_calls();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| engine.rebuild().unwrap());
        let second = scope.spawn(|| engine.rebuild().unwrap());
        assert!(first.join().unwrap().persisted);
        assert!(second.join().unwrap().persisted);
    });

    assert_eq!(fake.peak_batches_in_flight(), 1);
    assert_eq!(fake.embed_many_calls(), calls * 3);
    assert_eq!(engine.recommend("verbal", 2).unwrap().len(), 2);
}

#[test]
fn test_unknown_model_fails_engine_open() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = crate::config::Config::load_with(tmp.path()).unwrap();
    config.model = "no-such-model".to_string();
    crate::catalog::write_catalog(&config.catalog_path(), &sample_catalog()).unwrap();

    let result = crate::recommender::RecommendationEngine::open(&config);
    assert!(matches!(
        result,
        Err(RecommenderError::ModelLoad(
            crate::recommender::EmbeddingError::InvalidModel(_)
        ))
    ));
}

#[test]
fn test_forced_reindex_embeds_once() {
    let tmp = tempfile::tempdir().unwrap();

    // nothing on disk: opening builds, forcing does not build again
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();
    let calls = fake.embed_many_calls();
    let status = engine.reindex(true).unwrap();
    assert_eq!(status.origin, CacheOrigin::Built);
    assert_eq!(fake.embed_many_calls(), calls);

    // loaded from disk: forcing re-embeds, not forcing keeps it
    let fake = Arc::new(FakeVectorizer::new());
    let engine = open_engine(sample_catalog(), &fake, tmp.path()).unwrap();
    assert_eq!(engine.reindex(false).unwrap().origin, CacheOrigin::Loaded);
    assert_eq!(fake.embed_many_calls(), 0);

    let status = engine.reindex(true).unwrap();
    assert_eq!(status.origin, CacheOrigin::Built);
    assert_eq!(fake.embed_many_calls(), calls);
}
