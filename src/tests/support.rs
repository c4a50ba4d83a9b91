//! Shared fixtures: a deterministic in-process vectorizer and catalog
//! builders, so tests never download a model.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::CatalogRecord;
use crate::recommender::embeddings::{EmbeddingError, Vectorizer};
use crate::recommender::preprocess::{augment_query, composite_text, l2_normalize};
use crate::recommender::{
    EngineOptions, RecommendationEngine, RecommenderError, DEFAULT_QUERY_AUGMENTATION,
};

pub const FAKE_DIMENSIONS: usize = 32;

/// Hashed bag-of-words embeddings with optional pinned vectors.
///
/// Every component is non-negative, so scores fall in [0, 1].
pub struct FakeVectorizer {
    name: String,
    dimensions: usize,
    pinned: HashMap<String, Vec<f32>>,
    failing: AtomicBool,
    batch_delay: Option<Duration>,
    embed_calls: AtomicUsize,
    embed_many_calls: AtomicUsize,
    batches_in_flight: AtomicUsize,
    peak_batches_in_flight: AtomicUsize,
}

impl FakeVectorizer {
    pub fn new() -> Self {
        Self::with_dimensions(FAKE_DIMENSIONS)
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            name: "fake-model".to_string(),
            dimensions,
            pinned: HashMap::new(),
            failing: AtomicBool::new(false),
            batch_delay: None,
            embed_calls: AtomicUsize::new(0),
            embed_many_calls: AtomicUsize::new(0),
            batches_in_flight: AtomicUsize::new(0),
            peak_batches_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sleep inside every `embed_many` call.
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = Some(delay);
        self
    }

    /// Return `vector` (normalized) whenever exactly `text` is embedded.
    pub fn pin(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimensions);
        self.pinned.insert(text.into(), vector);
        self
    }

    /// Pin the vector of a catalog record's composite text.
    pub fn pin_record(self, record: &CatalogRecord, vector: Vec<f32>) -> Self {
        self.pin(composite_text(record), vector)
    }

    /// Pin the vector of a raw query, after augmentation.
    pub fn pin_query(self, query: &str, vector: Vec<f32>) -> Self {
        let text = augment_query(query, DEFAULT_QUERY_AUGMENTATION).expect("blank query");
        self.pin(text, vector)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    pub fn embed_many_calls(&self) -> usize {
        self.embed_many_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `embed_many` calls seen running at once.
    pub fn peak_batches_in_flight(&self) -> usize {
        self.peak_batches_in_flight.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::EmbeddingFailed("fake failure".to_string()));
        }

        let mut vector = match self.pinned.get(text) {
            Some(vector) => vector.clone(),
            None => {
                let mut vector = vec![0.0; self.dimensions];
                for token in text
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    let bucket = fnv1a(&token.to_lowercase()) as usize % self.dimensions;
                    vector[bucket] += 1.0;
                }
                vector
            }
        };

        if !l2_normalize(&mut vector) {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "no tokens in {text:?}"
            )));
        }
        Ok(vector)
    }
}

impl Vectorizer for FakeVectorizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.vectorize(text)
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_many_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.batches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_batches_in_flight
            .fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.batch_delay {
            std::thread::sleep(delay);
        }
        let result = texts.iter().map(|text| self.vectorize(text)).collect();

        self.batches_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf29ce484222325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x100000001b3)
    })
}

/// Unit vector along `axis`.
pub fn axis(dimensions: usize, axis: usize) -> Vec<f32> {
    let mut vector = vec![0.0; dimensions];
    vector[axis] = 1.0;
    vector
}

/// Unit vector in the first two dimensions whose dot product with
/// `axis(_, 0)` is `score`.
pub fn with_score(dimensions: usize, score: f32) -> Vec<f32> {
    let mut vector = vec![0.0; dimensions];
    vector[0] = score;
    vector[1] = (1.0 - score * score).max(0.0).sqrt();
    vector
}

pub fn record(slug: &str, name: &str, test_type: &str, description: &str) -> CatalogRecord {
    CatalogRecord::new(name, format!("https://www.shl.com/products/assessments/{slug}/"))
        .with_test_type(test_type)
        .with_description(description)
}

pub fn sample_catalog() -> Vec<CatalogRecord> {
    vec![
        record(
            "verify-numerical",
            "Verify Numerical",
            "Ability",
            "numerical reasoning with charts and tables",
        ),
        record(
            "verify-verbal",
            "Verify Verbal",
            "Ability",
            "verbal reasoning and reading comprehension",
        ),
        record(
            "opq32r",
            "OPQ32r",
            "Personality",
            "occupational personality questionnaire",
        ),
        record(
            "java-8-new",
            "Java 8",
            "Knowledge",
            "java programming collections and streams",
        ),
        record(
            "situational-judgement",
            "Situational Judgement",
            "Behavior",
            "customer service scenarios and decisions",
        ),
        record(
            "motivational-questionnaire",
            "Motivational Questionnaire",
            "Personality",
            "what drives and energizes people at work",
        ),
    ]
}

pub fn open_engine(
    catalog: Vec<CatalogRecord>,
    vectorizer: &Arc<FakeVectorizer>,
    cache_dir: &Path,
) -> Result<RecommendationEngine, RecommenderError> {
    RecommendationEngine::with_vectorizer(
        catalog,
        vectorizer.clone(),
        cache_dir.to_path_buf(),
        EngineOptions {
            batch_size: 4,
            ..Default::default()
        },
    )
}
