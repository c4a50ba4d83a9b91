//! Recommendation engine façade.
//!
//! Owns the catalog, the vectorizer and the embedding cache and answers
//! `recommend` calls:
//! - blank queries return no results
//! - the augmented query is embedded and ranked against every catalog row
//! - score and category filters run on the ranked top-k, never before it
//! - an optional sort reorders the filtered list

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogError, CatalogRecord, CatalogStore};
use crate::config::Config;
use crate::recommender::cache::{CacheOrigin, CacheStatus, EmbeddingCache};
use crate::recommender::embeddings::{EmbeddingModel, Vectorizer};
use crate::recommender::error::RecommenderError;
use crate::recommender::preprocess::{augment_query, DEFAULT_QUERY_AUGMENTATION};
use crate::recommender::storage::{RecordMeta, VectorStorage};

static SHARED_ENGINE: OnceCell<Arc<RecommendationEngine>> = OnceCell::new();

/// Engine settings that are not part of the catalog or model.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub query_augmentation: String,
    pub batch_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            query_augmentation: DEFAULT_QUERY_AUGMENTATION.to_string(),
            batch_size: 16,
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            query_augmentation: config.query_augmentation.clone(),
            batch_size: config.batch_size,
        }
    }
}

/// Final ordering of the filtered results.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Keep the ranking order
    #[default]
    Score,
    /// Alphabetical by assessment name
    Name,
    /// Alphabetical by test type
    Category,
}

impl SortOrder {
    /// Stable reorder, equal keys keep their ranking order.
    fn apply(self, results: &mut [Recommendation]) {
        match self {
            SortOrder::Score => {}
            SortOrder::Name => {
                results.sort_by_cached_key(|r| r.assessment_name.to_lowercase());
            }
            SortOrder::Category => {
                // records without a test type go last
                results.sort_by_cached_key(|r| {
                    (
                        r.test_type.is_none(),
                        r.test_type.as_deref().unwrap_or_default().to_lowercase(),
                    )
                });
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecommendOptions {
    /// Size of the ranked set, before filters
    pub top_k: usize,
    /// Minimum score kept, `None` keeps everything
    pub min_score: Option<f32>,
    /// Test types kept (case-insensitive), empty keeps everything
    pub types: Vec<String>,
    pub sort: SortOrder,
}

impl RecommendOptions {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            ..Default::default()
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

/// Negative sizes from untrusted input become 0.
pub fn clamp_top_k(top_k: i64) -> usize {
    usize::try_from(top_k.max(0)).unwrap_or(usize::MAX)
}

/// A recommended assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub assessment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
    pub url: String,
    pub score: f32,
}

impl Recommendation {
    fn new(meta: &RecordMeta, score: f32) -> Self {
        Self {
            assessment_name: meta.assessment_name.clone(),
            description: meta.description.clone(),
            test_type: meta.test_type.clone(),
            url: meta.url.clone(),
            score,
        }
    }
}

/// Write results as CSV with a fixed header.
pub fn write_csv<W: Write>(writer: W, results: &[Recommendation]) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(["rank", "assessment_name", "description", "test_type", "url", "score"])?;
    for (rank, r) in results.iter().enumerate() {
        writer.write_record([
            (rank + 1).to_string(),
            r.assessment_name.clone(),
            r.description.clone().unwrap_or_default(),
            r.test_type.clone().unwrap_or_default(),
            r.url.clone(),
            format!("{:.4}", r.score),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Catalog recommendation engine.
///
/// Construct once and reuse. `shared` provides a process-wide instance.
pub struct RecommendationEngine {
    catalog: Vec<CatalogRecord>,
    vectorizer: Arc<dyn Vectorizer>,
    storage: VectorStorage,
    cache: RwLock<EmbeddingCache>,
    /// Held for the whole embed -> persist -> swap of a rebuild
    build_lock: Mutex<()>,
    options: EngineOptions,
}

impl RecommendationEngine {
    /// Load the catalog, initialize the configured model and get or build
    /// the embedding cache.
    pub fn open(config: &Config) -> Result<Self, RecommenderError> {
        let catalog = CatalogStore::new(config.catalog_path()).load()?;

        log::info!(
            "Initializing recommendation engine with model '{}'",
            config.model
        );
        let model = EmbeddingModel::new(&config.model, config.cache_dir())
            .map_err(RecommenderError::ModelLoad)?;

        Self::with_vectorizer(
            catalog,
            Arc::new(model),
            config.cache_dir(),
            EngineOptions::from(config),
        )
    }

    /// The process-wide engine, built from `config` on first call.
    ///
    /// Later calls return the same instance and ignore `config`. A failed
    /// construction is not cached, the next call tries again.
    pub fn shared(config: &Config) -> Result<Arc<Self>, RecommenderError> {
        SHARED_ENGINE
            .get_or_try_init(|| Self::open(config).map(Arc::new))
            .cloned()
    }

    pub fn with_vectorizer(
        catalog: Vec<CatalogRecord>,
        vectorizer: Arc<dyn Vectorizer>,
        cache_dir: PathBuf,
        options: EngineOptions,
    ) -> Result<Self, RecommenderError> {
        if catalog.is_empty() {
            return Err(CatalogError::Empty { skipped: 0 }.into());
        }

        let storage = VectorStorage::new(cache_dir);
        let cache = EmbeddingCache::get_or_build(
            &catalog,
            vectorizer.as_ref(),
            &storage,
            options.batch_size,
        )?;

        Ok(Self {
            catalog,
            vectorizer,
            storage,
            cache: RwLock::new(cache),
            build_lock: Mutex::new(()),
            options,
        })
    }

    /// Top `top_k` catalog items for `query`, best first.
    pub fn recommend(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Recommendation>, RecommenderError> {
        self.recommend_with(query, &RecommendOptions::new(top_k))
    }

    pub fn recommend_with(
        &self,
        query: &str,
        options: &RecommendOptions,
    ) -> Result<Vec<Recommendation>, RecommenderError> {
        let Some(text) = augment_query(query, &self.options.query_augmentation) else {
            return Ok(vec![]);
        };

        let query_embedding = self
            .vectorizer
            .embed(&text)
            .map_err(RecommenderError::QueryEmbedding)?;

        let cache = self
            .cache
            .read()
            .map_err(|e| RecommenderError::Internal(format!("Lock poisoned: {}", e)))?;

        let ranked = cache.matrix().rank(&query_embedding, options.top_k)?;

        let min_score = options.min_score.unwrap_or(f32::NEG_INFINITY);
        let types: HashSet<String> = options
            .types
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let mut results: Vec<Recommendation> = ranked
            .into_iter()
            .filter(|row| row.score >= min_score)
            .filter_map(|row| {
                cache
                    .metadata()
                    .get(row.index)
                    .map(|meta| Recommendation::new(meta, row.score))
            })
            .filter(|r| {
                types.is_empty()
                    || r.test_type
                        .as_deref()
                        .is_some_and(|t| types.contains(&t.trim().to_lowercase()))
            })
            .collect();

        options.sort.apply(&mut results);

        log::debug!("query {:?} -> {} results", query, results.len());
        Ok(results)
    }

    /// Re-embed the whole catalog, ignoring persisted artifacts.
    ///
    /// Concurrent rebuilds run one after the other. Queries keep reading the
    /// previous cache until the new one is swapped in.
    pub fn rebuild(&self) -> Result<CacheStatus, RecommenderError> {
        let _building = self
            .build_lock
            .lock()
            .map_err(|e| RecommenderError::Internal(format!("Lock poisoned: {}", e)))?;

        let fresh = EmbeddingCache::build(
            &self.catalog,
            self.vectorizer.as_ref(),
            &self.storage,
            self.options.batch_size,
        )?;
        let status = fresh.status().clone();

        let mut cache = self
            .cache
            .write()
            .map_err(|e| RecommenderError::Internal(format!("Lock poisoned: {}", e)))?;
        *cache = fresh;

        Ok(status)
    }

    /// Cache status after making sure the vectors are current.
    ///
    /// With `force`, a cache that was loaded from disk is re-embedded. A cache
    /// built while opening this engine is already fresh and is kept.
    pub fn reindex(&self, force: bool) -> Result<CacheStatus, RecommenderError> {
        let status = self.cache_status()?;
        if force && status.origin == CacheOrigin::Loaded {
            self.rebuild()
        } else {
            Ok(status)
        }
    }

    pub fn catalog(&self) -> &[CatalogRecord] {
        &self.catalog
    }

    pub fn model_name(&self) -> &str {
        self.vectorizer.name()
    }

    pub fn cache_status(&self) -> Result<CacheStatus, RecommenderError> {
        self.cache
            .read()
            .map(|cache| cache.status().clone())
            .map_err(|e| RecommenderError::Internal(format!("Lock poisoned: {}", e)))
    }
}
