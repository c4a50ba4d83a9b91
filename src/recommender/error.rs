use crate::catalog::CatalogError;
use crate::recommender::embeddings::EmbeddingError;
use crate::recommender::index::IndexError;
use crate::recommender::storage::VectorStorageError;

/// Errors surfaced by the recommendation engine.
///
/// `CatalogLoad`, `ModelLoad` and `CacheBuild` abort engine construction.
/// `CachePersist` is only reported through logs and `CacheStatus`, the
/// engine keeps serving from memory.
#[derive(Debug, thiserror::Error)]
pub enum RecommenderError {
    #[error("catalog load failed: {0}")]
    CatalogLoad(#[from] CatalogError),

    #[error("embedding model unavailable: {0}")]
    ModelLoad(#[source] EmbeddingError),

    #[error("embedding cache build failed: {0}")]
    CacheBuild(String),

    #[error("embedding cache could not be persisted: {0}")]
    CachePersist(#[from] VectorStorageError),

    #[error("query embedding failed: {0}")]
    QueryEmbedding(#[source] EmbeddingError),

    #[error("ranking failed: {0}")]
    Ranking(#[from] IndexError),

    #[error("internal error: {0}")]
    Internal(String),
}
