//! Embedding-backed assessment recommendation.
//!
//! This module provides local semantic retrieval over the assessment catalog
//! using fastembed-rs for embeddings and exhaustive dot-product ranking.
//!
//! # Architecture
//!
//! - `embeddings`: `Vectorizer` trait and the fastembed implementation
//! - `preprocess`: composite catalog text, query augmentation, normalization
//! - `index`: row-aligned embedding matrix with stable top-k ranking
//! - `storage`: vectors.bin + metadata.json persistence
//! - `cache`: build-once embedding cache
//! - `engine`: the `recommend` façade

pub mod cache;
pub mod embeddings;
pub mod engine;
mod error;
pub mod index;
pub mod preprocess;
pub mod storage;

pub use cache::{CacheOrigin, CacheStatus};
pub use embeddings::{EmbeddingError, EmbeddingModel, Vectorizer};
pub use engine::{
    clamp_top_k, write_csv, EngineOptions, RecommendOptions, Recommendation,
    RecommendationEngine, SortOrder,
};
pub use error::RecommenderError;
pub use preprocess::DEFAULT_QUERY_AUGMENTATION;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";
