//! Embedding model wrapper for fastembed.
//!
//! Provides the `Vectorizer` abstraction used by the cache and the engine:
//! - Model initialization with configurable cache directory
//! - Single and batch embedding generation
//! - Unit-length output so that dot product equals cosine similarity

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::recommender::preprocess::l2_normalize;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Maps text into a fixed-dimension, unit-normalized vector space.
///
/// Implementations must be deterministic for a given model and input.
pub trait Vectorizer: Send + Sync {
    /// Model name, used to tag persisted vectors.
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed every text in one call. Either all texts are embedded or an
    /// error is returned.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Identifier stored alongside persisted vectors.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }
}

/// Compute SHA256 hash of a model name for storage identification.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::measure_dimensions(&mut model)?;
        log::debug!("model '{}' produces {}-dim embeddings", model_name, dimensions);

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(
        name: &str,
    ) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2)
            }
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15)
            }
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15)
            }
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            "bge-large-en-v1.5" | "bgelargeenv15" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15)
            }
            "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                Ok(fastembed::EmbeddingModel::BGELargeENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

    /// Embed a short text once to learn the output dimensions.
    fn measure_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to measure dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }

    fn normalized(mut embedding: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
        if !l2_normalize(&mut embedding) {
            return Err(EmbeddingError::EmbeddingFailed(
                "model returned a zero-norm embedding".to_string(),
            ));
        }
        Ok(embedding)
    }
}

impl Vectorizer for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))?;

        Self::normalized(embedding)
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, model returned {}",
                texts.len(),
                embeddings.len()
            )));
        }

        embeddings.into_iter().map(Self::normalized).collect()
    }
}
