//! Build-once embedding cache for the catalog.
//!
//! Loads `vectors.bin` + `metadata.json` when they exist and still match the
//! catalog, otherwise embeds every catalog record and persists the result.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;

use crate::catalog::CatalogRecord;
use crate::recommender::embeddings::Vectorizer;
use crate::recommender::error::RecommenderError;
use crate::recommender::index::EmbeddingMatrix;
use crate::recommender::preprocess::composite_text;
use crate::recommender::storage::{describe, RecordMeta, VectorStorage, VectorStorageError};

/// Where the cached vectors came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOrigin {
    Loaded,
    Built,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub origin: CacheOrigin,
    pub rows: usize,
    /// False when the last build could not be written to disk.
    pub persisted: bool,
    pub persist_error: Option<String>,
}

/// Embedding matrix plus the row-aligned metadata used to render results.
pub struct EmbeddingCache {
    matrix: EmbeddingMatrix,
    metadata: Vec<RecordMeta>,
    status: CacheStatus,
}

impl EmbeddingCache {
    /// Load the persisted cache if it is valid for `catalog`, else build it.
    pub fn get_or_build(
        catalog: &[CatalogRecord],
        vectorizer: &dyn Vectorizer,
        storage: &VectorStorage,
        batch_size: usize,
    ) -> Result<Self, RecommenderError> {
        if storage.exists() {
            match storage.load(&vectorizer.model_id_hash(), vectorizer.dimensions()) {
                Ok((matrix, metadata)) => match check_alignment(catalog, &metadata) {
                    Ok(()) => {
                        log::info!("Loaded {} catalog vectors from storage", matrix.len());
                        let status = CacheStatus {
                            origin: CacheOrigin::Loaded,
                            rows: matrix.len(),
                            persisted: true,
                            persist_error: None,
                        };
                        return Ok(Self {
                            matrix,
                            metadata,
                            status,
                        });
                    }
                    Err(reason) => {
                        log::warn!("Embedding cache is stale ({}), rebuilding", reason);
                    }
                },
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Model changed, rebuilding embedding cache");
                }
                Err(e) => {
                    log::warn!("Failed to load embedding cache: {}, rebuilding", e);
                }
            }
        } else {
            log::info!("No embedding cache at {}, building", describe(storage.dir()));
        }

        Self::build(catalog, vectorizer, storage, batch_size)
    }

    /// Embed every catalog record and persist the result.
    ///
    /// An embedding failure aborts the whole build. A persistence failure is
    /// logged and the in-memory cache is returned anyway.
    pub fn build(
        catalog: &[CatalogRecord],
        vectorizer: &dyn Vectorizer,
        storage: &VectorStorage,
        batch_size: usize,
    ) -> Result<Self, RecommenderError> {
        let texts: Vec<String> = catalog.iter().map(composite_text).collect();
        let mut matrix = EmbeddingMatrix::with_capacity(vectorizer.dimensions(), texts.len());

        let progress = progress_bar(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            let embeddings = vectorizer
                .embed_many(chunk)
                .map_err(|e| RecommenderError::CacheBuild(e.to_string()))?;

            if embeddings.len() != chunk.len() {
                return Err(RecommenderError::CacheBuild(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    embeddings.len()
                )));
            }

            for embedding in embeddings {
                matrix
                    .push(embedding)
                    .map_err(|e| RecommenderError::CacheBuild(e.to_string()))?;
            }
            progress.inc(chunk.len() as u64);
        }
        progress.finish_and_clear();

        let metadata: Vec<RecordMeta> = catalog.iter().map(RecordMeta::from).collect();

        let persist_result = storage
            .save(
                &matrix,
                &metadata,
                vectorizer.name(),
                &vectorizer.model_id_hash(),
            )
            .map_err(RecommenderError::CachePersist);

        let persist_error = match persist_result {
            Ok(()) => {
                log::info!(
                    "Embedded {} catalog records into {}",
                    matrix.len(),
                    describe(storage.dir())
                );
                None
            }
            Err(e) => {
                log::warn!("{}; serving from memory until next start", e);
                Some(e.to_string())
            }
        };

        let status = CacheStatus {
            origin: CacheOrigin::Built,
            rows: matrix.len(),
            persisted: persist_error.is_none(),
            persist_error,
        };

        Ok(Self {
            matrix,
            metadata,
            status,
        })
    }

    pub fn matrix(&self) -> &EmbeddingMatrix {
        &self.matrix
    }

    pub fn metadata(&self) -> &[RecordMeta] {
        &self.metadata
    }

    pub fn status(&self) -> &CacheStatus {
        &self.status
    }
}

/// Persisted metadata must list the catalog's urls in catalog order.
fn check_alignment(catalog: &[CatalogRecord], metadata: &[RecordMeta]) -> Result<(), String> {
    if catalog.len() != metadata.len() {
        return Err(format!(
            "{} cached rows for {} catalog records",
            metadata.len(),
            catalog.len()
        ));
    }

    match catalog
        .iter()
        .zip(metadata)
        .position(|(record, meta)| record.url != meta.url)
    {
        Some(row) => Err(format!("row {} points at a different url", row)),
        None => Ok(()),
    }
}

fn progress_bar(len: usize) -> ProgressBar {
    let progress = ProgressBar::with_draw_target(Some(len as u64), ProgressDrawTarget::stderr());
    if let Ok(style) =
        ProgressStyle::with_template("embedding catalog {bar:40} {pos}/{len} [{elapsed_precise}]")
    {
        progress.set_style(style);
    }
    progress
}
