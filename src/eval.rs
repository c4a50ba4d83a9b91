//! Batch predictions and offline evaluation against labelled queries.
//!
//! Urls are compared by slug: the last path segment, lowercased, with `-`
//! and `_` read as spaces. A prediction hits when either slug contains the
//! other.

use std::path::Path;

use serde::Serialize;

use crate::recommender::{RecommendationEngine, RecommenderError};
use crate::table::{cell, Table, TableError};

pub const DEFAULT_EVAL_K: usize = 10;
pub const DEFAULT_PREDICTION_TOP_K: usize = 1;

const PROGRESS_EVERY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{path} must contain a '{column}' column")]
    MissingColumn { path: String, column: &'static str },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Engine(#[from] RecommenderError),
}

/// One row of the predictions file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub query: String,
    pub recommended_assessment_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledQuery {
    pub query: String,
    pub assessment_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    pub k: usize,
    pub total: usize,
    /// Queries whose expected assessment exists in the catalog
    pub valid: usize,
    pub hits: usize,
}

impl EvaluationReport {
    /// Mean Recall@k over valid queries, 0 when there are none.
    pub fn recall(&self) -> f64 {
        if self.valid == 0 {
            0.0
        } else {
            self.hits as f64 / self.valid as f64
        }
    }
}

pub fn normalize_slug_text(text: &str) -> String {
    text.trim().to_lowercase().replace(['-', '_'], " ")
}

/// Last non-empty path segment of `url`, normalized.
pub fn extract_slug(url: &str) -> String {
    let segment = url
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    normalize_slug_text(segment)
}

pub fn slugs_overlap(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}

/// Read the non-empty values of the `query` column from a CSV file or
/// spreadsheet.
pub fn read_queries(path: &Path) -> Result<Vec<String>, EvalError> {
    let table = Table::read(path)?;
    let query_col = require(&table, path, "query")?;

    Ok(table
        .rows()
        .map(|row| cell(row, query_col))
        .filter(|query| !query.is_empty())
        .map(String::from)
        .collect())
}

/// Read `query` + `assessment_url` pairs. Rows with an empty query are
/// skipped.
pub fn read_labeled_queries(path: &Path) -> Result<Vec<LabeledQuery>, EvalError> {
    let table = Table::read(path)?;
    let query_col = require(&table, path, "query")?;
    let url_col = require(&table, path, "assessment_url")?;

    let mut labeled = vec![];
    for row in table.rows() {
        let query = cell(row, query_col);
        if query.is_empty() {
            continue;
        }
        labeled.push(LabeledQuery {
            query: query.to_string(),
            assessment_url: cell(row, url_col).to_string(),
        });
    }
    Ok(labeled)
}

/// Best url per query, empty when the engine returns nothing.
pub fn predict(
    engine: &RecommendationEngine,
    queries: &[String],
    top_k: usize,
) -> Result<Vec<Prediction>, EvalError> {
    queries
        .iter()
        .map(|query| {
            let results = engine.recommend(query, top_k)?;
            Ok(Prediction {
                query: query.clone(),
                recommended_assessment_url: results
                    .first()
                    .map(|r| r.url.clone())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<(), EvalError> {
    let mut writer = csv::Writer::from_path(path)?;
    for prediction in predictions {
        writer.serialize(prediction)?;
    }
    if predictions.is_empty() {
        writer.write_record(["query", "recommended_assessment_url"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Recall@k of `engine` over `dataset`.
///
/// Queries whose expected slug overlaps no catalog slug cannot be answered
/// and are excluded from the denominator.
pub fn evaluate(
    engine: &RecommendationEngine,
    dataset: &[LabeledQuery],
    k: usize,
) -> Result<EvaluationReport, EvalError> {
    let catalog_slugs: Vec<String> = engine
        .catalog()
        .iter()
        .map(|record| extract_slug(&record.url))
        .collect();

    let mut report = EvaluationReport {
        k,
        total: dataset.len(),
        valid: 0,
        hits: 0,
    };

    for (idx, item) in dataset.iter().enumerate() {
        let true_slug = extract_slug(&item.assessment_url);
        if true_slug.is_empty() || !catalog_slugs.iter().any(|s| slugs_overlap(&true_slug, s)) {
            log::debug!("skipping query {:?}: {} is not in the catalog", item.query, item.assessment_url);
            continue;
        }
        report.valid += 1;

        let results = engine.recommend(&item.query, k)?;
        if results
            .iter()
            .any(|r| slugs_overlap(&true_slug, &extract_slug(&r.url)))
        {
            report.hits += 1;
        }

        if (idx + 1) % PROGRESS_EVERY == 0 {
            log::info!("Processed {}/{}", idx + 1, report.total);
        }
    }

    Ok(report)
}

fn require(table: &Table, path: &Path, column: &'static str) -> Result<usize, EvalError> {
    table
        .column(column)
        .ok_or_else(|| EvalError::MissingColumn {
            path: path.display().to_string(),
            column,
        })
}
