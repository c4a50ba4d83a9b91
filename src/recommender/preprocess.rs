//! Text preparation for embedding generation.
//!
//! Catalog records are flattened into a labelled composite text, in this
//! order (empty fields are left out):
//! 1. Assessment Name
//! 2. Description
//! 3. Test Type
//! 4. Duration
//! 5. Remote Support
//! 6. Adaptive Support
//!
//! Queries are trimmed and suffixed with the configured augmentation.

use crate::catalog::{format_flag, CatalogRecord};

/// Default words appended to every query before embedding.
pub const DEFAULT_QUERY_AUGMENTATION: &str = "assessment test";

/// Build the text embedded for a catalog record.
pub fn composite_text(record: &CatalogRecord) -> String {
    let mut lines = vec![format!("Assessment Name: {}", record.assessment_name.trim())];

    let description = record.description.trim();
    if !description.is_empty() {
        lines.push(format!("Description: {}", description));
    }

    let test_type = record.test_type.trim();
    if !test_type.is_empty() {
        lines.push(format!("Test Type: {}", test_type));
    }

    if let Some(duration) = record.duration_minutes {
        lines.push(format!("Duration: {} minutes", duration));
    }

    if record.remote_support.is_some() {
        lines.push(format!("Remote Support: {}", format_flag(record.remote_support)));
    }

    if record.adaptive_support.is_some() {
        lines.push(format!(
            "Adaptive Support: {}",
            format_flag(record.adaptive_support)
        ));
    }

    lines.join("\n")
}

/// Append the augmentation words to a query.
///
/// Returns `None` for blank queries. An empty augmentation leaves the
/// trimmed query unchanged.
pub fn augment_query(query: &str, augmentation: &str) -> Option<String> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    let augmentation = augmentation.trim();
    if augmentation.is_empty() {
        Some(query.to_string())
    } else {
        Some(format!("{} {}", query, augmentation))
    }
}

/// Scale `v` to unit length in place.
///
/// Returns false (leaving `v` untouched) when the norm is zero or not finite.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm < f32::EPSILON {
        return false;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    true
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
