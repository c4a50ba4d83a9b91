//! Catalog generation.
//!
//! Two sources produce a catalog CSV:
//! - a static list of known product slugs, expanded with common variants
//! - a raw export with human-readable headers ("Assessment Name", ...),
//!   either CSV or a spreadsheet

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::{anyhow, Context};

use crate::catalog::CatalogRecord;
use crate::table::{cell, Table};

pub const PRODUCT_BASE_URL: &str = "https://www.shl.com/products/assessments/";

const BASE_SLUGS: [&str; 10] = [
    "verify-g",
    "verify-numerical",
    "verify-verbal",
    "verify-inductive",
    "numerical-reasoning",
    "verbal-reasoning",
    "inductive-reasoning",
    "situational-judgement",
    "opq32r",
    "motivational-questionnaire",
];

const SLUG_VARIANTS: [&str; 3] = ["advanced", "professional", "short-form"];

const STATIC_DESCRIPTION: &str = "SHL individual assessment";
const STATIC_TEST_TYPE: &str = "Mixed";

/// Known products plus their variants, sorted by slug.
pub fn static_catalog() -> Vec<CatalogRecord> {
    let mut slugs = BTreeSet::new();
    for slug in BASE_SLUGS {
        slugs.insert(slug.to_string());
        for variant in SLUG_VARIANTS {
            slugs.insert(format!("{slug}-{variant}"));
        }
    }

    slugs
        .into_iter()
        .map(|slug| CatalogRecord {
            assessment_name: title_case(&slug.replace('-', " ")),
            url: format!("{PRODUCT_BASE_URL}{slug}/"),
            description: STATIC_DESCRIPTION.to_string(),
            test_type: STATIC_TEST_TYPE.to_string(),
            duration_minutes: None,
            remote_support: Some(true),
            adaptive_support: Some(true),
        })
        .collect()
}

/// Convert a raw export into catalog records.
///
/// Rows without a name or url are dropped, urls are deduplicated keeping
/// the first row. Both support flags are set.
pub fn import_export(path: &Path) -> anyhow::Result<Vec<CatalogRecord>> {
    let table =
        Table::read(path).with_context(|| format!("could not read {}", path.display()))?;

    let column = |name: &str| {
        table
            .column(name)
            .ok_or_else(|| anyhow!("export is missing column '{name}'"))
    };

    let name_col = column("assessment name")?;
    let url_col = column("assessment url")?;
    let type_col = table.column("test type");
    let description_col = table.column("description");
    let duration_col = table.column("duration_minutes");

    let mut seen = HashSet::new();
    let mut records = vec![];
    for row in table.rows() {
        let field = |idx: Option<usize>| {
            idx.map(|idx| cell(row, idx))
                .unwrap_or_default()
                .to_string()
        };

        let assessment_name = field(Some(name_col));
        let url = field(Some(url_col));
        if assessment_name.is_empty() || url.is_empty() || !seen.insert(url.clone()) {
            continue;
        }

        records.push(CatalogRecord {
            assessment_name,
            url,
            description: field(description_col),
            test_type: field(type_col),
            duration_minutes: field(duration_col).parse().ok(),
            remote_support: Some(true),
            adaptive_support: Some(true),
        });
    }

    log::info!("imported {} assessments from {}", records.len(), path.display());
    Ok(records)
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
///
/// "opq32r" becomes "Opq32R": a letter following a digit starts a new run.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_is_letter = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}
