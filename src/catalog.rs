//! Assessment catalog loading.
//!
//! The catalog is a CSV file with one assessment per row. Rows missing a
//! name or url are skipped, duplicate urls keep their first occurrence.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Column order used when writing a catalog.
pub const CSV_HEADERS: [&str; 7] = [
    "assessment_name",
    "url",
    "description",
    "test_type",
    "duration_minutes",
    "remote_support",
    "adaptive_support",
];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog not found at {0}")]
    NotFound(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("catalog is missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("catalog has no valid records ({skipped} rows skipped)")]
    Empty { skipped: usize },
}

/// A single assessment. Identity is the url.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub assessment_name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub test_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_support: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptive_support: Option<bool>,
}

impl CatalogRecord {
    pub fn new(assessment_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            assessment_name: assessment_name.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_test_type(mut self, test_type: impl Into<String>) -> Self {
        self.test_type = test_type.into();
        self
    }

    fn to_csv_row(&self) -> [String; 7] {
        [
            self.assessment_name.clone(),
            self.url.clone(),
            self.description.clone(),
            self.test_type.clone(),
            self.duration_minutes
                .map(|d| d.to_string())
                .unwrap_or_default(),
            format_flag(self.remote_support),
            format_flag(self.adaptive_support),
        ]
    }
}

/// Outcome counters of a catalog load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: usize,
    pub skipped_invalid: usize,
    pub skipped_duplicates: usize,
}

/// Reads catalog records from a CSV file.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Vec<CatalogRecord>, CatalogError> {
        self.load_with_report().map(|(records, _)| records)
    }

    pub fn load_with_report(&self) -> Result<(Vec<CatalogRecord>, LoadReport), CatalogError> {
        if let Err(err) = std::fs::metadata(&self.path) {
            return match err.kind() {
                ErrorKind::NotFound => Err(CatalogError::NotFound(self.path.clone())),
                _ => Err(err.into()),
            };
        }

        let now = Instant::now();
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)?;
        let columns = Columns::resolve(reader.headers()?)?;

        let mut report = LoadReport::default();
        let mut seen_urls = HashSet::new();
        let mut records = vec![];

        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(err) if matches!(err.kind(), csv::ErrorKind::Utf8 { .. }) => {
                    log::debug!("undecodable catalog row: {err}");
                    report.skipped_invalid += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let Some(record) = columns.record(&row) else {
                report.skipped_invalid += 1;
                continue;
            };

            if !seen_urls.insert(record.url.clone()) {
                report.skipped_duplicates += 1;
                continue;
            }

            records.push(record);
        }

        report.loaded = records.len();

        if report.skipped_invalid > 0 {
            log::warn!(
                "skipped {} catalog rows without assessment_name or url, or not valid utf-8",
                report.skipped_invalid
            );
        }
        if report.skipped_duplicates > 0 {
            log::info!("skipped {} duplicate catalog urls", report.skipped_duplicates);
        }
        log::debug!(
            "took {}ms to read catalog",
            now.elapsed().as_micros() as f64 / 1000.0
        );

        if records.is_empty() {
            return Err(CatalogError::Empty {
                skipped: report.skipped_invalid + report.skipped_duplicates,
            });
        }

        Ok((records, report))
    }
}

/// Write records to `path` in catalog column order.
pub fn write_catalog(path: &Path, records: &[CatalogRecord]) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(CSV_HEADERS)?;
    for record in records {
        writer.write_record(record.to_csv_row())?;
    }
    writer.flush()?;
    Ok(())
}

/// Lowercased, trimmed header name. Shared by every CSV reader in the crate.
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Column positions resolved from the header row.
struct Columns {
    assessment_name: usize,
    url: usize,
    description: Option<usize>,
    test_type: Option<usize>,
    duration_minutes: Option<usize>,
    remote_support: Option<usize>,
    adaptive_support: Option<usize>,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord) -> Result<Self, CatalogError> {
        let positions: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (normalize_header(name), idx))
            .collect();
        let find = |name: &str| positions.get(name).copied();

        Ok(Self {
            assessment_name: find("assessment_name")
                .ok_or(CatalogError::MissingColumn("assessment_name"))?,
            url: find("url").ok_or(CatalogError::MissingColumn("url"))?,
            description: find("description"),
            test_type: find("test_type").or_else(|| find("category")),
            duration_minutes: find("duration_minutes"),
            remote_support: find("remote_support"),
            adaptive_support: find("adaptive_support"),
        })
    }

    fn record(&self, row: &csv::StringRecord) -> Option<CatalogRecord> {
        let field = |idx: Option<usize>| {
            idx.and_then(|idx| row.get(idx))
                .map(str::trim)
                .unwrap_or_default()
        };

        let assessment_name = field(Some(self.assessment_name));
        let url = field(Some(self.url));
        if assessment_name.is_empty() || url.is_empty() {
            return None;
        }

        Some(CatalogRecord {
            assessment_name: assessment_name.to_string(),
            url: url.to_string(),
            description: field(self.description).to_string(),
            test_type: field(self.test_type).to_string(),
            duration_minutes: parse_duration(field(self.duration_minutes)),
            remote_support: parse_flag(field(self.remote_support)),
            adaptive_support: parse_flag(field(self.adaptive_support)),
        })
    }
}

/// Durations are sometimes exported as floats ("30.0").
fn parse_duration(value: &str) -> Option<u32> {
    if value.is_empty() {
        return None;
    }
    value.parse::<u32>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.round() as u32)
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Some(true),
        "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

pub fn format_flag(flag: Option<bool>) -> String {
    match flag {
        Some(true) => "Yes".to_string(),
        Some(false) => "No".to_string(),
        None => String::new(),
    }
}
