//! Tabular input files.
//!
//! Query sets and catalog exports arrive either as CSV or as a spreadsheet.
//! The format is picked from the file extension; spreadsheets are read from
//! their first sheet, whose first row is the header.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::catalog::normalize_header;

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Calamine(#[from] calamine::Error),
}

/// Header positions keyed by normalized name, plus the data rows as text.
#[derive(Debug, Default)]
pub struct Table {
    columns: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, TableError> {
        if is_spreadsheet(path) {
            Self::read_workbook(path)
        } else {
            Self::read_csv(path)
        }
    }

    fn read_csv(path: &Path) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(String::from).collect();

        let mut rows = vec![];
        for row in reader.records() {
            rows.push(row?.iter().map(String::from).collect());
        }
        Ok(Self::new(&header, rows))
    }

    fn read_workbook(path: &Path) -> Result<Self, TableError> {
        let mut workbook = open_workbook_auto(path)?;
        let Some(sheet) = workbook.sheet_names().first().cloned() else {
            log::warn!("{} has no sheets", path.display());
            return Ok(Self::default());
        };
        let range = workbook.worksheet_range(&sheet)?;

        let mut rows = range
            .rows()
            .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()));
        let header = rows.next().unwrap_or_default();

        log::debug!("reading sheet {:?} of {}", sheet, path.display());
        Ok(Self::new(&header, rows.collect()))
    }

    fn new(header: &[String], rows: Vec<Vec<String>>) -> Self {
        let columns = header
            .iter()
            .enumerate()
            .map(|(idx, name)| (normalize_header(name), idx))
            .collect();
        Self { columns, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.get(name).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[String]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

/// Trimmed cell text, empty when the row is short.
pub fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(|value| value.trim()).unwrap_or_default()
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SPREADSHEET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole numbers come back as floats
        Data::Float(f) if f.fract() == 0.0 => format!("{:.0}", f),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERROR: {:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}
