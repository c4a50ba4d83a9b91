//! Persistence for the embedding cache.
//!
//! Two artifacts live side by side in the cache directory.
//!
//! File format: vectors.bin
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - row_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Rows (repeated `row_count` times, in catalog order):
//! - embedding: [f32; dimensions] (little-endian)
//!
//! File format: metadata.json
//!
//! `{"model": "<name>", "entries": [RecordMeta, ...]}`, one entry per
//! matrix row, in the same order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogRecord;
use crate::recommender::embeddings::model_id_hash;
use crate::recommender::index::{EmbeddingMatrix, IndexError};
use crate::storage::write_atomic;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "metadata.json";

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + row_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Invalid row: {0}")]
    InvalidRow(#[from] IndexError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Row metadata needed to render a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub assessment_name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

impl From<&CatalogRecord> for RecordMeta {
    fn from(record: &CatalogRecord) -> Self {
        let non_empty = |s: &str| (!s.trim().is_empty()).then(|| s.to_string());
        Self {
            assessment_name: record.assessment_name.clone(),
            url: record.url.clone(),
            description: non_empty(&record.description),
            test_type: non_empty(&record.test_type),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MetadataFile {
    model: String,
    entries: Vec<RecordMeta>,
}

/// Storage manager for the cache artifacts.
pub struct VectorStorage {
    dir: PathBuf,
}

impl VectorStorage {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Both artifacts are present.
    pub fn exists(&self) -> bool {
        self.vectors_path().exists() && self.metadata_path().exists()
    }

    /// Load the matrix and its row metadata.
    ///
    /// # Arguments
    /// * `expected_model_id` - SHA256 hash of the expected model name
    /// * `expected_dimensions` - Expected embedding dimensions
    ///
    /// Fails if either file is invalid/incompatible or if the two artifacts
    /// disagree on the number of rows.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(EmbeddingMatrix, Vec<RecordMeta>), VectorStorageError> {
        let file = File::open(self.vectors_path())?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        validate_header(&header, expected_model_id, expected_dimensions)?;

        // the row count is only trusted once the file size agrees with it
        let expected_len = header
            .row_count
            .checked_mul(u64::from(header.dimensions) * 4)
            .and_then(|rows_len| rows_len.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| {
                VectorStorageError::InvalidFormat(format!(
                    "row count {} overflows the file size",
                    header.row_count
                ))
            })?;
        if expected_len != file_len {
            return Err(VectorStorageError::InvalidFormat(format!(
                "{} rows need {} bytes, file has {}",
                header.row_count, expected_len, file_len
            )));
        }

        let dimensions = header.dimensions as usize;
        let mut matrix = EmbeddingMatrix::with_capacity(dimensions, header.row_count as usize);
        let mut row_bytes = vec![0u8; dimensions * 4];
        for _ in 0..header.row_count {
            reader.read_exact(&mut row_bytes)?;
            let row = row_bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            matrix.push(row)?;
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(VectorStorageError::InvalidFormat(
                "trailing data after last row".to_string(),
            ));
        }

        let metadata = self.load_metadata()?;
        if model_id_hash(&metadata.model) != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        let metadata = metadata.entries;
        if metadata.len() != matrix.len() {
            return Err(VectorStorageError::InvalidFormat(format!(
                "{} vectors but {} metadata entries",
                matrix.len(),
                metadata.len()
            )));
        }

        Ok((matrix, metadata))
    }

    /// Persist the matrix and metadata.
    ///
    /// Each file uses atomic write: temp file -> fsync -> rename.
    pub fn save(
        &self,
        matrix: &EmbeddingMatrix,
        metadata: &[RecordMeta],
        model_name: &str,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        if matrix.len() != metadata.len() {
            return Err(VectorStorageError::InvalidFormat(format!(
                "refusing to save {} vectors with {} metadata entries",
                matrix.len(),
                metadata.len()
            )));
        }
        let dimensions = u16::try_from(matrix.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                matrix.dimensions()
            ))
        })?;

        std::fs::create_dir_all(&self.dir)?;

        self.write_vectors(matrix, dimensions, model_id)?;

        let metadata_file = MetadataFile {
            model: model_name.to_string(),
            entries: metadata.to_vec(),
        };
        write_atomic(&self.metadata_path(), &serde_json::to_vec_pretty(&metadata_file)?)?;

        Ok(())
    }


    fn load_metadata(&self) -> Result<MetadataFile, VectorStorageError> {
        let file = File::open(self.metadata_path())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn write_vectors(
        &self,
        matrix: &EmbeddingMatrix,
        dimensions: u16,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        let mut writer = BufWriter::new(temp);

        let header = Header {
            version: FORMAT_VERSION,
            model_id: *model_id,
            dimensions,
            row_count: matrix.len() as u64,
        };
        write_header(&mut writer, &header)?;

        for row in matrix.rows() {
            for &value in row {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let temp = writer.into_inner().map_err(|e| e.into_error())?;
        temp.as_file().sync_all()?;
        temp.persist(self.vectors_path()).map_err(|e| e.error)?;

        Ok(())
    }
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    row_count: u64,
}

fn read_header(reader: &mut impl Read) -> Result<Header, VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            VectorStorageError::InvalidFormat("file shorter than header".to_string())
        }
        _ => e.into(),
    })?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    // Verify checksum (computed over header without checksum field)
    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != compute_checksum(&header_bytes[0..43]) {
        return Err(VectorStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let row_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        version,
        model_id,
        dimensions,
        row_count,
    })
}

fn validate_header(
    header: &Header,
    expected_model_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<(), VectorStorageError> {
    if header.model_id != *expected_model_id {
        return Err(VectorStorageError::ModelMismatch);
    }

    if header.dimensions as usize != expected_dimensions {
        return Err(VectorStorageError::DimensionMismatch {
            expected: expected_dimensions,
            got: header.dimensions as usize,
        });
    }

    Ok(())
}

fn write_header(writer: &mut impl Write, header: &Header) -> Result<(), VectorStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = header.version;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.row_count.to_le_bytes());

    let checksum = compute_checksum(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

/// Compute CRC32 checksum of data.
fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Location of the cache artifacts, for messages.
pub fn describe(dir: &Path) -> String {
    format!(
        "{} + {}",
        dir.join(VECTORS_FILE).display(),
        dir.join(METADATA_FILE).display()
    )
}
