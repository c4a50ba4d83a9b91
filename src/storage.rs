use std::io::Write;
use std::path::{Path, PathBuf};

/// Local directory holding small files (config, cache metadata).
///
/// Writes go to a temp file in the same directory and are renamed into
/// place, so readers never observe a partial file.
#[derive(Clone, Debug)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(storage_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = storage_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(BackendLocal { base_dir })
    }

    pub fn path(&self, ident: &str) -> PathBuf {
        self.base_dir.join(ident)
    }

    pub fn exists(&self, ident: &str) -> bool {
        std::fs::metadata(self.path(ident)).is_ok()
    }

    pub fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.path(ident))
    }

    pub fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        write_atomic(&self.path(ident), data)
    }
}

/// Write `data` to `path` via temp file -> fsync -> rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
