//! Short-lived storage for converted HTML.
//!
//! Results are written to `<prefix><id><extension>` in a dedicated
//! directory and looked up again by `id`. Nothing is removed automatically;
//! call [`TempStore::cleanup`] periodically with the configured lifetime.

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Length of the random part of a stored file's name.
const ID_LEN: usize = 16;

/// A file written by [`TempStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Random identifier used for later lookups.
    pub id: String,
    /// File name within the store directory.
    pub filename: String,
    pub path: PathBuf,
}

/// A directory of temporary result files sharing a name prefix.
#[derive(Debug, Clone)]
pub struct TempStore {
    dir: PathBuf,
    prefix: String,
}

impl TempStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, ConversionError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| store_err(&dir, e))?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    /// Open the store described by `config.temp_dir` and `config.temp_prefix`.
    pub fn from_config(config: &ConverterConfig) -> Result<Self, ConversionError> {
        Self::open(&config.temp_dir, config.temp_prefix.as_str())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` as UTF-8 under a fresh id.
    pub fn create(&self, content: &str, extension: &str) -> Result<StoredFile, ConversionError> {
        let mut file = tempfile::Builder::new()
            .prefix(&self.prefix)
            .suffix(extension)
            .rand_bytes(ID_LEN)
            .tempfile_in(&self.dir)
            .map_err(|e| store_err(&self.dir, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| store_err(file.path(), e))?;

        let (_, path) = file.keep().map_err(|e| store_err(&self.dir, e.error))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = filename
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_suffix(extension))
            .unwrap_or(&filename)
            .to_string();

        debug!("Stored {} bytes as {}", content.len(), filename);
        Ok(StoredFile { id, filename, path })
    }

    /// Path of the file stored under `id`, if it still exists.
    pub fn path(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() {
            return None;
        }
        let entries = fs::read_dir(&self.dir).ok()?;
        entries.flatten().find_map(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            (name.starts_with(self.prefix.as_str()) && name.contains(id)).then(|| entry.path())
        })
    }

    /// Contents of the file stored under `id`.
    pub fn read(&self, id: &str) -> Result<Option<String>, ConversionError> {
        match self.path(id) {
            Some(path) => fs::read_to_string(&path)
                .map(Some)
                .map_err(|e| store_err(&path, e)),
            None => Ok(None),
        }
    }

    /// Remove the file stored under `id`. Returns whether a file was removed.
    pub fn delete(&self, id: &str) -> Result<bool, ConversionError> {
        let Some(path) = self.path(id) else {
            return Ok(false);
        };
        fs::remove_file(&path).map_err(|e| store_err(&path, e))?;
        debug!("Deleted {}", path.display());
        Ok(true)
    }

    /// Remove every file in the store directory last modified more than
    /// `max_age` ago. Entries that cannot be inspected or removed are
    /// skipped. Returns the number of files removed.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let now = SystemTime::now();
        let mut deleted = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age <= max_age {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
        if deleted > 0 {
            debug!("Cleanup removed {} file(s) from {}", deleted, self.dir.display());
        }
        deleted
    }
}

fn store_err(path: &Path, source: std::io::Error) -> ConversionError {
    ConversionError::Store {
        path: path.to_path_buf(),
        source,
    }
}
