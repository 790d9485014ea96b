//! Destinations for reconstructed files.
//!
//! The engine hands each reconstructed file to an [`OutputSink`] exactly
//! once. Two sinks ship with the crate:
//!
//! - [`DirectorySink`] writes into a download directory, never overwriting
//!   an existing file
//! - [`MemorySink`] keeps files in memory for callers that save them
//!   elsewhere

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name used when a transfer carries no usable filename.
pub const FALLBACK_NAME: &str = "qr_transfer.bin";

/// Where a file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFile {
    /// Name the file was saved under
    pub name: String,
    /// Filesystem path, or `memory:<name>`
    pub location: String,
    /// Size in bytes
    pub size: u64,
}

/// Receives reconstructed files.
pub trait OutputSink: Send + Sync {
    /// Save one file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Output`] when the name is rejected or the write fails.
    fn save(&self, name: &str, data: &[u8]) -> Result<SavedFile>;
}

/// Reduce a transmitted filename to a safe single path component.
///
/// # Errors
///
/// Returns [`Error::Output`] for absolute paths and parent traversal.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let rejected = |reason: &str| Error::Output {
        file: name.to_string(),
        reason: reason.to_string(),
    };

    let normalized = trimmed.replace('\\', "/");
    let path = Path::new(&normalized);
    if path.has_root() || normalized.starts_with('/') {
        return Err(rejected("absolute paths are not allowed"));
    }
    if path.components().any(|c| c == Component::ParentDir) {
        return Err(rejected("path traversal rejected"));
    }

    let cleaned: String = normalized
        .chars()
        .map(|c| match c {
            '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();

    if cleaned.is_empty() {
        Ok(FALLBACK_NAME.to_string())
    } else {
        Ok(cleaned.to_string())
    }
}

/// Candidate name for the `n`th collision: `report_2.pdf`.
fn numbered(name: &str, n: usize) -> String {
    let path = Path::new(name);
    match (path.file_stem().and_then(|s| s.to_str()), path.extension().and_then(|e| e.to_str())) {
        (Some(stem), Some(ext)) => format!("{stem}_{n}.{ext}"),
        _ => format!("{name}_{n}"),
    }
}

/// Writes files into a directory.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    /// Save into `root`, created on first use.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The target directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl OutputSink for DirectorySink {
    fn save(&self, name: &str, data: &[u8]) -> Result<SavedFile> {
        let safe = sanitize_filename(name)?;
        let io_error = |e: std::io::Error| Error::Output {
            file: safe.clone(),
            reason: e.to_string(),
        };
        std::fs::create_dir_all(&self.root).map_err(io_error)?;

        let mut attempt = 0usize;
        loop {
            let candidate = if attempt == 0 {
                safe.clone()
            } else {
                numbered(&safe, attempt)
            };
            let path = self.root.join(&candidate);

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(data).map_err(io_error)?;
                    file.sync_all().map_err(io_error)?;
                    tracing::info!(path = %path.display(), size = data.len(), "Saved file");
                    return Ok(SavedFile {
                        name: candidate,
                        location: path.display().to_string(),
                        size: data.len() as u64,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(io_error(e)),
            }
        }
    }
}

/// A file held by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFile {
    /// Sanitized name
    pub name: String,
    /// Contents
    pub data: Vec<u8>,
}

/// Keeps files in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    files: Mutex<Vec<MemoryFile>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All files saved so far.
    #[must_use]
    pub fn files(&self) -> Vec<MemoryFile> {
        self.files.lock().clone()
    }

    /// Contents of the most recent file saved under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .iter()
            .rev()
            .find(|f| f.name == name)
            .map(|f| f.data.clone())
    }

    /// Remove and return every file.
    pub fn drain(&self) -> Vec<MemoryFile> {
        std::mem::take(&mut *self.files.lock())
    }

    /// Number of files held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    /// Whether no file is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.lock().is_empty()
    }
}

impl OutputSink for MemorySink {
    fn save(&self, name: &str, data: &[u8]) -> Result<SavedFile> {
        let name = sanitize_filename(name)?;
        self.files.lock().push(MemoryFile {
            name: name.clone(),
            data: data.to_vec(),
        });
        tracing::debug!(name = %name, size = data.len(), "Kept file in memory");
        Ok(SavedFile {
            location: format!("memory:{name}"),
            name,
            size: data.len() as u64,
        })
    }
}
