//! Transient staging directories for uploaded samples and fingerprint databases.
//!
//! Nothing in here is a cache: files live only until the next match attempt
//! (or explicit clear) empties both directories.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Errors that can occur while touching the staging directories.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("Failed to list {dir:?}: {source}")]
    ListFailed {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which of the two staging directories a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingKind {
    Sample,
    Database,
}

impl StagingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagingKind::Sample => "sample",
            StagingKind::Database => "database",
        }
    }
}

/// A file that could not be removed during [`StagingArea::clear_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ClearFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a best-effort clear.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ClearReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<ClearFailure>,
}

impl ClearReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The pair of flat directories holding uploaded files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    sample_dir: PathBuf,
    fingerprint_dir: PathBuf,
}

impl StagingArea {
    pub fn new(sample_dir: impl Into<PathBuf>, fingerprint_dir: impl Into<PathBuf>) -> Self {
        Self {
            sample_dir: sample_dir.into(),
            fingerprint_dir: fingerprint_dir.into(),
        }
    }

    pub fn sample_dir(&self) -> &Path {
        &self.sample_dir
    }

    pub fn fingerprint_dir(&self) -> &Path {
        &self.fingerprint_dir
    }

    fn dir_for(&self, kind: StagingKind) -> &Path {
        match kind {
            StagingKind::Sample => &self.sample_dir,
            StagingKind::Database => &self.fingerprint_dir,
        }
    }

    /// Create both directories. Safe to call repeatedly.
    pub async fn init(&self) -> Result<(), StagingError> {
        fs::create_dir_all(&self.sample_dir).await?;
        fs::create_dir_all(&self.fingerprint_dir).await?;
        Ok(())
    }

    /// Resolve a client-supplied filename inside the staging directory for `kind`.
    ///
    /// Only the last path component of `filename` is ever used, so
    /// `../../etc/passwd` resolves to `<dir>/passwd`.
    pub fn resolve(&self, kind: StagingKind, filename: &str) -> Result<PathBuf, StagingError> {
        let name = basename(filename)?;
        Ok(self.dir_for(kind).join(name))
    }

    /// Write `data` under `filename`, replacing any existing file with that name.
    pub async fn store(
        &self,
        kind: StagingKind,
        filename: &str,
        data: &[u8],
    ) -> Result<PathBuf, StagingError> {
        let path = self.resolve(kind, filename)?;

        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        debug!("Stored {} ({} bytes) at {:?}", kind.as_str(), data.len(), path);
        Ok(path)
    }

    /// Delete every regular file in both directories.
    ///
    /// Individual removal failures are collected into the report instead of
    /// aborting, so a file that vanished concurrently does not stop the rest.
    /// Only failing to list a directory is an error.
    pub async fn clear_all(&self) -> Result<ClearReport, StagingError> {
        let mut report = ClearReport::default();
        let mut list_error = None;

        for dir in [&self.sample_dir, &self.fingerprint_dir] {
            if let Err(e) = clear_dir(dir, &mut report).await {
                warn!("Could not list staging directory {:?}: {}", dir, e);
                if list_error.is_none() {
                    list_error = Some(StagingError::ListFailed {
                        dir: dir.clone(),
                        source: e,
                    });
                }
            }
        }

        for failure in &report.failures {
            warn!("Failed to delete {:?}: {}", failure.path, failure.reason);
        }

        match list_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// True when neither directory contains a regular file.
    pub async fn is_empty(&self) -> Result<bool, StagingError> {
        for dir in [&self.sample_dir, &self.fingerprint_dir] {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_file() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

async fn clear_dir(dir: &Path, report: &mut ClearReport) -> std::io::Result<()> {
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        // Entries may disappear between listing and inspection.
        let is_file = match entry.file_type().await {
            Ok(t) => t.is_file(),
            Err(_) => continue,
        };
        if !is_file {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted file: {:?}", path);
                report.removed.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report.failures.push(ClearFailure {
                path,
                reason: e.to_string(),
            }),
        }
    }

    Ok(())
}

/// Strip every directory component from a client-supplied name.
fn basename(filename: &str) -> Result<&str, StagingError> {
    // Backslashes count as separators too.
    let last = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or("");

    if last.is_empty() || last == "." || last == ".." || last.contains('\0') {
        return Err(StagingError::InvalidFilename(filename.to_string()));
    }

    Ok(last)
}
