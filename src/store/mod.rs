//! Content-addressed artifact store
//!
//! Persists the outputs of download and build steps so that re-running the
//! orchestrator never recomputes a result it already has.
//!
//! # Layout
//!
//! ```text
//! <root>/<key>/data/*       build or download outputs
//! <root>/<key>/metadata/*   freshness markers (ETag, mtime, ...)
//! ```
//!
//! # Replacement
//!
//! A new generation is assembled in a hidden staging directory next to the
//! entry and renamed into place after the old entry is removed. Readers
//! never see a mix of generations; a crash in between loses the old entry
//! at worst.
//!
//! # Hit/miss policy
//!
//! [`ArtifactStore::get`] hands the current entry to a caller-supplied fetch
//! function, which decides whether it is still good ([`FetchOutcome::Hit`])
//! or produces replacement files ([`FetchOutcome::Miss`]). The store only
//! owns persistence.

pub mod key;

pub use key::{build_key, download_key, CompressionSalt};

use crate::error::{DistroError, DistroResult};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

const DATA_DIR: &str = "data";
const METADATA_DIR: &str = "metadata";

/// Files of one cache entry, each list ordered by file name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredFiles {
    /// Data outputs
    pub data: Vec<PathBuf>,
    /// Metadata outputs
    pub metadata: Vec<PathBuf>,
}

impl StoredFiles {
    /// Whether the entry holds no files at all
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.is_empty()
    }
}

/// Decision returned by a fetch function
#[derive(Debug)]
pub enum FetchOutcome {
    /// The files handed to the fetch function are still valid
    Hit,
    /// New files that replace the entry
    Miss {
        data: Vec<PathBuf>,
        metadata: Vec<PathBuf>,
    },
}

/// On-disk key/value store for build artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Look up `key` and let `fetch` decide between hit and miss.
    ///
    /// `fetch` receives the current files (both lists empty when there is no
    /// entry). On a miss the returned files are persisted before being
    /// returned; on a hit the current files are returned untouched.
    pub async fn get<F, Fut>(&self, key: &str, fetch: F) -> DistroResult<StoredFiles>
    where
        F: FnOnce(StoredFiles) -> Fut,
        Fut: Future<Output = DistroResult<FetchOutcome>>,
    {
        validate_key(key)?;
        let existing = self.lookup(key).await?.unwrap_or_default();

        match fetch(existing.clone()).await? {
            FetchOutcome::Hit => {
                debug!("Store hit: {}", key);
                Ok(existing)
            }
            FetchOutcome::Miss { data, metadata } => {
                debug!(
                    "Store miss: {} ({} data, {} metadata)",
                    key,
                    data.len(),
                    metadata.len()
                );
                self.store(key, &data, &metadata).await
            }
        }
    }

    /// Read the entry for `key`, if any
    pub async fn lookup(&self, key: &str) -> DistroResult<Option<StoredFiles>> {
        validate_key(key)?;
        let entry = self.entry_dir(key);
        if !fs::try_exists(&entry)
            .await
            .map_err(|e| DistroError::io(format!("checking {}", entry.display()), e))?
        {
            return Ok(None);
        }

        Ok(Some(StoredFiles {
            data: list_files(&entry.join(DATA_DIR)).await?,
            metadata: list_files(&entry.join(METADATA_DIR)).await?,
        }))
    }

    /// Replace the entry for `key` with the given files.
    ///
    /// Inputs are moved into the store (copied when a rename is not
    /// possible). Returns the persisted locations.
    pub async fn store(
        &self,
        key: &str,
        data: &[PathBuf],
        metadata: &[PathBuf],
    ) -> DistroResult<StoredFiles> {
        validate_key(key)?;
        fs::create_dir_all(&self.root).await.map_err(|e| {
            DistroError::io(format!("creating store root {}", self.root.display()), e)
        })?;

        let staging = self.root.join(format!(".{}.{}", key, Uuid::new_v4()));
        if let Err(e) = stage_entry(&staging, data, metadata).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        let entry = self.entry_dir(key);
        if let Err(e) = remove_dir_if_exists(&entry).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        fs::rename(&staging, &entry).await.map_err(|e| {
            DistroError::store(key, format!("committing {}: {}", staging.display(), e))
        })?;

        debug!("Stored {} ({} data, {} metadata)", key, data.len(), metadata.len());
        Ok(StoredFiles {
            data: rebase(data, &entry.join(DATA_DIR)),
            metadata: rebase(metadata, &entry.join(METADATA_DIR)),
        })
    }

    /// Remove the entry for `key`. Missing entries are not an error.
    pub async fn invalidate(&self, key: &str) -> DistroResult<()> {
        validate_key(key)?;
        remove_dir_if_exists(&self.entry_dir(key)).await?;
        debug!("Invalidated {}", key);
        Ok(())
    }

    /// Remove every entry
    pub async fn clear(&self) -> DistroResult<()> {
        remove_dir_if_exists(&self.root).await?;
        debug!("Cleared store {}", self.root.display());
        Ok(())
    }

    /// Keys currently stored, sorted
    pub async fn keys(&self) -> DistroResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => {
                return Err(DistroError::io(
                    format!("reading store root {}", self.root.display()),
                    e,
                ))
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| DistroError::io("listing store entries", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir && !name.starts_with('.') {
                keys.push(name);
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Keys become directory names, so they must be a single path segment.
/// Leading dots are reserved for staging directories.
fn validate_key(key: &str) -> DistroResult<()> {
    if key.is_empty() || key.starts_with('.') || key.contains('/') || key.contains('\\') {
        return Err(DistroError::store(key, "not a valid store key"));
    }
    Ok(())
}

async fn stage_entry(staging: &Path, data: &[PathBuf], metadata: &[PathBuf]) -> DistroResult<()> {
    place_files(data, &staging.join(DATA_DIR)).await?;
    place_files(metadata, &staging.join(METADATA_DIR)).await
}

async fn place_files(files: &[PathBuf], dir: &Path) -> DistroResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| DistroError::io(format!("creating {}", dir.display()), e))?;

    for src in files {
        let name = src.file_name().ok_or_else(|| {
            DistroError::store(dir.display().to_string(), format!("{} has no file name", src.display()))
        })?;
        let dest = dir.join(name);
        if fs::try_exists(&dest).await.unwrap_or(false) {
            return Err(DistroError::store(
                dir.display().to_string(),
                format!("duplicate file name {}", name.to_string_lossy()),
            ));
        }

        if fs::rename(src, &dest).await.is_err() {
            // Cross-device: fall back to copy + remove
            fs::copy(src, &dest).await.map_err(|e| {
                DistroError::io(format!("copying {} into store", src.display()), e)
            })?;
            fs::remove_file(src).await.map_err(|e| {
                DistroError::io(format!("removing {} after copy", src.display()), e)
            })?;
        }
    }
    Ok(())
}

async fn list_files(dir: &Path) -> DistroResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
        Err(e) => return Err(DistroError::io(format!("reading {}", dir.display()), e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DistroError::io(format!("reading {}", dir.display()), e))?
    {
        files.push(entry.path());
    }

    files.sort();
    Ok(files)
}

async fn remove_dir_if_exists(dir: &Path) -> DistroResult<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DistroError::io(format!("removing {}", dir.display()), e)),
    }
}

fn rebase(files: &[PathBuf], dir: &Path) -> Vec<PathBuf> {
    files
        .iter()
        .filter_map(|f| f.file_name().map(|name| dir.join(name)))
        .collect()
}
