//! Component downloads with freshness revalidation
//!
//! Download steps run as artifact store fetch functions. The previous
//! transfer's freshness markers live in a `download.json` metadata file:
//! HTTP sources revalidate with `If-None-Match` / `If-Modified-Since` (a
//! `304` is a hit), local sources compare the file modification time.

use crate::error::{DistroError, DistroResult};
use crate::store::{FetchOutcome, StoredFiles};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Name of the metadata file recording freshness markers
pub const METADATA_FILE: &str = "download.json";

/// Attempts made for transient failures
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between attempts, multiplied by the attempt number
#[cfg(not(test))]
const RETRY_DELAY: Duration = Duration::from_secs(2);
#[cfg(test)]
const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Freshness markers of the last transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// Modification time of a local source, in nanoseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ns: Option<u64>,
}

/// Where a download URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http(String),
    Local(PathBuf),
}

impl Source {
    /// Classify `url`. Paths without a scheme resolve against `manifest_dir`.
    pub fn parse(url: &str, manifest_dir: &Path) -> Self {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Self::Http(url.to_string());
        }

        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        if path.is_absolute() {
            Self::Local(path.to_path_buf())
        } else {
            Self::Local(manifest_dir.join(path))
        }
    }
}

/// Fetch `url` into `scratch`, retrying transient failures.
///
/// `current` is the store's existing entry; when its freshness markers are
/// still valid the result is [`FetchOutcome::Hit`].
pub async fn download_artifact(
    url: &str,
    manifest_dir: &Path,
    current: StoredFiles,
    scratch: &Path,
) -> DistroResult<FetchOutcome> {
    let source = Source::parse(url, manifest_dir);
    let previous = read_metadata(&current).await;

    let mut attempt = 1;
    loop {
        let result = match &source {
            Source::Local(path) => fetch_local(url, path, previous.as_ref(), scratch).await,
            Source::Http(url) => fetch_http(url, previous.clone(), scratch).await,
        };

        match result {
            Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                warn!("Attempt {}/{} failed: {}", attempt, MAX_ATTEMPTS, e);
                tokio::time::sleep(RETRY_DELAY * attempt).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Metadata of the current entry, if it has data and readable markers
async fn read_metadata(current: &StoredFiles) -> Option<DownloadMetadata> {
    if current.data.is_empty() {
        return None;
    }
    let path = current
        .metadata
        .iter()
        .find(|p| p.file_name().is_some_and(|n| n == METADATA_FILE))?;

    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            debug!("Ignoring unreadable {}: {}", path.display(), e);
            None
        }
    }
}

async fn write_metadata(scratch: &Path, metadata: &DownloadMetadata) -> DistroResult<PathBuf> {
    let path = scratch.join(METADATA_FILE);
    let content = serde_json::to_string_pretty(metadata)?;
    tokio::fs::write(&path, content)
        .await
        .map_err(|e| DistroError::io(format!("writing {}", path.display()), e))?;
    Ok(path)
}

async fn fetch_local(
    url: &str,
    path: &Path,
    previous: Option<&DownloadMetadata>,
    scratch: &Path,
) -> DistroResult<FetchOutcome> {
    let meta = tokio::fs::metadata(path).await.map_err(|e| DistroError::Download {
        url: url.to_string(),
        reason: format!("{}: {}", path.display(), e),
    })?;
    let mtime_ns = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as u64);

    if let Some(previous) = previous {
        if previous.url == url && mtime_ns.is_some() && previous.mtime_ns == mtime_ns {
            debug!("{} unchanged since last transfer", path.display());
            return Ok(FetchOutcome::Hit);
        }
    }

    let name = path.file_name().ok_or_else(|| DistroError::Download {
        url: url.to_string(),
        reason: "source has no file name".to_string(),
    })?;
    let data_dir = scratch.join("data");
    tokio::fs::create_dir_all(&data_dir)
        .await
        .map_err(|e| DistroError::io(format!("creating {}", data_dir.display()), e))?;
    let dest = data_dir.join(name);

    info!("Copying {}", path.display());
    tokio::fs::copy(path, &dest)
        .await
        .map_err(|e| DistroError::io(format!("copying {}", path.display()), e))?;

    let metadata = DownloadMetadata {
        url: url.to_string(),
        mtime_ns,
        ..Default::default()
    };
    let metadata_path = write_metadata(scratch, &metadata).await?;

    Ok(FetchOutcome::Miss {
        data: vec![dest],
        metadata: vec![metadata_path],
    })
}

/// Whether an HTTP status means "try again later"
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503 | 504)
}

/// File name for an HTTP download: the last URL path segment
pub fn file_name_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let after_scheme = without_query
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(without_query);

    match after_scheme.split_once('/') {
        Some((_, path)) => path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string(),
        None => "download".to_string(),
    }
}

async fn fetch_http(
    url: &str,
    previous: Option<DownloadMetadata>,
    scratch: &Path,
) -> DistroResult<FetchOutcome> {
    let url = url.to_string();
    let dir = scratch.to_path_buf();

    let outcome = tokio::task::spawn_blocking(move || fetch_http_blocking(&url, previous, &dir))
        .await
        .map_err(|e| DistroError::Internal(format!("download task failed: {}", e)))??;

    match outcome {
        HttpOutcome::NotModified => Ok(FetchOutcome::Hit),
        HttpOutcome::Fetched { data, metadata } => {
            let metadata_path = write_metadata(scratch, &metadata).await?;
            Ok(FetchOutcome::Miss {
                data: vec![data],
                metadata: vec![metadata_path],
            })
        }
    }
}

enum HttpOutcome {
    NotModified,
    Fetched {
        data: PathBuf,
        metadata: DownloadMetadata,
    },
}

fn fetch_http_blocking(
    url: &str,
    previous: Option<DownloadMetadata>,
    scratch: &Path,
) -> DistroResult<HttpOutcome> {
    let download_error = |reason: String| DistroError::Download {
        url: url.to_string(),
        reason,
    };

    let agent: ureq::Agent = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .build()
        .into();

    let mut request = agent.get(url);
    if let Some(previous) = previous.as_ref().filter(|p| p.url == url) {
        if let Some(etag) = &previous.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &previous.last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }
    }

    info!("Downloading {}", url);
    let mut response = request.call().map_err(|e| download_error(e.to_string()))?;
    let status = response.status().as_u16();

    if status == 304 {
        debug!("{} not modified", url);
        return Ok(HttpOutcome::NotModified);
    }
    if is_transient_status(status) {
        return Err(DistroError::Transient {
            service: url.to_string(),
            reason: format!("HTTP {}", status),
        });
    }
    if !(200..300).contains(&status) {
        return Err(download_error(format!("HTTP {}", status)));
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    };
    let metadata = DownloadMetadata {
        url: url.to_string(),
        etag: header("etag"),
        last_modified: header("last-modified"),
        mtime_ns: None,
    };

    // Data and metadata land in separate directories so the store can move
    // both without name clashes
    let data_dir = scratch.join("data");
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| DistroError::io(format!("creating {}", data_dir.display()), e))?;
    let dest = data_dir.join(file_name_from_url(url));

    let mut file = std::fs::File::create(&dest)
        .map_err(|e| DistroError::io(format!("creating {}", dest.display()), e))?;
    let mut reader = response.body_mut().as_reader();
    std::io::copy(&mut reader, &mut file).map_err(|e| download_error(e.to_string()))?;

    Ok(HttpOutcome::Fetched {
        data: dest,
        metadata,
    })
}
