//! Locating and compressing build artifacts
//!
//! Builds may emit either a plain archive or its zstd-compressed variant, so
//! every lookup tries the pattern both with and without the `.zst` suffix.

use crate::error::{DistroError, DistroResult};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Suffix of zstd-compressed artifacts
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// zstd level used for artifacts; zero selects the library default
const COMPRESSION_LEVEL: i32 = 0;

/// Find the single file in `dir` matching `pattern` or `pattern.zst`.
///
/// Zero or several matches are an error naming `component` and the pattern.
pub fn find_artifact_in_dir(dir: &Path, pattern: &str, component: &str) -> DistroResult<PathBuf> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut candidates = vec![pattern.to_string()];
    if !pattern.ends_with(COMPRESSED_SUFFIX) {
        candidates.push(format!("{}{}", pattern, COMPRESSED_SUFFIX));
    }

    let mut matches = BTreeSet::new();
    for candidate in &candidates {
        let full = format!("{}/{}", base, candidate);
        let paths = glob::glob(&full).map_err(|e| DistroError::ComponentInvalid {
            component: component.to_string(),
            reason: format!("invalid artifact pattern '{}': {}", pattern, e),
        })?;
        matches.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
    }

    debug!(
        "{}: {} match(es) for '{}' in {}",
        component,
        matches.len(),
        pattern,
        dir.display()
    );

    if matches.len() != 1 {
        return Err(DistroError::ArtifactMatch {
            component: component.to_string(),
            pattern: pattern.to_string(),
            dir: dir.to_path_buf(),
            count: matches.len(),
        });
    }

    matches
        .into_iter()
        .next()
        .ok_or_else(|| DistroError::Internal("artifact match disappeared".to_string()))
}

/// Whether `path` already carries the compressed suffix
pub fn is_compressed(path: &Path) -> bool {
    path.to_string_lossy().ends_with(COMPRESSED_SUFFIX)
}

/// Compress `path` to `<path>.zst` and remove the original.
///
/// Already-compressed files are returned unchanged.
pub async fn compress_artifact(path: &Path, component: &str) -> DistroResult<PathBuf> {
    if is_compressed(path) {
        return Ok(path.to_path_buf());
    }

    let source = path.to_path_buf();
    let target = PathBuf::from(format!("{}{}", path.display(), COMPRESSED_SUFFIX));
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    info!("{}: Compressing {}", component, file_name);

    let (src, dst) = (source.clone(), target.clone());
    tokio::task::spawn_blocking(move || compress_file(&src, &dst))
        .await
        .map_err(|e| DistroError::Internal(format!("compression task failed: {}", e)))?
        .map_err(|e| {
            // Do not leave a truncated archive that a later lookup could match
            let _ = std::fs::remove_file(&target);
            DistroError::Compression {
                component: component.to_string(),
                reason: e.to_string(),
            }
        })?;

    tokio::fs::remove_file(&source)
        .await
        .map_err(|e| DistroError::io(format!("removing {}", source.display()), e))?;

    info!(
        "{}: Compressed to {}",
        component,
        target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    Ok(target)
}

fn compress_file(source: &Path, target: &Path) -> std::io::Result<()> {
    let mut reader = BufReader::new(File::open(source)?);
    let writer = BufWriter::new(File::create(target)?);
    let mut encoder = zstd::Encoder::new(writer, COMPRESSION_LEVEL)?;
    std::io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    std::io::Write::flush(&mut writer)
}
