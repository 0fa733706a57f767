//! Build-environment image cache
//!
//! Builds run inside a builder image identified by a checksum over its
//! definition: the definition file plus every file of the build-definition
//! tree (relative paths and contents, in sorted order). Lookup is three
//! tiered:
//!
//! 1. a local image tagged with the checksum whose `build_timestamp` label
//!    is younger than the expiration,
//! 2. the same tag in the shared registry,
//! 3. a fresh build, published to the registry for other hosts.

use crate::config::schema::BuilderConfig;
use crate::config::Config;
use crate::error::{DistroError, DistroResult};
use crate::orchestration::{build_error_output, stream_child_output};
use crate::orchestration::{ContainerRuntime, ImageBuildRequest};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Image label holding the build time in seconds since the epoch
pub const TIMESTAMP_LABEL: &str = "build_timestamp";

/// Floating tag of the most recent build
pub const LATEST_TAG: &str = "latest";

/// File suffixes never hashed
const TRANSIENT_SUFFIXES: &[&str] = &[".pyc", ".pyo"];

const SECONDS_PER_HOUR: i64 = 3600;

/// Outcome of the local lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDecision {
    pub should_build: bool,
    pub checksum: String,
    pub reason: String,
}

/// Decide whether the image tagged `checksum` must be (re)acquired.
///
/// `timestamp` is the image's build time, `None` when there is no such image.
pub fn decide(checksum: &str, timestamp: Option<i64>, now: i64, expiration_hours: u64) -> ImageDecision {
    // Saturates so absurd labels or settings cannot overflow
    let max_age = i64::try_from(expiration_hours)
        .ok()
        .and_then(|hours| hours.checked_mul(SECONDS_PER_HOUR))
        .unwrap_or(i64::MAX);

    let (should_build, reason) = match timestamp {
        None => (true, "not found".to_string()),
        Some(ts) if now.saturating_sub(ts) >= max_age => {
            (true, format!("expired (>{}h old)", expiration_hours))
        }
        Some(_) => (false, "exists and is not expired".to_string()),
    };

    ImageDecision {
        should_build,
        checksum: checksum.to_string(),
        reason,
    }
}

/// Checksum of a builder image definition.
///
/// Blocking; callers on the runtime go through `spawn_blocking`.
pub fn compute_checksum(
    definition_file: &Path,
    definition_dir: &Path,
    exclude: &[String],
) -> DistroResult<String> {
    let mut hasher = Sha256::new();

    let definition = fs::read(definition_file)
        .map_err(|e| DistroError::io(format!("reading {}", definition_file.display()), e))?;
    hasher.update(&definition);

    if !definition_dir.is_dir() {
        debug!("No build-definition tree at {}", definition_dir.display());
        return Ok(hex::encode(hasher.finalize()));
    }

    let walker = WalkDir::new(definition_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_transient(e.file_name().to_str().unwrap_or_default(), exclude));

    for entry in walker {
        let entry = entry.map_err(|e| {
            DistroError::Internal(format!(
                "walking {}: {}",
                definition_dir.display(),
                e
            ))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(definition_dir)
            .unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        hash_file_into(entry.path(), &mut hasher)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

fn is_transient(name: &str, exclude: &[String]) -> bool {
    exclude.iter().any(|e| e == name) || TRANSIENT_SUFFIXES.iter().any(|s| name.ends_with(s))
}

fn hash_file_into(path: &Path, hasher: &mut Sha256) -> DistroResult<()> {
    let mut file =
        fs::File::open(path).map_err(|e| DistroError::io(format!("opening {}", path.display()), e))?;
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| DistroError::io(format!("reading {}", path.display()), e))?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buffer[..n]);
    }
}

/// Three-tier lookup for the builder image
pub struct BuilderImageCache<'a> {
    runtime: &'a dyn ContainerRuntime,
    builder: &'a BuilderConfig,
    root: PathBuf,
}

impl<'a> BuilderImageCache<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a Config) -> Self {
        Self::with_root(runtime, config, config.workspace.root.clone())
    }

    /// Cache reading the image definition below `root`
    pub fn with_root(runtime: &'a dyn ContainerRuntime, config: &'a Config, root: PathBuf) -> Self {
        Self {
            runtime,
            builder: &config.builder,
            root,
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Checksum of the current definition
    pub async fn checksum(&self) -> DistroResult<String> {
        let definition_file = self.resolve(&self.builder.dockerfile);
        let definition_dir = self.resolve(&self.builder.definition_dir);
        let exclude = self.builder.exclude.clone();

        if !definition_file.is_file() {
            return Err(DistroError::PathNotFound(definition_file));
        }

        tokio::task::spawn_blocking(move || {
            compute_checksum(&definition_file, &definition_dir, &exclude)
        })
        .await
        .map_err(|e| DistroError::Internal(format!("checksum task failed: {}", e)))?
    }

    /// Whether a fresh image is needed, judged against the local cache only
    pub async fn should_build_image(&self) -> DistroResult<ImageDecision> {
        let checksum = self.checksum().await?;
        self.decide_at(&checksum, chrono::Utc::now().timestamp())
            .await
    }

    async fn decide_at(&self, checksum: &str, now: i64) -> DistroResult<ImageDecision> {
        let local = self.builder.local_ref(checksum);
        let timestamp = self
            .runtime
            .image_label(&local, TIMESTAMP_LABEL)
            .await?
            .and_then(|value| value.trim().parse::<i64>().ok());

        Ok(decide(checksum, timestamp, now, self.builder.expiration_hours))
    }

    /// Make a usable builder image available locally and return its reference.
    pub async fn ensure_build_image(&self) -> DistroResult<String> {
        let decision = self.should_build_image().await?;
        self.ensure_with(decision).await
    }

    async fn ensure_with(&self, decision: ImageDecision) -> DistroResult<String> {
        let checksum = &decision.checksum;
        let local = self.builder.local_ref(checksum);
        let latest = self.builder.local_ref(LATEST_TAG);

        if !decision.should_build {
            debug!("Builder image {} {}", local, decision.reason);
            return Ok(local);
        }
        info!("Builder image {}: {}", local, decision.reason);

        let remote = self.builder.remote_ref(checksum);
        if let Some(remote) = &remote {
            match self.runtime.pull(remote).await {
                Ok(()) => {
                    self.runtime.tag(remote, &local).await?;
                    self.runtime.tag(remote, &latest).await?;
                    info!("Using builder image from registry: {}", remote);
                    return Ok(local);
                }
                Err(e) => info!("Builder image not in registry, building: {}", e),
            }
        }

        self.build(&latest).await?;
        self.runtime.tag(&latest, &local).await?;
        self.add_timestamp_label(&local).await?;

        if let Some(remote) = &remote {
            let published = match self.runtime.tag(&local, remote).await {
                Ok(()) => self.runtime.push(remote).await,
                Err(e) => Err(e),
            };
            match published {
                Ok(()) => info!("Published builder image {}", remote),
                Err(e) => warn!("Failed to publish builder image {}: {}", remote, e),
            }
        }

        Ok(local)
    }

    /// Produce `<name>:latest`, with the build script when one is configured
    async fn build(&self, latest: &str) -> DistroResult<()> {
        match &self.builder.build_script {
            Some(script) => self.run_build_script(&self.resolve(script), latest).await,
            None => {
                let dockerfile = self.resolve(&self.builder.dockerfile);
                let request = ImageBuildRequest {
                    context_dir: &self.root,
                    dockerfile: Some(&dockerfile),
                    tag: latest,
                    build_args: self.builder.build_env.clone(),
                    labels: BTreeMap::new(),
                };
                self.runtime.build_image(&request).await
            }
        }
    }

    async fn run_build_script(&self, script: &Path, latest: &str) -> DistroResult<()> {
        info!("Running {}", script.display());

        let mut child = tokio::process::Command::new(script)
            .current_dir(&self.root)
            .envs(&self.builder.build_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DistroError::command_failed(script.display().to_string(), e))?;

        let output = stream_child_output(&mut child, &|line| debug!("builder: {}", line)).await?;
        let status = child
            .wait()
            .await
            .map_err(|e| DistroError::command_failed(script.display().to_string(), e))?;

        if !status.success() {
            return Err(DistroError::ImageBuild {
                tag: latest.to_string(),
                reason: build_error_output(&output.join("\n"), ""),
            });
        }
        Ok(())
    }

    /// Rebuild `image` with only a timestamp label on top
    async fn add_timestamp_label(&self, image: &str) -> DistroResult<()> {
        let context = tempfile::TempDir::new()
            .map_err(|e| DistroError::io("creating label build context", e))?;
        tokio::fs::write(context.path().join("Dockerfile"), format!("FROM {}\n", image))
            .await
            .map_err(|e| DistroError::io("writing label Dockerfile", e))?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let request = ImageBuildRequest {
            context_dir: context.path(),
            dockerfile: None,
            tag: image,
            build_args: BTreeMap::new(),
            labels: BTreeMap::from([(TIMESTAMP_LABEL.to_string(), timestamp)]),
        };
        self.runtime.build_image(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::mock::MockRuntime;
    use tempfile::TempDir;

    const HOUR: i64 = 3600;

    #[test]
    fn decision_not_found() {
        let d = decide("abc123", None, 1000, 24);
        assert_eq!(
            d,
            ImageDecision {
                should_build: true,
                checksum: "abc123".to_string(),
                reason: "not found".to_string(),
            }
        );
    }

    #[test]
    fn decision_expired_default() {
        let d = decide("abc123", Some(1000), 1000 + 25 * HOUR, 24);
        assert!(d.should_build);
        assert_eq!(d.checksum, "abc123");
        assert!(d.reason.contains("expired"));
        assert!(d.reason.contains("24"));
    }

    #[test]
    fn decision_fresh() {
        let d = decide("abc123", Some(1000), 1000 + HOUR, 24);
        assert!(!d.should_build);
        assert_eq!(d.reason, "exists and is not expired");
    }

    #[test]
    fn decision_custom_expiration() {
        let d = decide("abc123", Some(1000), 1000 + 50 * HOUR, 48);
        assert!(d.should_build);
        assert!(d.reason.contains("expired"));
        assert!(d.reason.contains("48"));
    }

    #[test]
    fn decision_boundary_is_expired() {
        assert!(decide("abc123", Some(0), 24 * HOUR, 24).should_build);
        assert!(!decide("abc123", Some(1), 24 * HOUR, 24).should_build);
    }

    #[test]
    fn decision_huge_expiration_never_expires() {
        let d = decide("abc123", Some(1000), 4600, 3_000_000_000_000_000);
        assert!(!d.should_build);
        assert!(!decide("abc123", Some(0), 0, u64::MAX).should_build);
    }

    #[test]
    fn decision_ancient_timestamp_is_expired() {
        let d = decide("abc123", Some(i64::MIN), 1000, 24);
        assert!(d.should_build);
        assert!(d.reason.contains("expired"));
    }

    fn definition(temp: &TempDir) -> (PathBuf, PathBuf) {
        let dockerfile = temp.path().join("Dockerfile");
        let tree = temp.path().join("build");
        fs::write(&dockerfile, "FROM centos:stream9\n").unwrap();
        fs::create_dir_all(tree.join("tools")).unwrap();
        fs::write(tree.join("tools/setup.sh"), "echo setup").unwrap();
        (dockerfile, tree)
    }

    fn excludes() -> Vec<String> {
        BuilderConfig::default().exclude
    }

    #[test]
    fn checksum_is_deterministic() {
        let temp = TempDir::new().unwrap();
        let (dockerfile, tree) = definition(&temp);

        let a = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();
        let b = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn checksum_tracks_contents_and_paths() {
        let temp = TempDir::new().unwrap();
        let (dockerfile, tree) = definition(&temp);
        let before = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();

        fs::write(tree.join("tools/setup.sh"), "echo changed").unwrap();
        let changed = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();
        assert_ne!(before, changed);

        fs::rename(tree.join("tools/setup.sh"), tree.join("tools/init.sh")).unwrap();
        let renamed = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();
        assert_ne!(changed, renamed);
    }

    #[test]
    fn checksum_ignores_transient_files() {
        let temp = TempDir::new().unwrap();
        let (dockerfile, tree) = definition(&temp);
        let before = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();

        fs::create_dir_all(tree.join("tools/__pycache__")).unwrap();
        fs::write(tree.join("tools/__pycache__/x.cpython-312.pyc"), "bytecode").unwrap();
        fs::write(tree.join("tools/helper.pyc"), "bytecode").unwrap();

        let after = compute_checksum(&dockerfile, &tree, &excludes()).unwrap();
        assert_eq!(before, after);
    }

    fn config_for(temp: &TempDir) -> Config {
        definition(temp);
        let mut config = Config::default();
        config.workspace.root = temp.path().to_path_buf();
        config.builder.dockerfile = PathBuf::from("Dockerfile");
        config.builder.definition_dir = PathBuf::from("build");
        config.builder.registry = Some("registry.example.com/ci".to_string());
        config
    }

    #[tokio::test]
    async fn fresh_local_image_needs_nothing() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);
        let runtime = MockRuntime::new();
        let cache = BuilderImageCache::new(&runtime, &config);

        let checksum = cache.checksum().await.unwrap();
        let now = chrono::Utc::now().timestamp().to_string();
        runtime.add_image(
            &config.builder.local_ref(&checksum),
            &[(TIMESTAMP_LABEL, now.as_str())],
        );

        let image = cache.ensure_build_image().await.unwrap();
        assert_eq!(image, format!("distro_builder:{}", checksum));
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn registry_image_is_pulled_and_tagged() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);
        let runtime = MockRuntime::new();
        let cache = BuilderImageCache::new(&runtime, &config);

        let checksum = cache.checksum().await.unwrap();
        let remote = format!("registry.example.com/ci/distro_builder:{}", checksum);
        runtime.remote.lock().unwrap().insert(remote.clone());

        cache.ensure_build_image().await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                format!("pull {}", remote),
                format!("tag {} distro_builder:{}", remote, checksum),
                format!("tag {} distro_builder:latest", remote),
            ]
        );
    }

    #[tokio::test]
    async fn missing_image_is_built_labeled_and_pushed() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);
        let runtime = MockRuntime::new();
        let cache = BuilderImageCache::new(&runtime, &config);

        let checksum = cache.checksum().await.unwrap();
        let local = format!("distro_builder:{}", checksum);
        let remote = format!("registry.example.com/ci/{}", local);

        cache.ensure_build_image().await.unwrap();

        assert_eq!(
            runtime.calls(),
            vec![
                format!("pull {}", remote),
                "build distro_builder:latest".to_string(),
                format!("tag distro_builder:latest {}", local),
                format!("build {}", local),
                format!("tag {} {}", local, remote),
                format!("push {}", remote),
            ]
        );

        // The new image is fresh on the next lookup
        let decision = cache.should_build_image().await.unwrap();
        assert!(!decision.should_build);
    }

    #[tokio::test]
    async fn push_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);
        let mut runtime = MockRuntime::new();
        runtime.fail_push = true;
        let cache = BuilderImageCache::new(&runtime, &config);

        let image = cache.ensure_build_image().await.unwrap();
        assert!(runtime.images.lock().unwrap().contains_key(&image));
    }

    #[tokio::test]
    async fn expired_image_is_rebuilt() {
        let temp = TempDir::new().unwrap();
        let mut config = config_for(&temp);
        config.builder.registry = None;
        let runtime = MockRuntime::new();
        let cache = BuilderImageCache::new(&runtime, &config);

        let checksum = cache.checksum().await.unwrap();
        let old = (chrono::Utc::now().timestamp() - 48 * HOUR).to_string();
        runtime.add_image(
            &config.builder.local_ref(&checksum),
            &[(TIMESTAMP_LABEL, old.as_str())],
        );

        let decision = cache.should_build_image().await.unwrap();
        assert!(decision.should_build);
        assert_eq!(decision.reason, "expired (>24h old)");

        cache.ensure_build_image().await.unwrap();
        assert!(runtime
            .calls()
            .contains(&"build distro_builder:latest".to_string()));
    }

    #[tokio::test]
    async fn missing_definition_file_is_reported() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.workspace.root = temp.path().to_path_buf();
        let runtime = MockRuntime::new();

        let err = BuilderImageCache::new(&runtime, &config)
            .should_build_image()
            .await
            .unwrap_err();
        assert!(matches!(err, DistroError::PathNotFound(_)));
    }
}
