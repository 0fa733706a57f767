//! Single-component builds
//!
//! A [`ComponentBuilder`] turns one [`ComponentSpec`] into an artifact,
//! either by a revalidated download or by running the component's build
//! command in the builder image. Both paths go through the artifact store.
//! List-valued manifest entries are fanned out by the orchestrator; a
//! builder only ever sees one element.

use crate::artifact::{compress_artifact, find_artifact_in_dir};
use crate::builder::graph::base_name;
use crate::download::download_artifact;
use crate::error::{DistroError, DistroResult};
use crate::manifest::{CommandLine, ComponentSpec};
use crate::orchestration::{ContainerConfig, ContainerRuntime};
use crate::store::{build_key, download_key, ArtifactStore, CompressionSalt, FetchOutcome};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// Workspace root inside the build container
pub const CONTAINER_SRC: &str = "/src";
/// Build-scratch directory inside the build container
pub const CONTAINER_BUILD: &str = "/build";
/// Output directory inside the build container
pub const CONTAINER_OUTPUT: &str = "/output";
/// Parent of the per-dependency mount points
pub const CONTAINER_DEPS: &str = "/deps";
/// Environment variable advertising dependency mount points to the entry point
pub const DEPENDENCY_PATHS_ENV: &str = "DEPENDENCY_INSTALL_PATHS";

/// Pattern used when neither the manifest nor the component table names one
pub const DEFAULT_ARTIFACT_PATTERN: &str = "*.tar";

/// Default artifact glob by base component name
pub fn default_artifact_pattern(component: &str) -> &'static str {
    match base_name(component) {
        "kernel" => "kernel-*.rpms.tar",
        "sdk" => "sdk-*.tar",
        "platform-stack" => "platform-stack-*.tar",
        "forwarding-stack" => "forwarding-stack-*.tar",
        "bsps" => "bsp-*.tar",
        _ => DEFAULT_ARTIFACT_PATTERN,
    }
}

/// Files produced for one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentArtifact {
    /// Empty component, present only for sequencing
    Empty,
    Single(PathBuf),
    /// One file per non-empty element of a list-valued entry
    Multiple(Vec<PathBuf>),
}

impl ComponentArtifact {
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            Self::Empty => &[],
            Self::Single(path) => std::slice::from_ref(path),
            Self::Multiple(paths) => paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths().is_empty()
    }
}

/// Directory holding a component's `.build` and `dist` directories.
///
/// `script` is relative to the workspace root. The result is the prefix of
/// `script` up to the last segment equal to `component`, or the script's
/// parent when the name does not appear.
pub fn component_directory(component: &str, script: &Path) -> PathBuf {
    let parts: Vec<Component<'_>> = script.components().collect();
    let parent = || script.parent().map(Path::to_path_buf).unwrap_or_default();

    // The file name itself never counts as the component directory
    let dirs = parts.len().saturating_sub(1);
    match parts[..dirs]
        .iter()
        .rposition(|c| c.as_os_str() == component)
    {
        Some(i) => parts[..=i].iter().collect(),
        None => parent(),
    }
}

/// Longest common ancestor of two absolute paths
fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Builds one component (or one element of a list-valued component)
pub struct ComponentBuilder<'a> {
    name: String,
    spec: &'a ComponentSpec,
    manifest_dir: &'a Path,
    store: &'a ArtifactStore,
    runtime: &'a dyn ContainerRuntime,
    image: Option<&'a str>,
    dependency_artifacts: BTreeMap<String, ComponentArtifact>,
    compress: bool,
}

impl<'a> ComponentBuilder<'a> {
    pub fn new(
        name: impl Into<String>,
        spec: &'a ComponentSpec,
        manifest_dir: &'a Path,
        store: &'a ArtifactStore,
        runtime: &'a dyn ContainerRuntime,
    ) -> Self {
        Self {
            name: name.into(),
            spec,
            manifest_dir,
            store,
            runtime,
            image: None,
            dependency_artifacts: BTreeMap::new(),
            compress: false,
        }
    }

    /// Builder image used for execute steps
    pub fn image(mut self, image: &'a str) -> Self {
        self.image = Some(image);
        self
    }

    /// Artifacts of already-built dependencies, mounted into the container
    pub fn dependencies(mut self, artifacts: BTreeMap<String, ComponentArtifact>) -> Self {
        self.dependency_artifacts = artifacts;
        self
    }

    /// Compress execute-step artifacts before they are stored
    pub fn compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Produce the component's artifact
    pub async fn build(&self) -> DistroResult<ComponentArtifact> {
        match self.spec {
            ComponentSpec::Empty => {
                info!("Component '{}' is empty, skipping", self.name);
                Ok(ComponentArtifact::Empty)
            }
            ComponentSpec::Download { url } => self.download(url).await,
            ComponentSpec::Execute { command, artifact } => {
                let pattern = artifact
                    .clone()
                    .unwrap_or_else(|| default_artifact_pattern(&self.name).to_string());
                self.execute(command, &pattern).await
            }
        }
    }

    async fn download(&self, url: &str) -> DistroResult<ComponentArtifact> {
        let key = download_key(&self.name, url);

        tokio::fs::create_dir_all(self.store.root())
            .await
            .map_err(|e| DistroError::io(format!("creating {}", self.store.root().display()), e))?;
        // Scratch lives on the store's filesystem so committing is a rename
        let scratch = tempfile::TempDir::new_in(self.store.root())
            .map_err(|e| DistroError::io("creating download scratch directory", e))?;

        let files = self
            .store
            .get(&key, |current| {
                download_artifact(url, self.manifest_dir, current, scratch.path())
            })
            .await?;

        let artifact = self.single_data_file(files.data)?;
        info!("{} artifact ready: {}", self.name, artifact.display());
        if !files.metadata.is_empty() {
            debug!("  with {} metadata file(s)", files.metadata.len());
        }
        Ok(ComponentArtifact::Single(artifact))
    }

    async fn execute(&self, command: &CommandLine, pattern: &str) -> DistroResult<ComponentArtifact> {
        let salt = CompressionSalt::from_enabled(self.compress);
        let key = build_key(&self.name, &command.key_material(), salt);

        // Always a miss: the build runs every time and the store only
        // persists its result across runs
        let files = self
            .store
            .get(&key, |_current| async move {
                let artifact = self.run_build(command, pattern).await?;
                Ok(FetchOutcome::Miss {
                    data: vec![artifact],
                    metadata: Vec::new(),
                })
            })
            .await?;

        let artifact = self.single_data_file(files.data)?;
        info!("{} build complete: {}", self.name, artifact.display());
        Ok(ComponentArtifact::Single(artifact))
    }

    fn single_data_file(&self, mut data: Vec<PathBuf>) -> DistroResult<PathBuf> {
        if data.len() != 1 {
            return Err(DistroError::DataFileCount {
                component: self.name.clone(),
                count: data.len(),
            });
        }
        Ok(data.remove(0))
    }

    /// Run the build command in the builder image and locate its artifact
    async fn run_build(&self, command: &CommandLine, pattern: &str) -> DistroResult<PathBuf> {
        let image = self.image.ok_or_else(|| {
            DistroError::Internal(format!("no builder image for '{}'", self.name))
        })?;

        let args = command.to_args();
        let Some((program, rest)) = args.split_first() else {
            return Err(DistroError::ComponentInvalid {
                component: self.name.clone(),
                reason: "empty execute command".to_string(),
            });
        };

        let manifest_dir = tokio::fs::canonicalize(self.manifest_dir)
            .await
            .unwrap_or_else(|_| self.manifest_dir.to_path_buf());
        let script = manifest_dir.join(program);
        let script = tokio::fs::canonicalize(&script).await.map_err(|_| {
            DistroError::BuildScriptNotFound {
                component: self.name.clone(),
                path: script.clone(),
            }
        })?;

        let src_dir = common_ancestor(&script, &manifest_dir);
        let script_rel = script
            .strip_prefix(&src_dir)
            .map_err(|_| DistroError::Internal("script outside workspace root".to_string()))?
            .to_path_buf();
        let artifact_base = src_dir.join(component_directory(base_name(&self.name), &script_rel));

        let build_dir = artifact_base.join(".build");
        let dist_dir = artifact_base.join("dist");
        for dir in [&build_dir, &dist_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DistroError::io(format!("creating {}", dir.display()), e))?;
        }

        let mut config = ContainerConfig::new(image, CONTAINER_SRC);
        info!("Mounting {} as {}", src_dir.display(), CONTAINER_SRC);
        config.mount(&src_dir, CONTAINER_SRC);
        config.mount(&build_dir, CONTAINER_BUILD);
        config.mount(&dist_dir, CONTAINER_OUTPUT);
        self.mount_dependencies(&mut config)?;

        let container_script = Path::new(CONTAINER_SRC).join(&script_rel);
        let mut container_cmd = vec![container_script.display().to_string()];
        container_cmd.extend(rest.iter().cloned());
        info!("Container command: {:?}", container_cmd);

        let code = self.runtime.run(&config, &container_cmd).await?;
        if code != 0 {
            return Err(DistroError::BuildFailed {
                component: self.name.clone(),
                code,
            });
        }

        let artifact = find_artifact_in_dir(&dist_dir, pattern, &self.name)?;
        if self.compress {
            compress_artifact(&artifact, &self.name).await
        } else {
            Ok(artifact)
        }
    }

    fn mount_dependencies(&self, config: &mut ContainerConfig) -> DistroResult<()> {
        let mut install_paths = BTreeMap::new();

        for (dep, artifact) in &self.dependency_artifacts {
            let mount_dir = format!("{}/{}", CONTAINER_DEPS, dep);
            for path in artifact.paths() {
                let file_name = path.file_name().ok_or_else(|| {
                    DistroError::Internal(format!("artifact {} has no file name", path.display()))
                })?;
                let target = format!("{}/{}", mount_dir, file_name.to_string_lossy());
                info!("Mounting dependency '{}' at {}: {}", dep, target, path.display());
                config.mount(path, &target);
            }
            if !artifact.is_empty() {
                install_paths.insert(dep.clone(), mount_dir);
            }
        }

        if !install_paths.is_empty() {
            config.env.insert(
                DEPENDENCY_PATHS_ENV.to_string(),
                serde_json::to_string(&install_paths)?,
            );
        }
        Ok(())
    }
}
