//! Distribution image orchestration
//!
//! [`ImageBuilder`] walks the component graph, builds every component the
//! manifest names (dependencies first, each at most once per run), stages
//! the artifacts for the assembly container and moves the finished images
//! to the destinations the manifest asks for.

use crate::artifact::find_artifact_in_dir;
use crate::builder::component::{ComponentArtifact, ComponentBuilder};
use crate::builder::graph::BuildGraph;
use crate::builder_image::BuilderImageCache;
use crate::config::Config;
use crate::error::{DistroError, DistroResult};
use crate::manifest::{ComponentEntry, ComponentSpec, DistributionFormat, ImageBuildHooks, Manifest};
use crate::orchestration::{ContainerConfig, ContainerRuntime};
use crate::store::ArtifactStore;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Builder directory inside the assembly container
const CONTAINER_IMAGE_BUILDER: &str = "/image_builder";
/// Assembly entry point inside the assembly container
const ASSEMBLY_SCRIPT: &str = "/image_builder/bin/build_image_in_container.sh";
/// Staging directory name under the image builder directory
const STAGING_DIR: &str = "deps_staging";
/// Output directory name under the image builder directory
const OUTPUT_DIR: &str = "output";

/// A user hook copied into the image template
struct Hook {
    key: &'static str,
    file_name: &'static str,
    flag: &'static str,
    source: fn(&ImageBuildHooks) -> Option<&PathBuf>,
}

const HOOKS: [Hook; 2] = [
    Hook {
        key: "after_pkgs_install",
        file_name: "after_pkgs_install_file.json",
        flag: "--after-pkgs-input-file",
        source: |hooks| hooks.after_pkgs_install.as_ref(),
    },
    Hook {
        key: "after_pkgs_execute",
        file_name: "after_pkgs_execute_file.json",
        flag: "--after-pkgs-execute-file",
        source: |hooks| hooks.after_pkgs_execute.as_ref(),
    },
];

/// Removes the staging directory when dropped, on success and error paths
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    async fn create(path: PathBuf) -> DistroResult<Self> {
        // A crashed run may have left one behind
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| DistroError::io(format!("removing stale {}", path.display()), e))?;
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| DistroError::io(format!("creating {}", path.display()), e))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Cleaned up staging directory: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// Builds components and the final distribution image for one manifest
pub struct ImageBuilder<'a> {
    manifest: &'a Manifest,
    config: &'a Config,
    runtime: &'a dyn ContainerRuntime,
    store: ArtifactStore,
    graph: BuildGraph,
    component_artifacts: BTreeMap<String, ComponentArtifact>,
    compress_artifacts: bool,
    debug_image: bool,
    builder_image: Option<String>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(
        manifest: &'a Manifest,
        config: &'a Config,
        runtime: &'a dyn ContainerRuntime,
    ) -> DistroResult<Self> {
        Ok(Self {
            manifest,
            config,
            runtime,
            store: ArtifactStore::new(config.store_root()),
            graph: BuildGraph::standard()?,
            component_artifacts: BTreeMap::new(),
            compress_artifacts: false,
            debug_image: false,
            builder_image: None,
        })
    }

    /// Pass `--debug` to the image assembly
    pub fn debug_image(mut self, debug: bool) -> Self {
        self.debug_image = debug;
        self
    }

    /// Artifacts built so far, by component
    pub fn component_artifacts(&self) -> &BTreeMap<String, ComponentArtifact> {
        &self.component_artifacts
    }

    /// Build every component in the manifest, then the distribution image.
    ///
    /// Artifacts are consumed right away, so they are not compressed.
    pub async fn build_all(&mut self) -> DistroResult<()> {
        info!("Building distribution image");
        self.compress_artifacts = false;

        let manifest = self.manifest;
        for name in manifest.components.keys() {
            if !self.graph.contains(name) {
                warn!("Ignoring unknown component '{}' in manifest", name);
            }
        }

        for component in self.graph.order().to_vec() {
            if manifest.has_component(&component) && !self.component_artifacts.contains_key(&component) {
                self.build_component(&component).await?;
            }
        }

        self.build_base_image().await
    }

    /// Build only `names` (plus their dependencies), compressing results so
    /// later runs and other hosts can reuse them.
    pub async fn build_components(&mut self, names: &[String]) -> DistroResult<()> {
        info!("Building components: {}", names.join(", "));

        for name in names {
            if !self.manifest.has_component(name) {
                return Err(DistroError::ComponentNotFound(name.clone()));
            }
            if !self.graph.contains(name) {
                return Err(DistroError::UnknownComponent(name.clone()));
            }
        }
        self.compress_artifacts = true;

        for component in self.graph.order().to_vec() {
            if names.contains(&component) && !self.component_artifacts.contains_key(&component) {
                self.build_component(&component).await?;
            }
        }
        Ok(())
    }

    /// Build every direct dependency of `component` that is not built yet
    pub async fn ensure_dependencies_built(&mut self, component: &str) -> DistroResult<()> {
        for dep in self.graph.dependencies(component).to_vec() {
            if self.component_artifacts.contains_key(&dep) {
                debug!("Dependency '{}' already built for '{}'", dep, component);
                continue;
            }

            if !self.manifest.has_component(&dep) {
                return Err(DistroError::MissingDependency {
                    component: component.to_string(),
                    dependency: dep,
                });
            }

            info!("Building dependency '{}' for '{}'", dep, component);
            Box::pin(self.build_component(&dep)).await?;
        }
        Ok(())
    }

    /// Build one manifest component, fanning list entries out per element
    pub async fn build_component(&mut self, component: &str) -> DistroResult<()> {
        info!("Building: {}", component);
        let manifest = self.manifest;

        let artifact = match manifest.component(component)? {
            ComponentEntry::Single(spec) => {
                self.ensure_dependencies_built(component).await?;
                self.build_element(component, spec).await?
            }
            ComponentEntry::Many(specs) => {
                let mut paths = Vec::new();
                for (idx, spec) in specs.iter().enumerate() {
                    let element = format!("{}[{}]", component, idx);
                    info!("Building: {}", element);

                    self.ensure_dependencies_built(&element).await?;
                    let artifact = self.build_element(&element, spec).await?;
                    paths.extend(artifact.paths().iter().cloned());
                }
                if paths.is_empty() {
                    ComponentArtifact::Empty
                } else {
                    ComponentArtifact::Multiple(paths)
                }
            }
        };

        self.component_artifacts
            .insert(component.to_string(), artifact);
        Ok(())
    }

    async fn build_element(&mut self, name: &str, spec: &ComponentSpec) -> DistroResult<ComponentArtifact> {
        let dependencies: BTreeMap<String, ComponentArtifact> = self
            .graph
            .dependencies(name)
            .iter()
            .filter_map(|dep| {
                self.component_artifacts
                    .get(dep)
                    .map(|artifact| (dep.clone(), artifact.clone()))
            })
            .collect();

        let image = match spec {
            ComponentSpec::Execute { .. } => Some(self.builder_image().await?),
            _ => None,
        };

        let mut builder = ComponentBuilder::new(
            name,
            spec,
            &self.manifest.manifest_dir,
            &self.store,
            self.runtime,
        )
        .dependencies(dependencies)
        .compress(self.compress_artifacts);
        if let Some(image) = &image {
            builder = builder.image(image);
        }

        builder.build().await
    }

    /// Builder image reference, ensured once per run
    async fn builder_image(&mut self) -> DistroResult<String> {
        if let Some(image) = &self.builder_image {
            return Ok(image.clone());
        }
        let image = BuilderImageCache::new(self.runtime, self.config)
            .ensure_build_image()
            .await?;
        self.builder_image = Some(image.clone());
        Ok(image)
    }

    /// Assemble the distribution image from the built components
    pub async fn build_base_image(&mut self) -> DistroResult<()> {
        info!("Starting base OS image build");

        let manifest = self.manifest;
        let formats = &manifest.distribution_formats;
        if formats.is_empty() {
            return Err(DistroError::NoDistributionFormats);
        }

        let builder_dir = self.config.image_builder_dir();
        info!("Using image builder: {}", builder_dir.display());
        let image = self.builder_image().await?;

        let mut command = vec![ASSEMBLY_SCRIPT.to_string()];
        if formats.contains_key(&DistributionFormat::Usb)
            || formats.contains_key(&DistributionFormat::Pxe)
        {
            command.push("--build-pxe-usb".to_string());
        }
        if formats.contains_key(&DistributionFormat::Onie) {
            command.push("--build-onie".to_string());
        }
        if self.debug_image {
            command.push("--debug".to_string());
        }

        let staging = StagingDir::create(builder_dir.join(STAGING_DIR)).await?;
        self.stage_component_artifacts(staging.path()).await?;
        self.install_hooks(&builder_dir, &mut command).await?;

        let mut config = ContainerConfig::new(&image, CONTAINER_IMAGE_BUILDER);
        config.privileged = true;
        config.mount(&builder_dir, CONTAINER_IMAGE_BUILDER);
        config.mount(Path::new("/dev"), "/dev");

        let code = self.runtime.run(&config, &command).await?;
        if code != 0 {
            return Err(DistroError::ImageAssemblyFailed(code));
        }

        let output_dir = builder_dir.join(OUTPUT_DIR);
        for format in DistributionFormat::all() {
            if let Some(dest) = formats.get(format) {
                self.move_distribution_file(&output_dir, *format, dest).await?;
            }
        }

        info!("Finished base OS image build");
        drop(staging);
        Ok(())
    }

    /// Copy every artifact into `<staging>/<component>/`. Copies, not moves,
    /// keep the store's files intact.
    async fn stage_component_artifacts(&self, staging: &Path) -> DistroResult<()> {
        if self.component_artifacts.is_empty() {
            return Err(DistroError::NothingToStage);
        }
        info!("Staging component artifacts in {}", staging.display());

        for (component, artifact) in &self.component_artifacts {
            if artifact.is_empty() {
                continue;
            }

            let component_dir = staging.join(component);
            tokio::fs::create_dir_all(&component_dir)
                .await
                .map_err(|e| DistroError::io(format!("creating {}", component_dir.display()), e))?;

            for path in artifact.paths() {
                let Some(name) = path.file_name() else {
                    continue;
                };
                tokio::fs::copy(path, component_dir.join(name))
                    .await
                    .map_err(|e| DistroError::io(format!("staging {}", path.display()), e))?;
                info!("Staged {}: {}", component, name.to_string_lossy());
            }
        }
        Ok(())
    }

    /// Copy user hooks to their fixed names in the template directory and
    /// append the matching flags
    async fn install_hooks(&self, builder_dir: &Path, command: &mut Vec<String>) -> DistroResult<()> {
        let template_dir = builder_dir.join(&self.config.image.template_dir);
        let hooks = &self.manifest.image_build_hooks;

        for hook in &HOOKS {
            // Hooks from a previous run must not leak into this one
            let target = template_dir.join(hook.file_name);
            match tokio::fs::remove_file(&target).await {
                Ok(()) => debug!("Removed stale hook {}", target.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(DistroError::io(
                        format!("removing stale hook {}", target.display()),
                        e,
                    ))
                }
            }

            let Some(source) = (hook.source)(hooks) else {
                continue;
            };

            let source = self.manifest.resolve(source);
            if !source.is_file() {
                return Err(DistroError::HookNotFound {
                    hook: hook.key.to_string(),
                    path: source,
                });
            }

            tokio::fs::create_dir_all(&template_dir)
                .await
                .map_err(|e| DistroError::io(format!("creating {}", template_dir.display()), e))?;
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| DistroError::io(format!("copying hook {}", source.display()), e))?;
            info!("Copied {} to {}", source.display(), template_dir.display());

            command.push(hook.flag.to_string());
            command.push(hook.file_name.to_string());
        }
        Ok(())
    }

    async fn move_distribution_file(
        &self,
        output_dir: &Path,
        format: DistributionFormat,
        dest: &Path,
    ) -> DistroResult<()> {
        let pattern = format!("{}.{}", self.config.image.output_name, format.extension());
        let output = find_artifact_in_dir(output_dir, &pattern, "Base image")?;
        let dest = self.manifest.resolve(dest);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DistroError::io(format!("creating {}", parent.display()), e))?;
        }
        if tokio::fs::rename(&output, &dest).await.is_err() {
            tokio::fs::copy(&output, &dest)
                .await
                .map_err(|e| DistroError::io(format!("copying {}", output.display()), e))?;
            tokio::fs::remove_file(&output)
                .await
                .map_err(|e| DistroError::io(format!("removing {}", output.display()), e))?;
        }

        info!("{} image: {}", format, dest.display());
        Ok(())
    }
}
