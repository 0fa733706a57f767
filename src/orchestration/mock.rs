//! In-memory container runtime for unit tests

use crate::error::{DistroError, DistroResult};
use crate::orchestration::container::ContainerConfig;
use crate::orchestration::runtime::{ContainerRuntime, ImageBuildRequest};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

type RunHook = Box<dyn Fn(&ContainerConfig, &[String]) -> i32 + Send + Sync>;

/// Mock runtime: images are label maps, runs call a hook instead of a container
pub struct MockRuntime {
    /// Local images and their labels
    pub images: Mutex<HashMap<String, BTreeMap<String, String>>>,
    /// Images available in the registry
    pub remote: Mutex<HashSet<String>>,
    /// Every operation, in order ("pull x", "tag a b", ...)
    pub calls: Mutex<Vec<String>>,
    /// Configurations passed to `run`, with their commands
    pub runs: Mutex<Vec<(ContainerConfig, Vec<String>)>>,
    /// Make `push` fail
    pub fail_push: bool,
    on_run: RunHook,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::with_run(|_, _| 0)
    }

    /// Mock whose `run` delegates to `hook` and returns its exit code
    pub fn with_run(
        hook: impl Fn(&ContainerConfig, &[String]) -> i32 + Send + Sync + 'static,
    ) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            remote: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
            fail_push: false,
            on_run: Box::new(hook),
        }
    }

    /// Add a local image with labels
    pub fn add_image(&self, image: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.images.lock().unwrap().insert(image.to_string(), labels);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn is_available(&self) -> DistroResult<bool> {
        Ok(true)
    }

    async fn image_label(&self, image: &str, label: &str) -> DistroResult<Option<String>> {
        Ok(self
            .images
            .lock()
            .unwrap()
            .get(image)
            .and_then(|labels| labels.get(label).cloned()))
    }

    async fn pull(&self, image: &str) -> DistroResult<()> {
        self.record(format!("pull {}", image));
        if !self.remote.lock().unwrap().contains(image) {
            return Err(DistroError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        let mut images = self.images.lock().unwrap();
        images
            .entry(image.to_string())
            .or_insert_with(|| BTreeMap::from([("build_timestamp".to_string(), "0".to_string())]));
        Ok(())
    }

    async fn tag(&self, source: &str, target: &str) -> DistroResult<()> {
        self.record(format!("tag {} {}", source, target));
        let mut images = self.images.lock().unwrap();
        let labels = images
            .get(source)
            .cloned()
            .ok_or_else(|| DistroError::command_exec("tag", format!("no such image {}", source)))?;
        images.insert(target.to_string(), labels);
        Ok(())
    }

    async fn push(&self, image: &str) -> DistroResult<()> {
        self.record(format!("push {}", image));
        if self.fail_push {
            return Err(DistroError::ImagePush {
                image: image.to_string(),
                reason: "denied".to_string(),
            });
        }
        self.remote.lock().unwrap().insert(image.to_string());
        Ok(())
    }

    async fn build_image(&self, request: &ImageBuildRequest<'_>) -> DistroResult<()> {
        self.record(format!("build {}", request.tag));
        self.images
            .lock()
            .unwrap()
            .insert(request.tag.to_string(), request.labels.clone());
        Ok(())
    }

    async fn run(&self, config: &ContainerConfig, command: &[String]) -> DistroResult<i32> {
        self.record(format!("run {} {}", config.image, command.join(" ")));
        self.runs
            .lock()
            .unwrap()
            .push((config.clone(), command.to_vec()));
        Ok((self.on_run)(config, command))
    }

    fn runtime_name(&self) -> &'static str {
        "Mock"
    }
}
