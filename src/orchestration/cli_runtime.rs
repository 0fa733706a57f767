//! Container runtime backed by the docker or podman CLI
//!
//! Both engines accept the same subset of commands used here, so a single
//! implementation parameterized by the executable covers them.

use crate::config::schema::Engine;
use crate::error::{DistroError, DistroResult};
use crate::orchestration::container::ContainerConfig;
use crate::orchestration::runtime::{ContainerRuntime, ImageBuildRequest};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Container runtime invoking an engine CLI
pub struct CliRuntime {
    engine: Engine,
}

impl CliRuntime {
    /// Create a runtime for the given engine
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    fn binary(&self) -> &'static str {
        self.engine.binary()
    }

    /// Execute an engine command and return the output
    async fn exec(&self, args: &[&str]) -> DistroResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.binary(), args);

        Command::new(self.binary())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DistroError::command_failed(format!("{} {:?}", self.binary(), args), e))
    }

    /// Execute an engine command with the terminal attached
    async fn exec_interactive(&self, args: &[String]) -> DistroResult<i32> {
        debug!("Executing attached: {} {:?}", self.binary(), args);

        let status = Command::new(self.binary())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| DistroError::command_failed(format!("{} {:?}", self.binary(), args), e))?;

        // Killed by a signal: report like a shell would
        Ok(status.code().unwrap_or(-1))
    }

    /// Build the argument list for `run`
    fn run_args(config: &ContainerConfig, command: &[String]) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];

        if config.privileged {
            args.push("--privileged".to_string());
        }

        args.push("-w".to_string());
        args.push(config.workdir.clone());
        args.push("--network".to_string());
        args.push(config.network.clone());

        for v in &config.volumes {
            args.push("-v".to_string());
            args.push(v.clone());
        }
        for (k, v) in &config.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(config.image.clone());
        args.extend(command.iter().cloned());
        args
    }

    /// Build the argument list for `build`
    fn build_args(request: &ImageBuildRequest<'_>) -> Vec<String> {
        let mut args = vec!["build".to_string(), "-t".to_string(), request.tag.to_string()];

        if let Some(dockerfile) = request.dockerfile {
            args.push("-f".to_string());
            args.push(dockerfile.display().to_string());
        }
        for (k, v) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", k, v));
        }
        for (k, v) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(request.context_dir.display().to_string());
        args
    }
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn is_available(&self) -> DistroResult<bool> {
        Ok(Command::new(self.binary())
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false))
    }

    async fn image_label(&self, image: &str, label: &str) -> DistroResult<Option<String>> {
        let format = format!("{{{{ index .Config.Labels \"{}\" }}}}", label);
        let output = self
            .exec(&["image", "inspect", "--format", &format, image])
            .await?;

        if !output.status.success() {
            return Ok(None);
        }

        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() || value == "<no value>" {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    async fn pull(&self, image: &str) -> DistroResult<()> {
        info!("Pulling image: {}", image);

        let output = self.exec(&["pull", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DistroError::ImagePull {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn tag(&self, source: &str, target: &str) -> DistroResult<()> {
        debug!("Tagging {} as {}", source, target);

        let output = self.exec(&["tag", source, target]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DistroError::command_exec(
                format!("{} tag", self.binary()),
                stderr,
            ))
        }
    }

    async fn push(&self, image: &str) -> DistroResult<()> {
        info!("Pushing image: {}", image);

        let output = self.exec(&["push", image]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DistroError::ImagePush {
                image: image.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn build_image(&self, request: &ImageBuildRequest<'_>) -> DistroResult<()> {
        let args = Self::build_args(request);
        debug!("Building image: {} {:?}", self.binary(), args);

        let mut child = Command::new(self.binary())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DistroError::command_failed(format!("{} build", self.binary()), e))?;

        let all_output = super::stream_child_output(&mut child, &|line| debug!("build: {}", line))
            .await?;

        let status = child
            .wait()
            .await
            .map_err(|e| DistroError::command_failed(format!("{} build", self.binary()), e))?;

        if !status.success() {
            let combined = all_output.join("\n");
            return Err(DistroError::ImageBuild {
                tag: request.tag.to_string(),
                reason: super::build_error_output(&combined, ""),
            });
        }

        Ok(())
    }

    async fn run(&self, config: &ContainerConfig, command: &[String]) -> DistroResult<i32> {
        let args = Self::run_args(config, command);
        info!("Running container from {}", config.image);
        self.exec_interactive(&args).await
    }

    fn runtime_name(&self) -> &'static str {
        match self.engine {
            Engine::Docker => "Docker",
            Engine::Podman => "Podman",
        }
    }
}
