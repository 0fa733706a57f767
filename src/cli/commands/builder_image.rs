//! Builder-image command - inspect or refresh the build environment

use crate::builder_image::BuilderImageCache;
use crate::cli::args::{BuilderImageAction, BuilderImageArgs};
use crate::config::Config;
use crate::error::DistroResult;
use crate::orchestration::create_runtime;
use crate::ui::{self, UiContext};

/// Execute the builder-image command
pub async fn execute(args: BuilderImageArgs, config: &Config) -> DistroResult<()> {
    let ctx = UiContext::detect();
    let runtime = create_runtime(config).await?;

    match args.action {
        BuilderImageAction::Status { root } => {
            let root = root.unwrap_or_else(|| config.workspace.root.clone());
            let cache = BuilderImageCache::with_root(&*runtime, config, root);
            let decision = cache.should_build_image().await?;
            ui::section(&ctx, "Builder image");
            ui::key_value(&ctx, "image", &config.builder.local_ref(&decision.checksum));
            if let Some(remote) = config.builder.remote_ref(&decision.checksum) {
                ui::key_value(&ctx, "registry", &remote);
            }
            ui::key_value(&ctx, "runtime", runtime.runtime_name());
            ui::key_value_status(&ctx, "state", &decision.reason, !decision.should_build);
        }
        BuilderImageAction::Ensure => {
            let image = BuilderImageCache::new(&*runtime, config).ensure_build_image().await?;
            ui::step_ok_detail(&ctx, "Builder image ready", &image);
        }
    }

    Ok(())
}
