//! Build command - build components or a full distribution image

use crate::builder::ImageBuilder;
use crate::cli::args::BuildArgs;
use crate::config::Config;
use crate::error::DistroResult;
use crate::manifest::Manifest;
use crate::orchestration::create_runtime;
use crate::ui::{self, UiContext};
use std::time::Instant;
use tracing::debug;

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> DistroResult<()> {
    let ctx = UiContext::detect();
    let started = Instant::now();

    let manifest = Manifest::load(&args.manifest).await?;
    debug!("Manifest directory: {}", manifest.manifest_dir.display());

    let runtime = create_runtime(config).await?;

    let mut builder = ImageBuilder::new(&manifest, config, &*runtime)?.debug_image(args.debug_image);

    if args.components.is_empty() {
        builder.build_all().await?;
        for (format, dest) in &manifest.distribution_formats {
            ui::step_ok_detail(
                &ctx,
                &format!("{} image", format),
                &manifest.resolve(dest).display().to_string(),
            );
        }
    } else {
        builder.build_components(&args.components).await?;
        for (component, artifact) in builder.component_artifacts() {
            if artifact.is_empty() {
                ui::step_info(&ctx, &format!("{}: no artifact", component));
            }
            for path in artifact.paths() {
                ui::step_ok_detail(&ctx, component, &path.display().to_string());
            }
        }
    }

    ui::step_ok(
        &ctx,
        &format!("Build finished in {:.1}s", started.elapsed().as_secs_f64()),
    );
    Ok(())
}
