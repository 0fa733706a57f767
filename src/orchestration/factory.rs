//! Runtime factory
//!
//! Picks the container engine from configuration and checks that it is
//! installed before any build starts.

use crate::config::Config;
use crate::error::{DistroError, DistroResult};
use crate::orchestration::cli_runtime::CliRuntime;
use crate::orchestration::runtime::ContainerRuntime;
use tracing::debug;

/// Create the container runtime named by `[runtime] engine`
///
/// # Returns
/// * `Ok(Box<dyn ContainerRuntime>)` - A boxed runtime implementation
/// * `Err` - If the engine binary cannot be executed
pub async fn create_runtime(config: &Config) -> DistroResult<Box<dyn ContainerRuntime>> {
    let engine = config.runtime.engine;
    let runtime = CliRuntime::new(engine);

    if !runtime.is_available().await? {
        return Err(DistroError::RuntimeUnavailable(engine.to_string()));
    }

    debug!("Using {} runtime", runtime.runtime_name());
    Ok(Box::new(runtime))
}
