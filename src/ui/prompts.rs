//! Yes/no prompts with a non-interactive fallback

use super::context::UiContext;
use crate::error::{DistroError, DistroResult};

/// Ask a yes/no question.
///
/// Auto-yes answers `true`; a non-interactive context answers `default`
/// without touching the terminal.
pub async fn confirm(ctx: &UiContext, message: &str, default: bool) -> DistroResult<bool> {
    if ctx.auto_yes() {
        println!("  {} (auto-approved)", message);
        return Ok(true);
    }
    if !ctx.is_interactive() {
        return Ok(default);
    }

    let message = message.to_string();
    tokio::task::spawn_blocking(move || {
        cliclack::confirm(&message)
            .initial_value(default)
            .interact()
    })
    .await
    .map_err(|e| DistroError::Internal(format!("prompt task failed: {}", e)))?
    .map_err(|e| DistroError::io("reading confirmation", e))
}
