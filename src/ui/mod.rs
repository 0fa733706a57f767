//! Terminal output helpers
//!
//! Styled status lines when attached to a terminal, bracketed plain
//! prefixes (`[OK]`, `[WARN]`) in CI logs.

mod context;
mod output;
mod prompts;

pub use context::UiContext;
pub use output::{key_value, key_value_status, section, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint};
pub use prompts::confirm;
