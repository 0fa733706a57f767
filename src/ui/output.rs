//! Status line formatting

use super::context::UiContext;
use console::{style, Style};

/// Print a section header
pub fn section(ctx: &UiContext, title: &str) {
    println!();
    if ctx.use_fancy_output() {
        cliclack::log::info(style(title).bold()).ok();
    } else {
        println!("{}", title);
    }
}

/// Print a success line
pub fn step_ok(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(message).ok();
    } else {
        println!("  [OK] {}", message);
    }
}

/// Print a success line with a dimmed detail
pub fn step_ok_detail(ctx: &UiContext, message: &str, detail: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::success(format!("{} ({})", message, style(detail).dim())).ok();
    } else {
        println!("  [OK] {} ({})", message, detail);
    }
}

/// Print a warning line
pub fn step_warn(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(message).ok();
    } else {
        println!("  [WARN] {}", message);
    }
}

/// Print a warning line with a hint
pub fn step_warn_hint(ctx: &UiContext, message: &str, hint: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::warning(format!("{}\n{}", message, style(hint).dim())).ok();
    } else {
        println!("  [WARN] {} - {}", message, hint);
    }
}

/// Print an informational line
pub fn step_info(ctx: &UiContext, message: &str) {
    if ctx.use_fancy_output() {
        cliclack::log::remark(message).ok();
    } else {
        println!("  [INFO] {}", message);
    }
}

/// Print an aligned key-value pair
pub fn key_value(ctx: &UiContext, key: &str, value: &str) {
    if ctx.use_fancy_output() {
        println!("  {:<12} {}", style(key).dim(), value);
    } else {
        println!("  {:<12} {}", key, value);
    }
}

/// Print a key-value pair colored by status
pub fn key_value_status(ctx: &UiContext, key: &str, value: &str, ok: bool) {
    if ctx.use_fancy_output() {
        let value_style = if ok {
            Style::new().green()
        } else {
            Style::new().yellow()
        };
        println!("  {:<12} {}", style(key).dim(), value_style.apply_to(value));
    } else {
        let prefix = if ok { "[OK]" } else { "[WARN]" };
        println!("  {} {}: {}", prefix, key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_non_interactive() {
        let ctx = UiContext::non_interactive();
        section(&ctx, "Builder image");
        step_ok(&ctx, "Step completed");
        step_ok_detail(&ctx, "Built", "kernel");
        step_warn(&ctx, "Warning");
        step_warn_hint(&ctx, "Warning", "hint");
        step_info(&ctx, "Info");
        key_value(&ctx, "checksum", "abc123");
        key_value_status(&ctx, "state", "fresh", true);
    }
}
