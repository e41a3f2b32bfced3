//! Terminal spinners for long-running commands.
//!
//! Spinners are hidden when the caller disables them (`--no-progress`,
//! `--quiet`) or when `FLAKELOCK_NO_PROGRESS` is set in the environment.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Environment variable that disables spinners.
pub const NO_PROGRESS_ENV: &str = "FLAKELOCK_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var_os(NO_PROGRESS_ENV).is_some()
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{prefix:.bold} {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

/// A spinner showing `msg`, or a hidden bar when progress is disabled.
pub fn spinner_with_message(msg: impl Into<String>, enabled: bool) -> ProgressBar {
    let bar = if !enabled || is_progress_disabled() {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };
    bar.set_message(msg.into());
    bar
}
