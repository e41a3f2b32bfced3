//! Write or refresh the lock file of a local flake.
//!
//! ```bash
//! # Lock the flake in the current directory
//! flakelock lock
//!
//! # Lock a flake elsewhere on disk
//! flakelock lock ../my-flake
//! ```
//!
//! The whole dependency tree is re-resolved; registries and overrides apply
//! as usual, so `--override-flake` can point a dependency somewhere else
//! before the result is pinned.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;
use super::common::{build_context, parse_flake_arg};
use super::lockfile::render_references;
use crate::resolver::update_lock_file;
use crate::utils::progress::spinner_with_message;

/// Arguments of `flakelock lock`.
#[derive(Args, Debug)]
pub struct LockCommand {
    /// Directory of the flake to lock
    #[arg(default_value = ".")]
    flake: String,
}

impl LockCommand {
    /// Resolve the flake and write `flake.lock` next to it.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let flake_ref = parse_flake_arg(&self.flake)?;
        let ctx = build_context(config).await?;

        let spinner = spinner_with_message(format!("Resolving {flake_ref}"), config.show_progress());
        let result = update_lock_file(&ctx, &flake_ref).await;
        spinner.finish_and_clear();
        let (path, lock_file) = result?;

        if lock_file.is_empty() {
            println!("{} {} (no dependencies)", "✓ Wrote".green(), path.display());
        } else {
            println!("{} {}", "✓ Wrote".green(), path.display());
            for line in render_references(&lock_file) {
                println!("{line}");
            }
        }
        Ok(())
    }
}
