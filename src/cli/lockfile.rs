//! Lock file inspection.
//!
//! `flakelock lockfile check [FILE]` parses a lock file with the same rules
//! resolution uses: the version must be supported and every entry must be
//! pinned to a revision. A directory argument means its `flake.lock`.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use super::CliConfig;
use crate::constants::LOCK_FILE;
use crate::lockfile::LockFile;

/// Arguments of `flakelock lockfile`.
#[derive(Args, Debug)]
pub struct LockfileCommand {
    #[command(subcommand)]
    action: LockfileAction,
}

#[derive(Subcommand, Debug)]
enum LockfileAction {
    /// Validate a lock file and list what it pins
    Check {
        /// Lock file, or a directory containing one
        #[arg(default_value = LOCK_FILE)]
        file: PathBuf,
    },
}

impl LockfileCommand {
    /// Run the selected action.
    pub async fn execute(self, _config: &CliConfig) -> Result<()> {
        match self.action {
            LockfileAction::Check {
                file,
            } => check(file),
        }
    }
}

fn check(file: PathBuf) -> Result<()> {
    let path = if file.is_dir() {
        file.join(LOCK_FILE)
    } else {
        file
    };
    if !path.exists() {
        bail!("Lock file {} does not exist", path.display());
    }

    let lock_file = LockFile::read(&path)?;
    let count = lock_file.references().len();
    println!("{} {} ({} pinned entries)", "✓ Valid".green(), path.display(), count);
    for line in render_references(&lock_file) {
        println!("{line}");
    }
    Ok(())
}

/// One line per locked entry: indented lock path, then the pinned reference.
pub(super) fn render_references(lock_file: &LockFile) -> Vec<String> {
    lock_file
        .references()
        .into_iter()
        .map(|(key, flake_ref)| {
            let depth = key.matches('/').count();
            let name = key.rsplit('/').next().unwrap_or(&key);
            format!("{}{} {}", "  ".repeat(depth + 1), name.cyan(), flake_ref.to_string().bright_black())
        })
        .collect()
}
