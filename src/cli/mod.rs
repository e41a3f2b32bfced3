//! Command-line interface for flakelock.
//!
//! Each subcommand lives in its own module with its own argument struct and
//! an `execute` method taking the shared [`CliConfig`].
//!
//! # Available Commands
//!
//! - `lock` - Re-resolve a local flake and write its `flake.lock`
//! - `show` - Print the resolved dependency tree of a flake
//! - `eval` - Print the projected flake set as JSON
//! - `registry` - List, add and remove flake registry entries
//! - `lockfile` - Check an existing lock file
//!
//! # Examples
//!
//! ```bash
//! # Lock the flake in the current directory
//! flakelock lock
//!
//! # Show what a GitHub flake depends on, without touching on-disk registries
//! flakelock --pure show github:owner/repo/0123456789abcdef0123456789abcdef01234567
//!
//! # Point an alias somewhere else for one run
//! flakelock --override-flake nixpkgs=github:me/nixpkgs show .
//! ```
//!
//! # Global Options
//!
//! - `--verbose` / `-v`: debug logging
//! - `--quiet` / `-q`: errors only, no spinners
//! - `--config` / `-c`: settings file instead of `~/.config/flakelock/config.toml`
//! - `--pure`: pure evaluation, whatever the settings file says
//! - `--override-flake ALIAS=REF`: command-line registry entries
//! - `--no-progress`: no spinners

mod common;
mod eval;
mod lock;
mod lockfile;
mod registry;
mod show;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use common::{build_context, parse_flake_arg};

/// Runtime configuration shared by every command.
///
/// Built from the global flags once, so commands do not need to know about
/// the [`Cli`] struct itself.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Explicit log filter; `None` falls back to `RUST_LOG`, then `warn`
    pub log_level: Option<String>,

    /// Hide spinners
    pub no_progress: bool,

    /// Settings file given with `--config`
    pub config_path: Option<PathBuf>,

    /// Force pure evaluation
    pub pure: bool,

    /// Raw `alias=reference` overrides for the flag registry
    pub overrides: Vec<String>,
}

impl CliConfig {
    /// Configuration with every option off.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether spinners should be drawn.
    #[must_use]
    pub const fn show_progress(&self) -> bool {
        !self.no_progress
    }

    /// Install the global `tracing` subscriber, writing to stderr.
    ///
    /// Does nothing if a subscriber is already installed.
    pub fn init_logging(&self) {
        let filter = match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    }
}

/// Resolve, inspect and lock flake dependency trees.
#[derive(Parser)]
#[command(
    name = "flakelock",
    about = "Flake dependency resolver - fetch, pin and lock flake dependency trees",
    version,
    author,
    long_about = "flakelock resolves a flake and everything it requires through the flake \
                  registries, pins every source to an exact revision and records the result \
                  in flake.lock."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to the settings file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Refuse to fetch mutable dependencies and ignore on-disk registries
    #[arg(long, global = true)]
    pure: bool,

    /// Map a flake alias to a reference for this run (repeatable)
    #[arg(long = "override-flake", global = true, value_name = "ALIAS=REF")]
    override_flake: Vec<String>,

    /// Disable spinners
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-resolve a local flake and write its lock file
    Lock(lock::LockCommand),

    /// Show the resolved dependency tree of a flake
    Show(show::ShowCommand),

    /// Evaluate a flake and print its flake set as JSON
    Eval(eval::EvalCommand),

    /// Inspect and edit flake registries
    Registry(registry::RegistryCommand),

    /// Inspect lock files
    Lockfile(lockfile::LockfileCommand),
}

impl Cli {
    /// Execute the selected command with configuration built from the global flags.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            Some("debug".to_string())
        } else if self.quiet {
            Some("error".to_string())
        } else {
            None
        };

        CliConfig {
            log_level,
            no_progress: self.no_progress || self.quiet,
            config_path: self.config.clone(),
            pure: self.pure,
            overrides: self.override_flake.clone(),
        }
    }

    /// Execute the selected command with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        config.init_logging();

        match self.command {
            Commands::Lock(cmd) => cmd.execute(&config).await,
            Commands::Show(cmd) => cmd.execute(&config).await,
            Commands::Eval(cmd) => cmd.execute(&config).await,
            Commands::Registry(cmd) => cmd.execute(&config).await,
            Commands::Lockfile(cmd) => cmd.execute(&config).await,
        }
    }
}
