//! Flake registry maintenance.
//!
//! `list` shows every registry consulted in lookup precedence order (global,
//! user, local, then `--override-flake` entries). `add` and `remove` edit the
//! per-user registry file named by the settings.
//!
//! ```bash
//! flakelock registry add nixpkgs github:me/nixpkgs
//! flakelock registry add scratch ./scratch
//! flakelock registry list --json
//! flakelock registry remove scratch
//! ```

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use colored::Colorize;
use std::path::Path;

use super::CliConfig;
use super::common::{build_context, load_settings, parse_flake_arg};
use crate::flake_ref::FlakeRef;
use crate::registry::Registry;
use crate::utils::to_pretty_json;
use crate::value::make_flake_registry_value;

/// Arguments of `flakelock registry`.
#[derive(Args, Debug)]
pub struct RegistryCommand {
    #[command(subcommand)]
    action: RegistryAction,
}

#[derive(Subcommand, Debug)]
enum RegistryAction {
    /// List registry entries in lookup order
    List {
        /// Print the merged registry as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add or replace an entry in the user registry
    Add {
        /// The reference to redirect, usually an alias
        from: String,
        /// Where it should point
        to: String,
    },

    /// Remove an entry from the user registry
    Remove {
        /// The reference to forget
        from: String,
    },
}

impl RegistryCommand {
    /// Run the selected action.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        match self.action {
            RegistryAction::List {
                json,
            } => list(config, json).await,
            RegistryAction::Add {
                from,
                to,
            } => {
                let path = load_settings(config).await?.user_registry_path()?;
                let from: FlakeRef = from.parse()?;
                let to = parse_flake_arg(&to)?;
                let previous = add_entry(&path, from.clone(), to.clone())?;
                match previous {
                    Some(previous) => println!(
                        "{} {} -> {} (was {})",
                        "✓ Updated".green(),
                        from,
                        to,
                        previous.to_string().bright_black()
                    ),
                    None => println!("{} {} -> {}", "✓ Added".green(), from, to),
                }
                Ok(())
            }
            RegistryAction::Remove {
                from,
            } => {
                let path = load_settings(config).await?.user_registry_path()?;
                let from: FlakeRef = from.parse()?;
                let removed = remove_entry(&path, &from)?;
                println!("{} {} (was {})", "✓ Removed".green(), from, removed);
                Ok(())
            }
        }
    }
}

async fn list(config: &CliConfig, json: bool) -> Result<()> {
    let ctx = build_context(config).await?;

    if json {
        let value = make_flake_registry_value(&ctx)?;
        print!("{}", to_pretty_json(&ctx.evaluator.to_json(&value)?)?);
        return Ok(());
    }

    let mut empty = true;
    for (kind, registry) in ctx.registries.iter() {
        for (from, to) in registry.iter() {
            empty = false;
            println!(
                "{:<7}{} -> {}",
                kind.to_string().bright_black(),
                from.to_string().cyan(),
                to
            );
        }
    }
    if empty {
        println!("No registry entries.");
    }
    Ok(())
}

/// Point `from` at `to` in the registry file at `path`, returning the old target.
fn add_entry(path: &Path, from: FlakeRef, to: FlakeRef) -> Result<Option<FlakeRef>> {
    let mut registry = Registry::read(path)?;
    let previous = registry.insert(from, to);
    registry.write(path)?;
    Ok(previous)
}

/// Remove `from` from the registry file at `path`, returning its target.
fn remove_entry(path: &Path, from: &FlakeRef) -> Result<FlakeRef> {
    let mut registry = Registry::read(path)?;
    let Some(removed) = registry.remove(from) else {
        bail!("No entry for '{}' in registry {}", from, path.display());
    };
    registry.write(path)?;
    Ok(removed)
}
