//! Display the resolved dependency tree of a flake.
//!
//! ```text
//! top  /path/to/top
//! ├── data github:owner/data/abab…ab (source)
//! ├── b github:owner/b/0101…01
//! │   └── c github:owner/c/0202…02
//! └── d github:owner/d/0303…03
//!     └── c github:owner/c/0202…02 (*)
//! ```
//!
//! Plain sources are listed before flakes. A flake whose id was already
//! printed is marked `(*)` and its subtree is not repeated.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::collections::HashSet;

use super::CliConfig;
use super::common::{build_context, parse_flake_arg};
use crate::resolver::{Dependencies, resolve_flake};
use crate::utils::progress::spinner_with_message;

/// Arguments of `flakelock show`.
#[derive(Args, Debug)]
pub struct ShowCommand {
    /// Flake reference or local directory
    flake: String,

    /// Show every repeated subtree in full
    #[arg(long)]
    no_dedupe: bool,
}

impl ShowCommand {
    /// Resolve the flake and print its tree.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let flake_ref = parse_flake_arg(&self.flake)?;
        let ctx = build_context(config).await?;

        let spinner = spinner_with_message(format!("Resolving {flake_ref}"), config.show_progress());
        let result = resolve_flake(&ctx, &flake_ref, true, true).await;
        spinner.finish_and_clear();
        let deps = result?;

        for line in render_tree(&deps, !self.no_dedupe) {
            println!("{line}");
        }
        Ok(())
    }
}

/// Render a resolved tree, one line per node.
pub(super) fn render_tree<V>(deps: &Dependencies<V>, dedupe: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let top = &deps.flake;
    let mut header = format!("{}  {}", top.id.cyan().bold(), top.flake_ref.to_string().bright_black());
    if let Some(description) = &top.description {
        header.push_str(&format!("  {}", description.italic()));
    }
    lines.push(header);

    let mut displayed = HashSet::new();
    displayed.insert(top.id.clone());
    render_children(deps, "", dedupe, &mut displayed, &mut lines);
    lines
}

fn render_children<V>(
    deps: &Dependencies<V>,
    prefix: &str,
    dedupe: bool,
    displayed: &mut HashSet<String>,
    lines: &mut Vec<String>,
) {
    let total = deps.non_flake_deps.len() + deps.flake_deps.len();
    let connector = |index: usize| if index + 1 == total { "└── " } else { "├── " };

    for (index, non_flake) in deps.non_flake_deps.iter().enumerate() {
        lines.push(format!(
            "{}{}{} {} {}",
            prefix,
            connector(index),
            non_flake.alias.yellow(),
            non_flake.flake_ref.to_string().bright_black(),
            "(source)".bright_black()
        ));
    }

    let offset = deps.non_flake_deps.len();
    for (index, child) in deps.flake_deps.iter().enumerate() {
        let index = offset + index;
        let is_duplicate = dedupe && !displayed.insert(child.flake.id.clone());
        let marker = if is_duplicate {
            format!(" {}", "(*)".bright_black())
        } else {
            String::new()
        };
        lines.push(format!(
            "{}{}{} {}{}",
            prefix,
            connector(index),
            child.flake.id.cyan(),
            child.flake.flake_ref.to_string().bright_black(),
            marker
        ));

        if !is_duplicate {
            let child_prefix = if index + 1 == total {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            render_children(child, &child_prefix, dedupe, displayed, lines);
        }
    }
}
