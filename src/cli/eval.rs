//! Evaluate a flake and print the projected flake set as JSON.
//!
//! Every flake of the resolution appears once, keyed by id, with its
//! `description`, `outPath`, `revCount` and the result of applying its
//! `provides` to the whole set.
//!
//! In pure mode the top reference must be pinned unless `--impure` is given.

use anyhow::Result;
use clap::Args;

use super::CliConfig;
use super::common::{build_context, parse_flake_arg};
use crate::utils::progress::spinner_with_message;
use crate::utils::to_pretty_json;
use crate::value::make_flake_value;

/// Arguments of `flakelock eval`.
#[derive(Args, Debug)]
pub struct EvalCommand {
    /// Flake reference or local directory
    flake: String,

    /// Allow an unpinned top-level reference in pure mode
    #[arg(long)]
    impure: bool,

    /// Print only the top flake's entry
    #[arg(long)]
    top: bool,
}

impl EvalCommand {
    /// Resolve, project and print.
    pub async fn execute(self, config: &CliConfig) -> Result<()> {
        let flake_ref = parse_flake_arg(&self.flake)?;
        let ctx = build_context(config).await?;

        let spinner = spinner_with_message(format!("Evaluating {flake_ref}"), config.show_progress());
        let result = make_flake_value(&ctx, &flake_ref, self.impure).await;
        spinner.finish_and_clear();
        let value = result?;

        let selected = if self.top {
            &value.top
        } else {
            &value.flakes
        };
        let json = ctx.evaluator.to_json(selected)?;
        print!("{}", to_pretty_json(&json)?);
        Ok(())
    }
}
