//! flakelock - flake dependency resolution and locking
//!
//! A flake is a source tree with a `flake.toml` at its root naming the flake,
//! the flakes it requires, the plain sources it needs and a `provides`
//! function. flakelock resolves a flake and everything it requires, pins every
//! source to the exact revision that was fetched and records the result in a
//! `flake.lock` next to the flake.
//!
//! # Architecture Overview
//!
//! Resolution is a depth-first walk over flake references:
//!
//! 1. **Lookup** ([`registry`]): aliases are rewritten through the global,
//!    user, local and command-line registries until a direct reference remains.
//! 2. **Fetch** ([`fetch`], [`git`]): GitHub references are downloaded as
//!    tarballs, Git and path references are exported with the system `git`.
//!    Either way the source lands in the content-addressed [`store`].
//! 3. **Load** ([`flake`]): `flake.toml` is evaluated by an [`eval::Evaluator`]
//!    and the reference is pinned to the fetched revision.
//! 4. **Recurse** ([`resolver`]): plain sources are fetched, then every
//!    required flake is resolved in declared order.
//!
//! The resolved tree is turned into a [`lockfile::LockFile`] or projected into
//! an evaluator value by [`value`].
//!
//! # Purity
//!
//! In pure mode ([`config::Settings::pure_eval`]) only pinned references may
//! be fetched, except for the top-level flake when the caller explicitly
//! allows it. On-disk registries are ignored so the result cannot depend on
//! machine state.
//!
//! # Example
//!
//! ```rust,no_run
//! use flakelock::cli::{CliConfig, build_context};
//! use flakelock::lockfile::LockFile;
//! use flakelock::resolver::get_lock_file;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ctx = build_context(&CliConfig::default()).await?;
//! let flake_ref = "github:owner/repo".parse()?;
//! let lock_file: LockFile = get_lock_file(&ctx, &flake_ref).await?;
//! println!("{}", lock_file.to_json_string()?);
//! # Ok(())
//! # }
//! ```
//!
//! # Files
//!
//! - `flake.toml`: flake description, read by [`eval::TomlEvaluator`]
//! - `flake.lock`: lock file, version 1, see [`lockfile`]
//! - `registry.json`: flake registry, version 1, see [`registry`]
//! - `~/.config/flakelock/config.toml`: settings, see [`config`]

pub mod cache;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod eval;
pub mod fetch;
pub mod flake;
pub mod flake_ref;
pub mod git;
pub mod lockfile;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod utils;
pub mod value;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
