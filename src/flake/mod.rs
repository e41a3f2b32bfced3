//! Loading flakes and non-flake sources.
//!
//! Both loaders resolve aliases through the registries, fetch the source,
//! check that the result is in the store and pin the reference to the
//! fetched revision. [`get_flake`] then evaluates `flake.toml` at the source
//! root and reads the embedded `flake.lock`; [`get_non_flake`] stops after
//! fetching.
//!
//! The attributes read from `flake.toml`:
//!
//! | Attribute | Required | Shape |
//! |-----------|----------|-------|
//! | `name` | yes | string |
//! | `description` | no | string |
//! | `requires` | no | list of reference strings |
//! | `nonFlakeRequires` | no | set of alias to reference string |
//! | `provides` | yes | function, kept unevaluated |

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants::{FLAKE_FILE, LOCK_FILE};
use crate::core::{FlakeError, ResolveContext};
use crate::eval::Evaluator;
use crate::fetch::FlakeSourceInfo;
use crate::flake_ref::{FlakeRef, FlakeRefData};
use crate::lockfile::LockFile;
use crate::registry::lookup_flake;

/// A fetched and evaluated flake.
#[derive(Debug, Clone)]
pub struct Flake<V> {
    /// The flake's `name`
    pub id: String,
    /// The flake's `description`
    pub description: Option<String>,
    /// The reference the flake was fetched from, pinned to the fetched revision
    pub flake_ref: FlakeRef,
    /// Store path of the source
    pub path: PathBuf,
    /// Number of commits in the source's history, when known
    pub rev_count: Option<u64>,
    /// Flakes this flake depends on, in declared order
    pub requires: Vec<FlakeRef>,
    /// Plain sources this flake depends on, by alias
    pub non_flake_requires: BTreeMap<String, FlakeRef>,
    /// The unevaluated `provides` function
    pub provides: V,
    /// The lock file shipped with the source. Informational only.
    pub lock_file: LockFile,
}

/// A fetched source without a flake description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonFlake {
    /// The reference the source was fetched from, pinned to the fetched revision
    pub flake_ref: FlakeRef,
    /// Store path of the source
    pub path: PathBuf,
    /// The name the parent flake gave this dependency
    pub alias: String,
}

/// Pin a resolved reference to the revision its source was fetched at.
///
/// GitHub references are rebased onto the bare repository plus revision so
/// the result is the same whichever branch was asked for. Git references
/// keep their ref for readability. Paths cannot carry a revision.
fn pin_to_revision(flake_ref: FlakeRef, source: &FlakeSourceInfo) -> FlakeRef {
    let Some(rev) = source.rev else {
        return flake_ref;
    };
    match flake_ref.data {
        FlakeRefData::GitHub {
            ..
        } => flake_ref.base_ref().with_rev(rev),
        FlakeRefData::Git {
            ..
        } => flake_ref.with_rev(rev),
        FlakeRefData::Path {
            ..
        }
        | FlakeRefData::Alias {
            ..
        } => flake_ref,
    }
}

async fn fetch_source<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
    impure_allowed: bool,
) -> Result<(FlakeRef, FlakeSourceInfo)> {
    let resolved = lookup_flake(flake_ref, &ctx.registries)?;
    if resolved != *flake_ref {
        tracing::debug!("Resolved '{}' to '{}'", flake_ref, resolved);
    }

    let source = ctx.fetcher.fetch_flake(&resolved, impure_allowed).await?;
    ctx.store.assert_store_path(&source.store_path)?;
    ctx.allow_path(&source.store_path);

    Ok((pin_to_revision(resolved, &source), source))
}

fn get_string<E: Evaluator>(ctx: &ResolveContext<E>, value: &E::Value, name: &str) -> Result<Option<String>> {
    ctx.evaluator
        .get_attr(value, name)?
        .map(|v| ctx.evaluator.force_string(&v))
        .transpose()
        .with_context(|| format!("while evaluating the attribute '{name}'"))
}

fn parse_required(input: &str, attribute: &str, path: &Path) -> Result<FlakeRef> {
    input.parse().with_context(|| {
        format!("Invalid entry in '{attribute}' of flake '{}'", path.display())
    })
}

/// Fetch and evaluate the flake `flake_ref` refers to.
///
/// `impure_allowed` lets a mutable GitHub reference through in pure mode.
pub async fn get_flake<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
    impure_allowed: bool,
) -> Result<Flake<E::Value>> {
    let (resolved, source) = fetch_source(ctx, flake_ref, impure_allowed).await?;
    let path = source.store_path;
    let missing = |attribute: &str| FlakeError::MissingAttribute {
        attribute: attribute.to_string(),
        path: path.display().to_string(),
    };

    let ev = &ctx.evaluator;
    let flake_file = path.join(FLAKE_FILE);
    let value = ev
        .eval_file(&flake_file)
        .with_context(|| format!("Failed to evaluate flake '{resolved}'"))?;

    let id = get_string(ctx, &value, "name")?.ok_or_else(|| missing("name"))?;
    let description = get_string(ctx, &value, "description")?;

    let mut requires = Vec::new();
    if let Some(list) = ev.get_attr(&value, "requires")? {
        for item in ev.force_list(&list).context("while evaluating the attribute 'requires'")? {
            let text = ev.force_string(&item).context("while evaluating the attribute 'requires'")?;
            requires.push(parse_required(&text, "requires", &path)?);
        }
    }

    let mut non_flake_requires = BTreeMap::new();
    if let Some(set) = ev.get_attr(&value, "nonFlakeRequires")? {
        for (alias, item) in
            ev.force_attrs(&set).context("while evaluating the attribute 'nonFlakeRequires'")?
        {
            let text = ev
                .force_string(&item)
                .with_context(|| format!("while evaluating 'nonFlakeRequires.{alias}'"))?;
            non_flake_requires.insert(alias, parse_required(&text, "nonFlakeRequires", &path)?);
        }
    }

    let provides = ev.get_attr(&value, "provides")?.ok_or_else(|| missing("provides"))?;
    ev.force_function(&provides).context("while evaluating the attribute 'provides'")?;

    let lock_file = LockFile::read(&path.join(LOCK_FILE))?;

    tracing::debug!(
        "Loaded flake '{}' from '{}' ({} requires, {} non-flake requires)",
        id,
        resolved,
        requires.len(),
        non_flake_requires.len()
    );

    Ok(Flake {
        id,
        description,
        flake_ref: resolved,
        path,
        rev_count: source.rev_count,
        requires,
        non_flake_requires,
        provides,
        lock_file,
    })
}

/// Fetch a plain source required under `alias`. Never impure.
pub async fn get_non_flake<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
    alias: &str,
) -> Result<NonFlake> {
    let (resolved, source) = fetch_source(ctx, flake_ref, false).await?;
    tracing::debug!("Loaded non-flake '{}' from '{}'", alias, resolved);
    Ok(NonFlake {
        flake_ref: resolved,
        path: source.store_path,
        alias: alias.to_string(),
    })
}
