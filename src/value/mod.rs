//! Projection of resolution results into evaluator values.
//!
//! [`make_flake_value`] works in two phases. First every flake in the tree
//! gets an attribute set with its `description`, `outPath` and `revCount`,
//! collected into one set keyed by flake id. Then each flake's `provides`
//! function is applied to that whole set, so a flake sees every other flake
//! of the resolution and not only its own dependencies.

use anyhow::{Context, Result};
use std::collections::HashSet;

use crate::core::ResolveContext;
use crate::eval::Evaluator;
use crate::flake::Flake;
use crate::flake_ref::FlakeRef;
use crate::resolver::resolve_flake;

/// The projected flake set and the top flake's entry in it.
#[derive(Debug, Clone)]
pub struct FlakeValue<V> {
    /// Every flake of the resolution, by id
    pub flakes: V,
    /// The entry of the top flake
    pub top: V,
}

/// All registry entries as `{ <alias> = { uri = "<ref>"; }; }`.
///
/// Registries are visited in lookup precedence, so when an alias appears in
/// more than one registry the entry that lookups would use is kept.
pub fn make_flake_registry_value<E: Evaluator>(ctx: &ResolveContext<E>) -> Result<E::Value> {
    let ev = &ctx.evaluator;
    let attrs = ev.alloc_attrs();
    let mut seen = HashSet::new();

    for (kind, registry) in ctx.registries.iter() {
        for (from, to) in registry.iter() {
            let name = from.to_string();
            if !seen.insert(name.clone()) {
                tracing::trace!("Registry entry '{}' in {} registry is shadowed", name, kind);
                continue;
            }
            let entry = ev.alloc_attrs();
            ev.set_attr(&entry, "uri", ev.mk_string(&to.to_string(), &[]))?;
            ev.set_attr(&attrs, &name, entry)?;
        }
    }
    Ok(attrs)
}

fn flake_attrs<E: Evaluator>(ctx: &ResolveContext<E>, flake: &Flake<E::Value>) -> Result<E::Value> {
    let ev = &ctx.evaluator;
    let entry = ev.alloc_attrs();
    if let Some(description) = &flake.description {
        ev.set_attr(&entry, "description", ev.mk_string(description, &[]))?;
    }
    let out_path = flake.path.display().to_string();
    ev.set_attr(&entry, "outPath", ev.mk_string(&out_path, std::slice::from_ref(&flake.path)))?;
    if let Some(rev_count) = flake.rev_count {
        ev.set_attr(&entry, "revCount", ev.mk_int(i64::try_from(rev_count).unwrap_or(i64::MAX)))?;
    }
    Ok(entry)
}

/// Resolve `flake_ref` and project the whole tree.
///
/// Flakes are visited parents first; when two flakes share an id the first
/// one visited wins.
pub async fn make_flake_value<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
    impure_top_ref: bool,
) -> Result<FlakeValue<E::Value>> {
    let deps = resolve_flake(ctx, flake_ref, impure_top_ref, true).await?;
    let ev = &ctx.evaluator;

    let mut flakes_in_order = Vec::new();
    deps.walk(&mut |flake| flakes_in_order.push(flake));

    let flakes = ev.alloc_attrs();
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for flake in flakes_in_order {
        if !seen.insert(flake.id.as_str()) {
            tracing::debug!("Flake '{}' from '{}' shadowed by an earlier flake", flake.id, flake.flake_ref);
            continue;
        }
        let entry = flake_attrs(ctx, flake)?;
        ev.set_attr(&flakes, &flake.id, entry.clone())?;
        entries.push((entry, flake));
    }

    for (entry, flake) in &entries {
        ev.set_attr(entry, "provides", ev.mk_app(&flake.provides, &flakes))?;
    }

    let top = entries
        .first()
        .map(|(entry, _)| entry.clone())
        .context("resolution produced no flakes")?;
    Ok(FlakeValue {
        flakes,
        top,
    })
}

/// Evaluator entry point: the projected flake set of the reference `flake_ref`.
///
/// The top reference is fetched purely.
pub async fn get_flake<E: Evaluator>(ctx: &ResolveContext<E>, flake_ref: &str) -> Result<E::Value> {
    let flake_ref: FlakeRef = flake_ref.parse()?;
    Ok(make_flake_value(ctx, &flake_ref, false).await?.flakes)
}
