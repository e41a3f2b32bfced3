//! Dependency graph resolution.
//!
//! [`resolve_flake`] builds a [`Dependencies`] tree depth-first, one fetch at
//! a time, in the order flakes declare their requirements:
//!
//! 1. Load the flake itself. Only the top flake may be fetched impurely, and
//!    only when the caller asks for it.
//! 2. Load every `nonFlakeRequires` entry as a [`NonFlake`] (alias order).
//! 3. Recurse into every `requires` entry (declared order) with purity enforced.
//!
//! There is no deduplication: a flake required from two places is fetched and
//! resolved twice and appears twice in the tree. There is no cycle detection
//! either; a flake that transitively requires itself recurses until something
//! else fails. A [`ResolveHook`] sees every flake as it is entered and left,
//! which is where a caller can add either.
//!
//! [`get_lock_file`] and [`update_lock_file`] turn the tree into a [`LockFile`].

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::constants::LOCK_FILE;
use crate::core::{FlakeError, ResolveContext};
use crate::eval::Evaluator;
use crate::flake::{Flake, NonFlake, get_flake, get_non_flake};
use crate::flake_ref::{FlakeRef, FlakeRefData};
use crate::lockfile::LockFile;

/// A resolved flake with all of its dependencies.
#[derive(Debug, Clone)]
pub struct Dependencies<V> {
    /// The flake at this node
    pub flake: Flake<V>,
    /// Resolved `requires`, in declared order
    pub flake_deps: Vec<Dependencies<V>>,
    /// Resolved `nonFlakeRequires`, in alias order
    pub non_flake_deps: Vec<NonFlake>,
}

impl<V> Dependencies<V> {
    /// Visit every flake in the tree, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Flake<V>)) {
        visit(&self.flake);
        for dep in &self.flake_deps {
            dep.walk(visit);
        }
    }
}

/// Observer of the resolution walk.
///
/// `enter` runs before a flake reference is looked up and fetched; an error
/// aborts the resolution. `leave` runs after the flake's subtree is complete.
/// `depth` is 0 for the top flake.
pub trait ResolveHook {
    /// Called before resolving `flake_ref`.
    fn enter(&mut self, flake_ref: &FlakeRef, depth: usize) -> Result<()> {
        let _ = (flake_ref, depth);
        Ok(())
    }

    /// Called after `flake_ref` and its dependencies were resolved.
    fn leave(&mut self, flake_ref: &FlakeRef, depth: usize) {
        let _ = (flake_ref, depth);
    }
}

/// The hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ResolveHook for NoopHook {}

/// Resolve `top_ref` and everything it requires.
///
/// The top flake may be a mutable reference in pure mode only when both
/// `impure_top_ref` and `is_top_flake` are set. Dependencies never may.
pub async fn resolve_flake<E: Evaluator>(
    ctx: &ResolveContext<E>,
    top_ref: &FlakeRef,
    impure_top_ref: bool,
    is_top_flake: bool,
) -> Result<Dependencies<E::Value>> {
    resolve_flake_with_hook(ctx, top_ref, impure_top_ref, is_top_flake, &mut NoopHook).await
}

/// [`resolve_flake`], reporting every flake to `hook`.
pub async fn resolve_flake_with_hook<E: Evaluator, H: ResolveHook + ?Sized>(
    ctx: &ResolveContext<E>,
    top_ref: &FlakeRef,
    impure_top_ref: bool,
    is_top_flake: bool,
    hook: &mut H,
) -> Result<Dependencies<E::Value>> {
    resolve_node(ctx, top_ref, is_top_flake && impure_top_ref, 0, hook).await
}

async fn resolve_node<E: Evaluator, H: ResolveHook + ?Sized>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
    impure_allowed: bool,
    depth: usize,
    hook: &mut H,
) -> Result<Dependencies<E::Value>> {
    hook.enter(flake_ref, depth)?;
    tracing::trace!("Resolving '{}' at depth {}", flake_ref, depth);

    let flake = get_flake(ctx, flake_ref, impure_allowed).await?;

    let mut non_flake_deps = Vec::with_capacity(flake.non_flake_requires.len());
    for (alias, non_flake_ref) in &flake.non_flake_requires {
        let non_flake = get_non_flake(ctx, non_flake_ref, alias)
            .await
            .with_context(|| format!("while fetching input '{alias}' of flake '{}'", flake.id))?;
        non_flake_deps.push(non_flake);
    }

    let mut flake_deps = Vec::with_capacity(flake.requires.len());
    for required in &flake.requires {
        let dep = Box::pin(resolve_node(ctx, required, false, depth + 1, &mut *hook))
            .await
            .with_context(|| format!("while resolving '{required}' required by flake '{}'", flake.id))?;
        flake_deps.push(dep);
    }

    hook.leave(flake_ref, depth);
    Ok(Dependencies {
        flake,
        flake_deps,
        non_flake_deps,
    })
}

/// Resolve `flake_ref` (impurely at the top) and describe the result as a lock file.
pub async fn get_lock_file<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
) -> Result<LockFile> {
    let deps = resolve_flake(ctx, flake_ref, true, true).await?;
    Ok(LockFile::from_dependencies(&deps))
}

/// Where the lock file of a local flake lives.
fn lock_file_path(flake_ref: &FlakeRef) -> Result<PathBuf> {
    let usage = |message: String| -> anyhow::Error {
        FlakeError::Usage {
            message,
        }
        .into()
    };
    match &flake_ref.data {
        FlakeRefData::Path {
            path,
        } => Ok(path.join(LOCK_FILE)),
        FlakeRefData::Git {
            uri,
        } => match uri.strip_prefix("file://") {
            Some(dir) => Ok(PathBuf::from(dir).join(LOCK_FILE)),
            None => Err(usage(format!("cannot update lock file of remote flake '{flake_ref}'"))),
        },
        FlakeRefData::GitHub {
            ..
        } => Err(usage(format!("cannot update lock file of GitHub flake '{flake_ref}'"))),
        FlakeRefData::Alias {
            ..
        } => Err(usage(format!("cannot update lock file of flake alias '{flake_ref}'"))),
    }
}

/// Re-resolve a local flake and write `flake.lock` next to its `flake.toml`.
///
/// Only local references (`file://` Git URLs and paths) have a directory to
/// write into; anything else is a usage error. Returns the written lock file
/// and its path.
pub async fn update_lock_file<E: Evaluator>(
    ctx: &ResolveContext<E>,
    flake_ref: &FlakeRef,
) -> Result<(PathBuf, LockFile)> {
    let path = lock_file_path(flake_ref)?;
    let lock_file = get_lock_file(ctx, flake_ref).await?;
    lock_file.write(&path)?;
    tracing::info!("Updated lock file {}", path.display());
    Ok((path, lock_file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::test_utils::{TestEnv, flake_toml, test_rev};
    use std::collections::HashSet;

    fn github_url(repo: &str) -> String {
        format!("https://api.github.com/repos/owner/{repo}/tarball/master")
    }

    /// A top flake requiring two flakes and one plain source; `b` requires `c`.
    fn diamondless_env() -> TestEnv {
        let env = TestEnv::new();
        let top = env.add_source(&[(
            "flake.toml",
            &flake_toml(
                "top",
                &[
                    &format!("github:owner/a/{}", test_rev(0xa)),
                    &format!("github:owner/b/{}", test_rev(0xb)),
                ],
                &[("data", &format!("github:owner/data/{}", test_rev(0xd)))],
            ),
        )]);
        let a = env.add_source(&[("flake.toml", &flake_toml("a", &[], &[]))]);
        let b = env.add_source(&[(
            "flake.toml",
            &flake_toml("b", &[&format!("github:owner/c/{}", test_rev(0xc))], &[]),
        )]);
        let c = env.add_source(&[("flake.toml", &flake_toml("c", &[], &[]))]);
        let data = env.add_source(&[("README", "data")]);

        let pinned = |repo: &str, byte: u8| {
            format!("https://api.github.com/repos/owner/{repo}/tarball/{}", test_rev(byte))
        };
        env.with_tarball(&github_url("top"), &top, test_rev(0x1))
            .with_tarball(&pinned("a", 0xa), &a, test_rev(0xa))
            .with_tarball(&pinned("b", 0xb), &b, test_rev(0xb))
            .with_tarball(&pinned("c", 0xc), &c, test_rev(0xc))
            .with_tarball(&pinned("data", 0xd), &data, test_rev(0xd))
    }

    #[tokio::test]
    async fn test_tree_shape() {
        let ctx = diamondless_env().pure().context(Registry::new());
        let deps = resolve_flake(&ctx, &FlakeRef::github("owner", "top"), true, true).await.unwrap();

        assert_eq!(deps.flake.id, "top");
        let children: Vec<_> = deps.flake_deps.iter().map(|d| d.flake.id.as_str()).collect();
        assert_eq!(children, vec!["a", "b"]);
        assert_eq!(deps.non_flake_deps.len(), 1);
        assert_eq!(deps.non_flake_deps[0].alias, "data");
        assert_eq!(deps.flake_deps[1].flake_deps[0].flake.id, "c");

        let mut order = Vec::new();
        deps.walk(&mut |flake| order.push(flake.id.clone()));
        assert_eq!(order, vec!["top", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_impurity_is_not_inherited() {
        let env = TestEnv::new();
        let top = env.add_source(&[("flake.toml", &flake_toml("top", &["github:owner/dep"], &[]))]);
        let dep = env.add_source(&[("flake.toml", &flake_toml("dep", &[], &[]))]);
        let ctx = env
            .with_tarball(&github_url("top"), &top, test_rev(1))
            .with_tarball(&github_url("dep"), &dep, test_rev(2))
            .pure()
            .context(Registry::new());

        let err = resolve_flake(&ctx, &FlakeRef::github("owner", "top"), true, true)
            .await
            .unwrap_err();
        let impure = err.chain().any(|cause| {
            matches!(cause.downcast_ref::<FlakeError>(), Some(FlakeError::ImpureFetch { .. }))
        });
        assert!(impure, "unexpected error: {err:#}");
    }

    #[tokio::test]
    async fn test_mutable_non_flake_is_rejected_in_pure_mode() {
        let env = TestEnv::new();
        let top = env.add_source(&[(
            "flake.toml",
            &flake_toml("top", &[], &[("data", "github:owner/data")]),
        )]);
        let data = env.add_source(&[("README", "data")]);
        let pinned = format!("https://api.github.com/repos/owner/top/tarball/{}", test_rev(1));
        let ctx = env
            .with_tarball(&pinned, &top, test_rev(1))
            .with_tarball(&github_url("data"), &data, test_rev(2))
            .pure()
            .context(Registry::new());

        let top_ref: FlakeRef = format!("github:owner/top/{}", test_rev(1)).parse().unwrap();
        let err = resolve_flake(&ctx, &top_ref, true, true).await.unwrap_err();
        let impure = err.chain().any(|cause| {
            matches!(cause.downcast_ref::<FlakeError>(), Some(FlakeError::ImpureFetch { .. }))
        });
        assert!(impure, "unexpected error: {err:#}");
    }

    #[tokio::test]
    async fn test_top_impurity_requires_top_flag() {
        let env = TestEnv::new();
        let top = env.add_source(&[("flake.toml", &flake_toml("top", &[], &[]))]);
        let ctx = env.with_tarball(&github_url("top"), &top, test_rev(1)).pure().context(Registry::new());

        let err = resolve_flake(&ctx, &FlakeRef::github("owner", "top"), true, false)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<FlakeError>(), Some(FlakeError::ImpureFetch { .. })));
    }

    #[tokio::test]
    async fn test_repeated_requirements_are_fetched_twice() {
        let env = TestEnv::new();
        let shared = format!("github:owner/shared/{}", test_rev(5));
        let top = env.add_source(&[("flake.toml", &flake_toml("top", &[&shared, &shared], &[]))]);
        let dep = env.add_source(&[("flake.toml", &flake_toml("shared", &[], &[]))]);
        let env = env.with_tarball(&github_url("top"), &top, test_rev(1)).with_tarball(
            &format!("https://api.github.com/repos/owner/shared/tarball/{}", test_rev(5)),
            &dep,
            test_rev(5),
        );
        let requests = env.downloads();
        let ctx = env.context(Registry::new());

        let deps = resolve_flake(&ctx, &FlakeRef::github("owner", "top"), false, true).await.unwrap();
        assert_eq!(deps.flake_deps.len(), 2);
        assert_eq!(requests.lock().unwrap().len(), 3);
    }

    struct CycleGuard {
        stack: Vec<FlakeRef>,
        seen: HashSet<FlakeRef>,
    }

    impl ResolveHook for CycleGuard {
        fn enter(&mut self, flake_ref: &FlakeRef, _depth: usize) -> Result<()> {
            if !self.seen.insert(flake_ref.clone()) {
                anyhow::bail!("cycle through '{flake_ref}'");
            }
            self.stack.push(flake_ref.clone());
            Ok(())
        }

        fn leave(&mut self, flake_ref: &FlakeRef, _depth: usize) {
            self.stack.pop();
            self.seen.remove(flake_ref);
        }
    }

    #[tokio::test]
    async fn test_hook_can_detect_cycles() {
        let env = TestEnv::new();
        let selfish = format!("github:owner/selfish/{}", test_rev(7));
        let path = env.add_source(&[("flake.toml", &flake_toml("selfish", &[&selfish], &[]))]);
        let ctx = env
            .with_tarball(
                &format!("https://api.github.com/repos/owner/selfish/tarball/{}", test_rev(7)),
                &path,
                test_rev(7),
            )
            .context(Registry::new());

        let mut guard = CycleGuard {
            stack: Vec::new(),
            seen: HashSet::new(),
        };
        let top: FlakeRef = selfish.parse().unwrap();
        let err = resolve_flake_with_hook(&ctx, &top, false, true, &mut guard).await.unwrap_err();
        assert!(format!("{err:#}").contains("cycle through"));
    }

    #[tokio::test]
    async fn test_get_lock_file_strips_top_reference() {
        let ctx = diamondless_env().context(Registry::new());
        let lock = get_lock_file(&ctx, &FlakeRef::github("owner", "top")).await.unwrap();

        assert_eq!(lock.flake_entries.len(), 2);
        assert_eq!(
            lock.flake_entries["b"].flake_entries["c"].uri,
            FlakeRef::github("owner", "c").with_rev(test_rev(0xc))
        );
        assert_eq!(
            lock.non_flake_entries["data"],
            FlakeRef::github("owner", "data").with_rev(test_rev(0xd))
        );
    }

    #[tokio::test]
    async fn test_update_lock_file_rejects_remote_flakes() {
        let ctx = TestEnv::new().context(Registry::new());
        for flake_ref in [
            FlakeRef::github("owner", "repo"),
            FlakeRef::alias("nixpkgs"),
            FlakeRef::git("https://example.org/repo.git"),
        ] {
            let err = update_lock_file(&ctx, &flake_ref).await.unwrap_err();
            assert!(matches!(err.downcast_ref::<FlakeError>(), Some(FlakeError::Usage { .. })));
        }
    }

    #[tokio::test]
    async fn test_update_lock_file_writes_next_to_flake() {
        let env = TestEnv::new();
        let project = tempfile::TempDir::new().unwrap();
        let dep = env.add_source(&[("flake.toml", &flake_toml("dep", &[], &[]))]);
        let dep_ref = format!("github:owner/dep/{}", test_rev(9));
        let top = env.add_source(&[("flake.toml", &flake_toml("top", &[&dep_ref], &[]))]);
        let uri = format!("file://{}", project.path().display());
        let ctx = env
            .with_repo(&uri, &top, test_rev(1), Some(1))
            .with_tarball(
                &format!("https://api.github.com/repos/owner/dep/tarball/{}", test_rev(9)),
                &dep,
                test_rev(9),
            )
            .context(Registry::new());

        let (path, lock) =
            update_lock_file(&ctx, &FlakeRef::file_uri(project.path()).unwrap()).await.unwrap();
        assert_eq!(path, project.path().join("flake.lock"));
        assert_eq!(LockFile::read(&path).unwrap(), lock);
        assert!(lock.flake_entries.contains_key("dep"));
    }
}
