//! Resolution against real Git repositories.

use anyhow::Result;

use flakelock::core::FlakeError;
use flakelock::eval::Evaluator;
use flakelock::flake_ref::FlakeRef;
use flakelock::registry::Registry;
use flakelock::resolver::resolve_flake;
use flakelock::value::make_flake_value;

use crate::common::TestWorkspace;

#[tokio::test]
async fn test_resolve_local_flake_chain() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (data, data_rev) = ws.source("data", "plain data")?;
    let (dep, dep_rev) = ws.flake("dep", &[], &[("data", &data.url())])?;
    let (top, top_rev) = ws.flake("top", &[&dep.url()], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let deps = resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await?;

    assert_eq!(deps.flake.id, "top");
    assert_eq!(deps.flake.flake_ref, FlakeRef::git(top.url()).with_rev(top_rev));
    assert_eq!(deps.flake.rev_count, Some(1));
    assert_eq!(deps.flake.description.as_deref(), Some("The top flake"));

    let dep_node = &deps.flake_deps[0];
    assert_eq!(dep_node.flake.id, "dep");
    assert_eq!(dep_node.flake.flake_ref, FlakeRef::git(dep.url()).with_rev(dep_rev));

    let data_node = &dep_node.non_flake_deps[0];
    assert_eq!(data_node.alias, "data");
    assert_eq!(data_node.flake_ref, FlakeRef::git(data.url()).with_rev(data_rev));
    assert_eq!(std::fs::read_to_string(data_node.path.join("README"))?, "plain data");
    assert!(data_node.path.starts_with(ws.store_dir()));
    Ok(())
}

#[tokio::test]
async fn test_only_committed_content_is_exported() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (repo, rev) = ws.flake("top", &[], &[])?;
    repo.git.write_file("flake.toml", "this is not toml = = =")?;

    let ctx = ws.context(Registry::new()).await?;
    let deps = resolve_flake(&ctx, &FlakeRef::git(repo.url()), true, true).await?;
    assert_eq!(deps.flake.id, "top");
    assert_eq!(deps.flake.flake_ref.rev, Some(rev));
    Ok(())
}

#[tokio::test]
async fn test_pinned_requirement_uses_older_commit() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, first) = ws.flake("dep", &[], &[])?;
    let second = dep.commit_files(&[("extra.txt", "second")], "Second commit")?;
    assert_ne!(first, second);

    let pinned = format!("{}?rev={first}", dep.url());
    let (top, _) = ws.flake("top", &[&pinned], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let deps = resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await?;
    let dep_node = &deps.flake_deps[0];
    assert_eq!(dep_node.flake.flake_ref.rev, Some(first));
    assert_eq!(dep_node.flake.rev_count, Some(1));
    assert!(!dep_node.flake.path.join("extra.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_branch_requirement() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    dep.git.create_branch("feature")?;
    let feature = dep.commit_files(&[("feature.txt", "on a branch")], "Feature work")?;
    dep.git.checkout("master")?;

    let on_branch = format!("{}?ref=feature", dep.url());
    let (top, _) = ws.flake("top", &[&on_branch], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let deps = resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await?;
    let dep_node = &deps.flake_deps[0];
    assert_eq!(dep_node.flake.flake_ref, FlakeRef::git(dep.url()).with_ref("feature").with_rev(feature));
    assert_eq!(dep_node.flake.rev_count, Some(2));
    assert!(dep_node.flake.path.join("feature.txt").exists());
    Ok(())
}

#[tokio::test]
async fn test_alias_requirement_through_registry() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, dep_rev) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &["dep"], &[])?;

    let mut registry = Registry::new();
    registry.insert(FlakeRef::alias("dep"), FlakeRef::git(dep.url()));
    let ctx = ws.context(registry).await?;

    let deps = resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await?;
    assert_eq!(deps.flake_deps[0].flake.flake_ref, FlakeRef::git(dep.url()).with_rev(dep_rev));
    Ok(())
}

#[tokio::test]
async fn test_unknown_alias_is_reported() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (top, _) = ws.flake("top", &["missing"], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let err = resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await.unwrap_err();
    let unresolved = err.chain().find_map(|e| e.downcast_ref::<FlakeError>());
    assert!(matches!(unresolved, Some(FlakeError::UnresolvedAlias { .. })), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn test_path_without_repository() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let plain = ws.root().join("plain");
    std::fs::create_dir_all(&plain)?;

    let ctx = ws.context(Registry::new()).await?;
    let err = resolve_flake(&ctx, &FlakeRef::path(&plain), true, true).await.unwrap_err();
    let not_repo = err.chain().find_map(|e| e.downcast_ref::<FlakeError>());
    assert!(matches!(not_repo, Some(FlakeError::NotARepository { .. })), "{err:#}");
    Ok(())
}

#[tokio::test]
async fn test_flake_value_of_local_tree() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let value = make_flake_value(&ctx, &FlakeRef::git(top.url()), true).await?;
    let json = ctx.evaluator.to_json(&value.flakes)?;

    let dep_path = json["dep"]["outPath"].as_str().unwrap_or_default().to_string();
    assert!(dep_path.starts_with(&ws.store_dir().display().to_string()));
    assert_eq!(json["dep"]["provides"]["self"], dep_path.as_str());
    assert_eq!(json["top"]["revCount"], 1);

    let top_path = ctx.evaluator.get_attr(&value.top, "outPath")?.map(|v| ctx.evaluator.force_string(&v));
    assert_eq!(top_path.transpose()?.as_deref(), json["top"]["outPath"].as_str());
    Ok(())
}
