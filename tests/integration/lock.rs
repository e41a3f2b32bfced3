//! Writing and reading lock files of local flakes.

use anyhow::Result;

use flakelock::constants::LOCK_FILE;
use flakelock::flake_ref::FlakeRef;
use flakelock::lockfile::LockFile;
use flakelock::registry::Registry;
use flakelock::resolver::{get_lock_file, update_lock_file};

use crate::common::TestWorkspace;

#[tokio::test]
async fn test_update_lock_file_pins_whole_tree() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (data, data_rev) = ws.source("data", "v1")?;
    let (leaf, leaf_rev) = ws.flake("leaf", &[], &[])?;
    let (dep, dep_rev) = ws.flake("dep", &[&leaf.url()], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[("data", &data.url())])?;

    let ctx = ws.context(Registry::new()).await?;
    let (path, written) = update_lock_file(&ctx, &FlakeRef::file_uri(top.path())?).await?;
    assert_eq!(path, top.path().join(LOCK_FILE));

    let read = LockFile::read(&path)?;
    assert_eq!(read, written);
    assert_eq!(read.non_flake_entries["data"], FlakeRef::git(data.url()).with_rev(data_rev));

    let dep_entry = &read.flake_entries["dep"];
    assert_eq!(dep_entry.uri, FlakeRef::git(dep.url()).with_rev(dep_rev));
    assert_eq!(dep_entry.flake_entries["leaf"].uri, FlakeRef::git(leaf.url()).with_rev(leaf_rev));

    let keys: Vec<String> = read.references().into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["data", "dep", "dep/leaf"]);
    Ok(())
}

#[tokio::test]
async fn test_relock_picks_up_new_commits() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, first) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;
    let top_ref = FlakeRef::file_uri(top.path())?;

    let ctx = ws.context(Registry::new()).await?;
    let (path, _) = update_lock_file(&ctx, &top_ref).await?;
    assert_eq!(LockFile::read(&path)?.flake_entries["dep"].uri.rev, Some(first));

    let second = dep.commit_files(&[("CHANGELOG", "more")], "Second")?;
    let (_, relocked) = update_lock_file(&ctx, &top_ref).await?;
    assert_eq!(relocked.flake_entries["dep"].uri.rev, Some(second));
    assert_eq!(LockFile::read(&path)?, relocked);
    Ok(())
}

#[tokio::test]
async fn test_lock_file_layout() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, dep_rev) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let (path, _) = update_lock_file(&ctx, &FlakeRef::file_uri(top.path())?).await?;
    let text = std::fs::read_to_string(&path)?;

    let json: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(json["version"], 1);
    assert_eq!(json["requires"]["dep"]["uri"], format!("{}?rev={dep_rev}", dep.url()));
    assert!(json.get("uri").is_none());
    assert!(text.contains("\n    \"requires\""));
    assert!(text.ends_with("}\n"));
    Ok(())
}

#[tokio::test]
async fn test_get_lock_file_does_not_write() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let lock_file = get_lock_file(&ctx, &FlakeRef::git(top.url())).await?;
    assert_eq!(lock_file.flake_entries.len(), 1);
    assert!(!top.path().join(LOCK_FILE).exists());
    Ok(())
}

#[tokio::test]
async fn test_committed_lock_file_is_loaded() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    let ctx = ws.context(Registry::new()).await?;
    let (_, written) = update_lock_file(&ctx, &FlakeRef::file_uri(top.path())?).await?;
    top.git.commit_all("Add lock file")?;

    let deps = flakelock::resolver::resolve_flake(&ctx, &FlakeRef::git(top.url()), true, true).await?;
    assert_eq!(deps.flake.lock_file, written);
    assert_eq!(deps.flake.rev_count, Some(2));
    Ok(())
}
