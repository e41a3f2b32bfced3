//! End-to-end tests of the `flakelock` binary.

use anyhow::Result;
use predicates::prelude::*;

use flakelock::constants::LOCK_FILE;
use flakelock::flake_ref::FlakeRef;
use flakelock::lockfile::LockFile;
use flakelock::registry::Registry;

use crate::common::TestWorkspace;

#[test]
fn test_lock_current_directory() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, dep_rev) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    ws.command()
        .current_dir(top.path())
        .arg("lock")
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Wrote"))
        .stdout(predicate::str::contains(format!("dep {}?rev={dep_rev}", dep.url())));

    let lock_file = LockFile::read(&top.path().join(LOCK_FILE))?;
    assert_eq!(lock_file.flake_entries["dep"].uri.rev, Some(dep_rev));
    Ok(())
}

#[test]
fn test_lock_flake_without_dependencies() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (top, _) = ws.flake("top", &[], &[])?;

    ws.command()
        .arg("lock")
        .arg(top.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(no dependencies)"));
    assert!(top.path().join(LOCK_FILE).exists());
    Ok(())
}

#[test]
fn test_lock_remote_reference_is_rejected() -> Result<()> {
    let ws = TestWorkspace::new()?;
    ws.command()
        .args(["lock", "github:owner/repo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot update lock file of GitHub flake"));
    Ok(())
}

#[test]
fn test_show_prints_tree() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (data, _) = ws.source("data", "v1")?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[("data", &data.url())])?;

    ws.command()
        .arg("show")
        .arg(top.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("top  file://"))
        .stdout(predicate::str::contains("├── data file://"))
        .stdout(predicate::str::contains("(source)"))
        .stdout(predicate::str::contains("└── dep file://"));
    Ok(())
}

#[test]
fn test_show_with_override() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &["dep"], &[])?;

    ws.command()
        .arg("show")
        .arg(top.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("dep"));

    ws.command()
        .arg("show")
        .arg(top.path())
        .arg("--override-flake")
        .arg(format!("dep={}", dep.url()))
        .assert()
        .success()
        .stdout(predicate::str::contains("└── dep"));
    Ok(())
}

#[test]
fn test_eval_prints_flake_set() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;

    let output = ws.command().arg("eval").arg(top.path()).output()?;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["top"]["description"], "The top flake");
    assert_eq!(json["dep"]["revCount"], 1);
    assert_eq!(json["dep"]["provides"]["self"], json["dep"]["outPath"]);

    let output = ws.command().arg("eval").arg("--top").arg(top.path()).output()?;
    let top_json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(top_json, json["top"]);
    Ok(())
}

#[test]
fn test_registry_add_list_remove() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;

    ws.command()
        .args(["registry", "add", "dep"])
        .arg(dep.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Added dep -> file://"));

    let registry = Registry::read(&ws.user_registry())?;
    assert_eq!(registry.get(&FlakeRef::alias("dep")), Some(&FlakeRef::git(dep.url())));

    ws.command()
        .args(["registry", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("user   dep -> {}", dep.url())));

    let output = ws.command().args(["registry", "list", "--json"]).output()?;
    let json: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["dep"]["uri"], dep.url());

    ws.command()
        .args(["registry", "remove", "dep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Removed dep"));
    assert!(Registry::read(&ws.user_registry())?.is_empty());

    ws.command()
        .args(["registry", "remove", "dep"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No entry for 'dep'"));
    Ok(())
}

#[test]
fn test_pure_ignores_user_registry() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &["dep"], &[])?;

    let mut registry = Registry::new();
    registry.insert(FlakeRef::alias("dep"), FlakeRef::git(dep.url()));
    registry.write(&ws.user_registry())?;

    ws.command().arg("show").arg(top.path()).assert().success();
    ws.command().arg("--pure").arg("show").arg(top.path()).assert().failure();
    Ok(())
}

#[test]
fn test_lockfile_check() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let (dep, _) = ws.flake("dep", &[], &[])?;
    let (top, _) = ws.flake("top", &[&dep.url()], &[])?;
    ws.command().arg("lock").arg(top.path()).assert().success();

    ws.command()
        .args(["lockfile", "check"])
        .arg(top.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("✓ Valid"))
        .stdout(predicate::str::contains("1 pinned entries"));

    let broken = ws.root().join("broken.lock");
    std::fs::write(&broken, r#"{"version": 2, "requires": {}}"#)?;
    ws.command()
        .args(["lockfile", "check"])
        .arg(&broken)
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported version 2"));
    Ok(())
}

#[test]
fn test_invalid_reference() -> Result<()> {
    let ws = TestWorkspace::new()?;
    ws.command()
        .args(["show", "github:"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid flake reference"));
    Ok(())
}
