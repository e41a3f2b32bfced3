//! Settings discovery through environment variables.
//!
//! These tests change the process environment and therefore run serially.

use anyhow::Result;
use serial_test::serial;
use std::path::PathBuf;

use flakelock::config::Settings;

use crate::common::TestWorkspace;

struct EnvGuard {
    saved: Vec<(&'static str, Option<std::ffi::OsString>)>,
}

impl EnvGuard {
    fn set(vars: &[(&'static str, &PathBuf)]) -> Self {
        let saved = vars.iter().map(|(name, _)| (*name, std::env::var_os(name))).collect();
        for (name, value) in vars {
            unsafe {
                std::env::set_var(name, value);
            }
        }
        Self {
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (name, value) in &self.saved {
            unsafe {
                match value {
                    Some(value) => std::env::set_var(name, value),
                    None => std::env::remove_var(name),
                }
            }
        }
    }
}

#[tokio::test]
#[serial]
async fn test_config_from_environment() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let _guard = EnvGuard::set(&[("FLAKELOCK_CONFIG", &ws.config_path)]);

    let settings = Settings::load(None).await?;
    assert_eq!(settings.user_registry_path()?, ws.user_registry());
    assert_eq!(settings.store_dir()?, ws.store_dir());
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_directory_overrides_win_over_file() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let store = ws.root().join("elsewhere").join("store");
    let cache = ws.root().join("elsewhere").join("cache");
    let _guard = EnvGuard::set(&[("FLAKELOCK_STORE_DIR", &store), ("FLAKELOCK_CACHE_DIR", &cache)]);

    let settings = ws.settings().await?;
    assert_eq!(settings.store_dir()?, store);
    assert_eq!(settings.cache_dir()?, cache);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_missing_config_file_uses_defaults() -> Result<()> {
    let ws = TestWorkspace::new()?;
    let missing = ws.root().join("absent.toml");
    let _guard = EnvGuard::set(&[("FLAKELOCK_CONFIG", &missing)]);

    let settings = Settings::load(None).await?;
    assert!(!settings.pure_eval);
    assert_eq!(settings.tarball_ttl, 3600);
    Ok(())
}
