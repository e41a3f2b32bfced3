//! Session setup shared by the CLI commands.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::CliConfig;
use crate::config::Settings;
use crate::core::ResolveContext;
use crate::eval::TomlEvaluator;
use crate::fetch::Fetcher;
use crate::fetch::github::HttpDownloader;
use crate::flake_ref::FlakeRef;
use crate::git::CliGitExporter;
use crate::registry::{Registries, parse_overrides};
use crate::store::{LocalStore, Store};

/// Load settings, honour the global flags and apply them to a fresh session.
pub async fn load_settings(config: &CliConfig) -> Result<Settings> {
    let mut settings = Settings::load(config.config_path.clone()).await?;
    if config.pure {
        settings.pure_eval = true;
    }
    Ok(settings)
}

/// Assemble a resolution context backed by the real store, HTTP and Git.
pub async fn build_context(config: &CliConfig) -> Result<ResolveContext<TomlEvaluator>> {
    let settings = load_settings(config).await?;
    let registries = Registries::load(&settings, parse_overrides(&config.overrides)?)?;

    let store_dir = settings.store_dir()?;
    let store: Arc<dyn Store> = Arc::new(
        LocalStore::new(&store_dir)
            .with_context(|| format!("Failed to open store at {}", store_dir.display()))?,
    );
    let cache_dir = settings.cache_dir()?;
    tracing::debug!("Store at {}, cache at {}", store_dir.display(), cache_dir.display());

    let downloader = HttpDownloader::new(cache_dir.clone(), Arc::clone(&store))?;
    let exporter = CliGitExporter::new(cache_dir, Arc::clone(&store));
    let fetcher = Fetcher::new(&settings, Arc::new(downloader), Arc::new(exporter));

    Ok(ResolveContext::new(settings, Arc::new(registries), store, fetcher, TomlEvaluator::new()))
}

/// Parse a flake argument.
///
/// An argument starting with `.` or `/` that names an existing directory
/// refers to the Git repository there, as `file://<canonical path>`. Anything
/// else is parsed as a flake reference.
pub fn parse_flake_arg(arg: &str) -> Result<FlakeRef> {
    let path = Path::new(arg);
    if (arg.starts_with('.') || arg.starts_with('/')) && path.is_dir() {
        let dir = path
            .canonicalize()
            .with_context(|| format!("Failed to resolve flake directory {arg}"))?;
        return Ok(FlakeRef::file_uri(&dir)?);
    }
    Ok(arg.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flake_ref::FlakeRefData;
    use tempfile::TempDir;

    #[test]
    fn test_directory_becomes_file_uri() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().canonicalize().unwrap();
        let flake_ref = parse_flake_arg(temp.path().to_str().unwrap()).unwrap();
        assert_eq!(flake_ref, FlakeRef::file_uri(&dir).unwrap());
    }

    #[test]
    fn test_directory_with_space_is_rejected() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("my flake");
        std::fs::create_dir_all(&dir).unwrap();
        let err = parse_flake_arg(dir.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("invalid flake reference"), "{err}");
    }

    #[test]
    fn test_missing_absolute_path_is_path_ref() {
        let flake_ref = parse_flake_arg("/definitely/not/here").unwrap();
        assert!(matches!(flake_ref.data, FlakeRefData::Path { .. }));
    }

    #[test]
    fn test_plain_references_are_parsed() {
        assert_eq!(parse_flake_arg("github:owner/repo").unwrap(), FlakeRef::github("owner", "repo"));
        assert_eq!(parse_flake_arg("nixpkgs").unwrap(), FlakeRef::alias("nixpkgs"));
        assert!(parse_flake_arg("github:").is_err());
    }

    #[tokio::test]
    async fn test_pure_flag_overrides_settings() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        std::fs::write(&config_path, "pure_eval = false\ntarball_ttl = 10\n").unwrap();

        let config = CliConfig {
            config_path: Some(config_path),
            pure: true,
            ..CliConfig::default()
        };
        let settings = load_settings(&config).await.unwrap();
        assert!(settings.pure_eval);
        assert_eq!(settings.tarball_ttl, 10);
    }
}
