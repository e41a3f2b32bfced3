//! Shared helpers for the integration suite.
//!
//! [`TestWorkspace`] owns a temporary directory holding a settings file, a
//! store, a cache, a user registry and any number of Git repositories that
//! act as flakes.

#![allow(dead_code)]

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use flakelock::config::Settings;
use flakelock::core::ResolveContext;
use flakelock::eval::TomlEvaluator;
use flakelock::fetch::Fetcher;
use flakelock::flake_ref::Rev;
use flakelock::git::CliGitExporter;
use flakelock::registry::{Registries, Registry};
use flakelock::store::{LocalStore, Store};
use flakelock::test_utils::{MockDownloader, TestGit, flake_toml, init_test_logging};

/// A local Git repository used as a flake or plain source.
pub struct TestRepo {
    pub git: TestGit,
}

impl TestRepo {
    pub fn path(&self) -> &Path {
        self.git.repo_path()
    }

    /// `file://` URL of the repository.
    pub fn url(&self) -> String {
        format!("file://{}", self.path().display())
    }

    /// Write files and commit them, returning the new HEAD.
    pub fn commit_files(&self, files: &[(&str, &str)], message: &str) -> Result<Rev> {
        for (relative, content) in files {
            self.git.write_file(relative, content)?;
        }
        self.git.commit_all(message)
    }
}

pub struct TestWorkspace {
    temp: TempDir,
    pub config_path: PathBuf,
}

impl TestWorkspace {
    /// A workspace whose settings keep every directory inside the temp dir.
    pub fn new() -> Result<Self> {
        init_test_logging(None);
        let temp = TempDir::new()?;
        let root = temp.path().canonicalize()?;
        let config_path = root.join("config.toml");
        let settings = format!(
            "store_dir = \"{}\"\ncache_dir = \"{}\"\ndata_dir = \"{}\"\nuser_registry = \"{}\"\n",
            root.join("store").display(),
            root.join("cache").display(),
            root.join("data").display(),
            root.join("registry.json").display(),
        );
        std::fs::write(&config_path, settings)?;
        Ok(Self {
            temp,
            config_path,
        })
    }

    pub fn root(&self) -> PathBuf {
        self.config_path.parent().map(Path::to_path_buf).unwrap_or_default()
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root().join("store")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root().join("cache")
    }

    pub fn user_registry(&self) -> PathBuf {
        self.root().join("registry.json")
    }

    /// An empty repository under `repos/<name>`.
    pub fn repo(&self, name: &str) -> Result<TestRepo> {
        let git = TestGit::new(self.root().join("repos").join(name));
        git.init()?;
        Ok(TestRepo {
            git,
        })
    }

    /// A repository with a committed `flake.toml`.
    pub fn flake(
        &self,
        name: &str,
        requires: &[&str],
        non_flake_requires: &[(&str, &str)],
    ) -> Result<(TestRepo, Rev)> {
        let repo = self.repo(name)?;
        let rev = repo.commit_files(
            &[("flake.toml", &flake_toml(name, requires, non_flake_requires))],
            "Initial flake",
        )?;
        Ok((repo, rev))
    }

    /// A repository with one committed file and no flake description.
    pub fn source(&self, name: &str, content: &str) -> Result<(TestRepo, Rev)> {
        let repo = self.repo(name)?;
        let rev = repo.commit_files(&[("README", content)], "Initial source")?;
        Ok((repo, rev))
    }

    pub async fn settings(&self) -> Result<Settings> {
        Settings::load(Some(self.config_path.clone())).await
    }

    /// A resolution context exporting with real `git`; downloads always fail.
    pub async fn context(&self, registry: Registry) -> Result<ResolveContext<TomlEvaluator>> {
        let settings = self.settings().await?;
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(self.store_dir())?);
        let exporter = CliGitExporter::new(self.cache_dir(), Arc::clone(&store));
        let fetcher = Fetcher::new(&settings, Arc::new(MockDownloader::new()), Arc::new(exporter));
        Ok(ResolveContext::new(
            settings,
            Arc::new(Registries::from_registries([registry])),
            store,
            fetcher,
            TomlEvaluator::new(),
        ))
    }

    /// The `flakelock` binary configured for this workspace.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::cargo_bin("flakelock").expect("flakelock binary is built");
        cmd.env("FLAKELOCK_CONFIG", &self.config_path)
            .env("FLAKELOCK_NO_PROGRESS", "1")
            .env("NO_COLOR", "1")
            .env_remove("FLAKELOCK_STORE_DIR")
            .env_remove("FLAKELOCK_CACHE_DIR")
            .env_remove("RUST_LOG");
        cmd
    }
}
