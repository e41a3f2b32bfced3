//! A throwaway resolution environment.
//!
//! [`TestEnv`] owns a temporary store and a pair of mock fetchers. Sources
//! are added to the store directly and then registered with the mocks under
//! the URL the resolver is expected to fetch:
//!
//! ```rust,no_run
//! use flakelock::registry::Registry;
//! use flakelock::test_utils::{TestEnv, flake_toml, test_rev};
//!
//! let env = TestEnv::new();
//! let path = env.add_source(&[("flake.toml", &flake_toml("hello", &[], &[]))]);
//! let ctx = env
//!     .with_repo("https://example.org/hello.git", &path, test_rev(1), Some(1))
//!     .context(Registry::new());
//! ```

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use super::mocks::{MockDownloader, MockExporter};
use crate::config::Settings;
use crate::core::ResolveContext;
use crate::eval::TomlEvaluator;
use crate::fetch::{DownloadRequest, Fetcher};
use crate::flake_ref::Rev;
use crate::registry::{Registries, Registry};
use crate::store::{LocalStore, Store};

/// A [`LocalStore`] that deletes itself once the last handle is gone.
pub struct TestStore {
    store: LocalStore,
    temp: TempDir,
}

impl TestStore {
    /// A store in a fresh temporary directory.
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let store = LocalStore::new(temp.path().join("store"))?;
        Ok(Self {
            store,
            temp,
        })
    }

    /// Scratch space next to the store.
    pub fn scratch_dir(&self) -> &Path {
        self.temp.path()
    }
}

impl Store for TestStore {
    fn store_dir(&self) -> &Path {
        self.store.store_dir()
    }

    fn assert_store_path(&self, path: &Path) -> Result<()> {
        self.store.assert_store_path(path)
    }

    fn add_to_store(&self, name: &str, src: &Path) -> Result<PathBuf> {
        self.store.add_to_store(name, src)
    }
}

/// Store, settings and mock fetchers for one test.
pub struct TestEnv {
    store: Arc<TestStore>,
    settings: Settings,
    downloader: MockDownloader,
    exporter: MockExporter,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// An impure, unrestricted environment with an empty store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(TestStore::new().expect("failed to create test store")),
            settings: Settings::default(),
            downloader: MockDownloader::new(),
            exporter: MockExporter::new(),
        }
    }

    /// The store resolution will use.
    pub fn store(&self) -> Arc<TestStore> {
        Arc::clone(&self.store)
    }

    /// Add a source tree made of `(relative path, content)` files to the store.
    pub fn add_source(&self, files: &[(&str, &str)]) -> PathBuf {
        let staging =
            tempfile::tempdir_in(self.store.scratch_dir()).expect("failed to create staging dir");
        for (relative, content) in files {
            let path = staging.path().join(relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("failed to create source dir");
            }
            std::fs::write(&path, content).expect("failed to write source file");
        }
        self.store.add_to_store("source", staging.path()).expect("failed to add source to store")
    }

    /// Serve `path` for `url` with `rev` as the `ETag`.
    pub fn with_tarball(mut self, url: &str, path: &Path, rev: Rev) -> Self {
        self.downloader = self.downloader.with_tarball(url, path, Some(format!("\"{rev}\"")));
        self
    }

    /// Export `path` at `rev` for the Git URL `uri`.
    pub fn with_repo(mut self, uri: &str, path: &Path, rev: Rev, rev_count: Option<u64>) -> Self {
        self.exporter = self.exporter.with_repo(uri, path, rev, rev_count);
        self
    }

    /// Enable pure evaluation.
    pub fn pure(mut self) -> Self {
        self.settings.pure_eval = true;
        self
    }

    /// Enable path restriction.
    pub fn restricted(mut self) -> Self {
        self.settings.restrict_eval = true;
        self
    }

    /// Log of downloads made through this environment.
    pub fn downloads(&self) -> Arc<Mutex<Vec<DownloadRequest>>> {
        self.downloader.requests()
    }

    /// Build a resolution context whose only registry is `registry`.
    pub fn context(self, registry: Registry) -> ResolveContext<TomlEvaluator> {
        let fetcher = Fetcher::new(&self.settings, Arc::new(self.downloader), Arc::new(self.exporter));
        let store: Arc<dyn Store> = self.store;
        ResolveContext::new(
            self.settings,
            Arc::new(Registries::from_registries([registry])),
            store,
            fetcher,
            TomlEvaluator::new(),
        )
    }
}
