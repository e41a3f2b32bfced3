//! Git exporting through the system `git` binary.
//!
//! [`CliGitExporter`] implements [`GitExporter`]:
//!
//! 1. Local repositories (`file://` URLs and plain paths) are read in place.
//!    Remote repositories are cloned once into a bare mirror under
//!    `<cache>/git/<hash>.git` and fetched again when a requested ref or
//!    revision is missing or mutable.
//! 2. The requested revision is resolved: an explicit `rev` wins, then the
//!    `ref`, then `HEAD` for local repositories or `master` for remote ones.
//! 3. `git archive` writes the commit's tree to a tarball that is unpacked
//!    and added to the store, so only committed content is ever exported.
//!
//! Mirror access is serialized across processes with a [`CacheLock`].

pub mod command_builder;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheLock;
use crate::constants::DEFAULT_BRANCH;
use crate::core::FlakeError;
use crate::fetch::{GitExporter, GitInfo};
use crate::flake_ref::Rev;
use crate::store::Store;
use crate::utils::platform::{command_exists, get_git_command};
use command_builder::GitCommand;

/// [`GitExporter`] that shells out to `git`.
pub struct CliGitExporter {
    cache_dir: PathBuf,
    store: Arc<dyn Store>,
}

/// The local path behind `file://` URLs and absolute paths.
fn local_repo_path(uri: &str) -> Option<PathBuf> {
    if let Some(path) = uri.strip_prefix("file://") {
        Some(PathBuf::from(path))
    } else if uri.starts_with('/') {
        Some(PathBuf::from(uri))
    } else {
        None
    }
}

impl CliGitExporter {
    /// Create an exporter keeping mirrors below `cache_dir` and exporting into `store`.
    pub fn new(cache_dir: impl Into<PathBuf>, store: Arc<dyn Store>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            store,
        }
    }

    fn mirror_key(uri: &str) -> String {
        hex::encode(&Sha256::digest(uri.as_bytes())[..16])
    }

    /// Make sure the bare mirror of `uri` exists and contains `wanted`.
    async fn update_mirror(&self, uri: &str, wanted: &str, pinned: bool) -> Result<PathBuf> {
        let mirrors = self.cache_dir.join("git");
        tokio::fs::create_dir_all(&mirrors)
            .await
            .with_context(|| format!("Failed to create mirror directory: {}", mirrors.display()))?;
        let mirror = mirrors.join(format!("{}.git", Self::mirror_key(uri)));

        if !mirror.exists() {
            tracing::info!("Cloning {uri}");
            GitCommand::clone_bare(uri, &mirror).with_context(uri).execute_success().await?;
            return Ok(mirror);
        }

        // A pinned revision never changes, so a mirror that has it is up to date
        let present =
            GitCommand::commit_exists(wanted).current_dir(&mirror).execute_success().await.is_ok();
        if !(pinned && present) {
            tracing::debug!("Fetching {uri}");
            GitCommand::fetch_mirror(uri)
                .current_dir(&mirror)
                .with_context(uri)
                .execute_success()
                .await?;
        }
        Ok(mirror)
    }

    async fn resolve_rev(repo: &Path, wanted: &str) -> Result<Rev> {
        let hash = GitCommand::rev_parse_commit(wanted)
            .current_dir(repo)
            .execute_stdout()
            .await
            .map_err(|e| {
                e.context(format!("Revision '{wanted}' not found in {}", repo.display()))
            })?;
        hash.parse::<Rev>()
            .with_context(|| format!("git rev-parse returned an unexpected hash: {hash}"))
    }

    async fn rev_count(repo: &Path, rev: &Rev) -> Result<u64> {
        let count = GitCommand::rev_list_count(&rev.to_string())
            .current_dir(repo)
            .execute_stdout()
            .await?;
        count
            .parse()
            .with_context(|| format!("git rev-list returned an unexpected count: {count}"))
    }

    async fn archive_into_store(&self, repo: &Path, rev: &Rev, name: &str) -> Result<PathBuf> {
        let staging = tempfile::tempdir().context("Failed to create export directory")?;
        let tarball = staging.path().join("export.tar");
        GitCommand::archive(&rev.to_string(), &tarball)
            .current_dir(repo)
            .execute_success()
            .await?;

        let tree = staging.path().join("tree");
        let tarball_clone = tarball.clone();
        let tree_clone = tree.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let file = std::fs::File::open(&tarball_clone)
                .with_context(|| format!("Failed to open {}", tarball_clone.display()))?;
            tar::Archive::new(file)
                .unpack(&tree_clone)
                .with_context(|| format!("Failed to unpack {}", tarball_clone.display()))
        })
        .await
        .context("Failed to spawn blocking task for archive unpacking")??;

        self.store.add_to_store(name, &tree)
    }
}

#[async_trait]
impl GitExporter for CliGitExporter {
    async fn export_git(
        &self,
        uri: &str,
        git_ref: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitInfo> {
        if !command_exists(get_git_command()) {
            return Err(FlakeError::GitNotFound.into());
        }

        let local = local_repo_path(uri);
        let wanted = match (rev, git_ref) {
            (Some(rev), _) => rev.to_string(),
            (None, Some(git_ref)) => git_ref.to_string(),
            (None, None) if local.is_some() => "HEAD".to_string(),
            (None, None) => DEFAULT_BRANCH.to_string(),
        };

        let (repo, _lock) = match local {
            Some(path) => {
                if !path.exists() {
                    return Err(FlakeError::NotARepository {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                (path, None)
            }
            None => {
                let lock =
                    CacheLock::acquire(&self.cache_dir, &format!("git-{}", Self::mirror_key(uri)))
                        .await?;
                let mirror = self.update_mirror(uri, &wanted, rev.is_some()).await?;
                (mirror, Some(lock))
            }
        };

        let resolved = Self::resolve_rev(&repo, &wanted).await?;
        if let Some(requested) = rev
            && *requested != resolved
        {
            return Err(anyhow::anyhow!(
                "Revision {requested} of {uri} resolved to a different commit {resolved}"
            ));
        }

        let rev_count = Self::rev_count(&repo, &resolved).await?;
        let store_path = self.archive_into_store(&repo, &resolved, name).await?;
        tracing::debug!(
            "Exported {uri} at {resolved} ({rev_count} commits) to {}",
            store_path.display()
        );

        Ok(GitInfo {
            store_path,
            rev: resolved,
            rev_count: Some(rev_count),
        })
    }
}
