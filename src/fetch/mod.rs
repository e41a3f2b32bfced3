//! Source fetching.
//!
//! [`Fetcher::fetch_flake`] turns a concrete [`FlakeRef`] into a
//! [`FlakeSourceInfo`] by dispatching on its kind:
//!
//! - **GitHub**: download the repository tarball through a [`Downloader`]
//!   and read the fetched revision from the `ETag` header. In pure mode a
//!   mutable reference is refused unless the caller allows impurity.
//! - **Git URL**: export through a [`GitExporter`], trusting its revision.
//! - **Path**: require a `.git` directory, then export like a Git URL.
//!
//! Aliases must have been resolved with [`crate::registry::lookup_flake`]
//! before reaching this layer.
//!
//! The collaborators are traits so the resolver can run against the bundled
//! [`github::HttpDownloader`] and [`crate::git::CliGitExporter`] or against
//! test doubles.

pub mod github;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::constants::{PINNED_TTL, SOURCE_NAME};
use crate::core::FlakeError;
use crate::flake_ref::{FlakeRef, FlakeRefData, Rev};

/// Result of fetching a flake source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeSourceInfo {
    /// Location of the source in the store
    pub store_path: PathBuf,
    /// The revision that was fetched, when known
    pub rev: Option<Rev>,
    /// Number of commits reachable from `rev`, when the transport reports it
    pub rev_count: Option<u64>,
}

/// A cached download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// URL of a gzip-compressed tarball
    pub url: String,
    /// Re-verify cached content before reusing it
    pub force_integrity_check: bool,
    /// Name of the store entry
    pub name: String,
    /// Expected content hash of the unpacked tree, if known
    pub expected_hash: Option<String>,
    /// How long a cached download stays valid
    pub ttl: Duration,
}

/// What a [`Downloader`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Store path of the unpacked tarball
    pub store_path: PathBuf,
    /// The raw `ETag` header of the response, quotes included
    pub etag: Option<String>,
}

/// Cached HTTP downloader that unpacks tarballs into the store.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download and unpack `request.url`, reusing a cached copy younger than `request.ttl`.
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult>;
}

/// What a [`GitExporter`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    /// Store path of the exported tree
    pub store_path: PathBuf,
    /// The exported revision
    pub rev: Rev,
    /// Number of commits reachable from `rev`
    pub rev_count: Option<u64>,
}

/// Exports a revision of a Git repository into the store.
#[async_trait]
pub trait GitExporter: Send + Sync {
    /// Export `uri` at `rev`, or the tip of `git_ref`, or the default branch.
    async fn export_git(
        &self,
        uri: &str,
        git_ref: Option<&str>,
        rev: Option<&Rev>,
        name: &str,
    ) -> Result<GitInfo>;
}

/// Dispatches fetches to the configured collaborators.
#[derive(Clone)]
pub struct Fetcher {
    downloader: Arc<dyn Downloader>,
    exporter: Arc<dyn GitExporter>,
    pure_eval: bool,
    tarball_ttl: Duration,
}

impl Fetcher {
    /// Create a fetcher using the purity and TTL settings of a session.
    pub fn new(
        settings: &Settings,
        downloader: Arc<dyn Downloader>,
        exporter: Arc<dyn GitExporter>,
    ) -> Self {
        Self {
            downloader,
            exporter,
            pure_eval: settings.pure_eval,
            tarball_ttl: settings.tarball_ttl(),
        }
    }

    /// Fetch the source of a concrete reference.
    ///
    /// `impure_allowed` lifts the pure-mode restriction on mutable GitHub
    /// references; it is only ever set for the top-level flake.
    ///
    /// # Panics
    ///
    /// Panics if given an alias: resolving aliases is the caller's job.
    pub async fn fetch_flake(
        &self,
        flake_ref: &FlakeRef,
        impure_allowed: bool,
    ) -> Result<FlakeSourceInfo> {
        match &flake_ref.data {
            FlakeRefData::GitHub {
                owner,
                repo,
            } => {
                if self.pure_eval && !impure_allowed && !flake_ref.is_immutable() {
                    return Err(FlakeError::ImpureFetch {
                        flake_ref: flake_ref.to_string(),
                    }
                    .into());
                }

                let url = github::tarball_url(
                    owner,
                    repo,
                    flake_ref.git_ref.as_deref(),
                    flake_ref.rev.as_ref(),
                );
                let request = DownloadRequest {
                    url: url.clone(),
                    force_integrity_check: true,
                    name: SOURCE_NAME.to_string(),
                    expected_hash: None,
                    ttl: if flake_ref.rev.is_some() {
                        PINNED_TTL
                    } else {
                        self.tarball_ttl
                    },
                };
                let result = self
                    .downloader
                    .download(&request)
                    .await
                    .with_context(|| format!("Failed to download flake '{flake_ref}'"))?;

                let etag = result.etag.ok_or_else(|| FlakeError::MissingEtag {
                    url: url.clone(),
                })?;
                let rev = github::parse_etag(&etag, &url)?;
                tracing::debug!("Fetched '{}' at revision {}", flake_ref, rev);

                Ok(FlakeSourceInfo {
                    store_path: result.store_path,
                    rev: Some(rev),
                    rev_count: None,
                })
            }

            FlakeRefData::Git {
                uri,
            } => {
                let info = self
                    .exporter
                    .export_git(uri, flake_ref.git_ref.as_deref(), flake_ref.rev.as_ref(), SOURCE_NAME)
                    .await
                    .with_context(|| format!("Failed to fetch flake '{flake_ref}'"))?;
                tracing::debug!("Fetched '{}' at revision {}", flake_ref, info.rev);
                Ok(FlakeSourceInfo {
                    store_path: info.store_path,
                    rev: Some(info.rev),
                    rev_count: info.rev_count,
                })
            }

            FlakeRefData::Path {
                path,
            } => {
                if !path.join(".git").exists() {
                    return Err(FlakeError::NotARepository {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                let uri = path.display().to_string();
                let info = self
                    .exporter
                    .export_git(&uri, None, None, SOURCE_NAME)
                    .await
                    .with_context(|| format!("Failed to fetch flake '{flake_ref}'"))?;
                tracing::debug!("Fetched '{}' at revision {}", flake_ref, info.rev);
                Ok(FlakeSourceInfo {
                    store_path: info.store_path,
                    rev: Some(info.rev),
                    rev_count: info.rev_count,
                })
            }

            FlakeRefData::Alias {
                ..
            } => unreachable!("alias '{flake_ref}' must be resolved before fetching"),
        }
    }
}
