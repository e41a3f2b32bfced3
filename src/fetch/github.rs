//! GitHub tarball fetching.
//!
//! Tarballs come from the REST API endpoint
//! `https://api.github.com/repos/{owner}/{repo}/tarball/{rev|ref|master}`.
//! GitHub answers with an `ETag` of the form `"<40 hex chars>"` naming the
//! commit it served; [`parse_etag`] turns that into a [`Rev`].
//!
//! [`HttpDownloader`] is the bundled [`Downloader`]: it caches one metadata
//! record per URL under `<cache>/tarballs/`, honours the request TTL, sends
//! `If-None-Match` when revalidating, and retries transient failures with
//! exponential backoff.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;

use super::{DownloadRequest, DownloadResult, Downloader};
use crate::constants::{
    DEFAULT_BRANCH, HTTP_RETRY_ATTEMPTS, MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS,
    USER_AGENT,
};
use crate::core::FlakeError;
use crate::flake_ref::Rev;
use crate::store::{Store, hash_tree};
use crate::utils::{atomic_write, ensure_dir, to_pretty_json};

/// Tarball URL for a repository at a revision, a ref, or the default branch.
#[must_use]
pub fn tarball_url(owner: &str, repo: &str, git_ref: Option<&str>, rev: Option<&Rev>) -> String {
    let selector = match (rev, git_ref) {
        (Some(rev), _) => rev.to_string(),
        (None, Some(git_ref)) => git_ref.to_string(),
        (None, None) => DEFAULT_BRANCH.to_string(),
    };
    format!("https://api.github.com/repos/{owner}/{repo}/tarball/{selector}")
}

/// Decode an `ETag` header of exactly `"` + 40 hex characters + `"`.
pub fn parse_etag(etag: &str, url: &str) -> Result<Rev> {
    let invalid = || FlakeError::InvalidEtag {
        etag: etag.to_string(),
        url: url.to_string(),
    };
    if etag.len() != 42 || !etag.starts_with('"') || !etag.ends_with('"') {
        return Err(invalid().into());
    }
    etag[1..41].parse::<Rev>().map_err(|_| invalid().into())
}

/// Cache record for one downloaded URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    url: String,
    etag: Option<String>,
    store_path: PathBuf,
    tree_hash: String,
    fetched_at: DateTime<Utc>,
}

/// Failure of a single HTTP attempt, split by whether retrying can help.
#[derive(Debug)]
enum AttemptError {
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

impl AttemptError {
    fn into_inner(self) -> anyhow::Error {
        match self {
            Self::Transient(e) | Self::Fatal(e) => e,
        }
    }
}

enum Fetched {
    NotModified,
    Body {
        bytes: Vec<u8>,
        etag: Option<String>,
    },
}

/// [`Downloader`] backed by `reqwest` and a local metadata cache.
pub struct HttpDownloader {
    client: reqwest::Client,
    cache_dir: PathBuf,
    store: Arc<dyn Store>,
}

impl HttpDownloader {
    /// Create a downloader caching metadata below `cache_dir` and unpacking into `store`.
    pub fn new(cache_dir: impl Into<PathBuf>, store: Arc<dyn Store>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            cache_dir: cache_dir.into().join("tarballs"),
            store,
        })
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let key = hex::encode(Sha256::digest(url.as_bytes()));
        self.cache_dir.join(format!("{key}.json"))
    }

    fn read_entry(&self, url: &str) -> Option<CacheEntry> {
        let content = std::fs::read_to_string(self.entry_path(url)).ok()?;
        match serde_json::from_str::<CacheEntry>(&content) {
            Ok(entry) if entry.url == url => Some(entry),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Ignoring corrupt download cache entry for {url}: {e}");
                None
            }
        }
    }

    fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        ensure_dir(&self.cache_dir)?;
        atomic_write(&self.entry_path(&entry.url), to_pretty_json(entry)?.as_bytes())
    }

    fn entry_usable(entry: &CacheEntry, force_integrity_check: bool) -> bool {
        if !entry.store_path.exists() {
            return false;
        }
        if !force_integrity_check {
            return true;
        }
        match hash_tree(&entry.store_path) {
            Ok(hash) if hash == entry.tree_hash => true,
            Ok(_) => {
                tracing::warn!("Cached store path {} was modified", entry.store_path.display());
                false
            }
            Err(_) => false,
        }
    }

    async fn fetch_once(&self, url: &str, etag: Option<&str>) -> Result<Fetched, AttemptError> {
        let mut request = self.client.get(url);
        if let Some(etag) = etag {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| {
            AttemptError::Transient(
                FlakeError::NetworkError {
                    operation: format!("GET {url}"),
                    reason: e.to_string(),
                }
                .into(),
            )
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_MODIFIED {
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            let error: anyhow::Error = FlakeError::NetworkError {
                operation: format!("GET {url}"),
                reason: format!("server responded with {status}"),
            }
            .into();
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                AttemptError::Transient(error)
            } else {
                AttemptError::Fatal(error)
            });
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(|e| {
            AttemptError::Transient(
                FlakeError::NetworkError {
                    operation: format!("reading body of {url}"),
                    reason: e.to_string(),
                }
                .into(),
            )
        })?;

        Ok(Fetched::Body {
            bytes: bytes.to_vec(),
            etag,
        })
    }

    async fn unpack_into_store(&self, bytes: Vec<u8>, name: &str) -> Result<(PathBuf, String)> {
        let staging = tempfile::tempdir().context("Failed to create unpack directory")?;
        let unpack_dir = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || unpack_tarball(&bytes, &unpack_dir))
            .await
            .context("Failed to spawn blocking task for tarball unpacking")??;

        let top = single_top_level_dir(staging.path())?;
        let tree_hash = hash_tree(&top)?;
        let store_path = self.store.add_to_store(name, &top)?;
        Ok((store_path, tree_hash))
    }
}

fn unpack_tarball(bytes: &[u8], dest: &Path) -> Result<()> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest).with_context(|| format!("Failed to unpack tarball into {}", dest.display()))
}

fn single_top_level_dir(dir: &Path) -> Result<PathBuf> {
    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.file_name().is_some_and(|n| n != "pax_global_header"));
    match (entries.next(), entries.next()) {
        (Some(top), None) if top.is_dir() => Ok(top),
        _ => Err(anyhow::anyhow!("Tarball does not contain exactly one top-level directory")),
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult> {
        let url = request.url.as_str();
        let cached = self
            .read_entry(url)
            .filter(|entry| Self::entry_usable(entry, request.force_integrity_check));

        if let Some(entry) = &cached {
            let age = (Utc::now() - entry.fetched_at).to_std().unwrap_or(Duration::ZERO);
            if age < request.ttl {
                tracing::debug!("Using cached download of {url}");
                return Ok(DownloadResult {
                    store_path: entry.store_path.clone(),
                    etag: entry.etag.clone(),
                });
            }
        }

        tracing::info!("Downloading {url}");
        let strategy = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
            .factor(2)
            .take(HTTP_RETRY_ATTEMPTS);
        let previous_etag = cached.as_ref().and_then(|e| e.etag.clone());
        let fetched = RetryIf::spawn(
            strategy,
            || self.fetch_once(url, previous_etag.as_deref()),
            |e: &AttemptError| {
                let retry = matches!(e, AttemptError::Transient(_));
                if retry {
                    tracing::debug!("Retrying download of {url}");
                }
                retry
            },
        )
        .await
        .map_err(AttemptError::into_inner)?;

        let entry = match (fetched, cached) {
            (Fetched::NotModified, Some(entry)) => CacheEntry {
                fetched_at: Utc::now(),
                ..entry
            },
            (Fetched::NotModified, None) => {
                return Err(anyhow::anyhow!("Server reported {url} unmodified without a cached copy"));
            }
            (
                Fetched::Body {
                    bytes,
                    etag,
                },
                _,
            ) => {
                let (store_path, tree_hash) = self.unpack_into_store(bytes, &request.name).await?;
                CacheEntry {
                    url: url.to_string(),
                    etag,
                    store_path,
                    tree_hash,
                    fetched_at: Utc::now(),
                }
            }
        };

        if let Some(expected) = &request.expected_hash
            && *expected != entry.tree_hash
        {
            return Err(anyhow::anyhow!(
                "Hash mismatch for {url}: expected {expected}, got {}",
                entry.tree_hash
            ));
        }

        self.write_entry(&entry)?;
        Ok(DownloadResult {
            store_path: entry.store_path,
            etag: entry.etag,
        })
    }
}
