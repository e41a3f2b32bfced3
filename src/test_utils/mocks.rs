//! In-memory fetch collaborators.
//!
//! Both doubles answer from a table filled in by the test and record every
//! request they receive, so tests can assert on what was fetched and how.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::core::FlakeError;
use crate::fetch::{DownloadRequest, DownloadResult, Downloader, GitExporter, GitInfo};
use crate::flake_ref::Rev;

/// Requests seen by a [`MockExporter`]: `(uri, ref, rev)`.
pub type ExportCalls = Arc<Mutex<Vec<(String, Option<String>, Option<Rev>)>>>;

/// A [`Downloader`] serving canned tarballs by URL.
#[derive(Default)]
pub struct MockDownloader {
    tarballs: HashMap<String, DownloadResult>,
    requests: Arc<Mutex<Vec<DownloadRequest>>>,
}

impl MockDownloader {
    /// A downloader that knows no URLs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `store_path` with the raw header `etag` for `url`.
    pub fn with_tarball(
        mut self,
        url: &str,
        store_path: impl AsRef<Path>,
        etag: Option<String>,
    ) -> Self {
        self.tarballs.insert(
            url.to_string(),
            DownloadResult {
                store_path: store_path.as_ref().to_path_buf(),
                etag,
            },
        );
        self
    }

    /// Shared log of every request received.
    pub fn requests(&self) -> Arc<Mutex<Vec<DownloadRequest>>> {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, request: &DownloadRequest) -> Result<DownloadResult> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.tarballs.get(&request.url).cloned().ok_or_else(|| {
            FlakeError::NetworkError {
                operation: format!("GET {}", request.url),
                reason: "404 Not Found".to_string(),
            }
            .into()
        })
    }
}

/// A [`GitExporter`] serving canned exports by URL.
#[derive(Default)]
pub struct MockExporter {
    repos: HashMap<String, GitInfo>,
    calls: ExportCalls,
}

impl MockExporter {
    /// An exporter that knows no repositories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `uri` as `store_path` at `rev`, whatever ref or rev is asked for.
    pub fn with_repo(
        mut self,
        uri: &str,
        store_path: impl AsRef<Path>,
        rev: Rev,
        rev_count: Option<u64>,
    ) -> Self {
        self.repos.insert(
            uri.to_string(),
            GitInfo {
                store_path: store_path.as_ref().to_path_buf(),
                rev,
                rev_count,
            },
        );
        self
    }

    /// Shared log of every export requested.
    pub fn calls(&self) -> ExportCalls {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl GitExporter for MockExporter {
    async fn export_git(
        &self,
        uri: &str,
        git_ref: Option<&str>,
        rev: Option<&Rev>,
        _name: &str,
    ) -> Result<GitInfo> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((uri.to_string(), git_ref.map(str::to_string), rev.copied()));
        }
        self.repos.get(uri).cloned().ok_or_else(|| {
            FlakeError::GitCloneFailed {
                url: uri.to_string(),
                reason: "repository not found".to_string(),
            }
            .into()
        })
    }
}
