//! Content-addressed storage for fetched sources.
//!
//! The resolver only needs two things from a store: to check that a path a
//! fetcher handed back really lives in it, and (for the bundled fetchers) to
//! add a directory tree under a name. [`LocalStore`] implements both on a
//! plain directory where every entry is named `<hash>-<name>`.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::core::FlakeError;
use crate::utils::{copy_dir_all, ensure_dir};

/// Storage collaborator used by the resolver and the fetchers.
pub trait Store: Send + Sync {
    /// Root directory of the store.
    fn store_dir(&self) -> &Path;

    /// Fail unless `path` is a valid entry of this store.
    fn assert_store_path(&self, path: &Path) -> Result<()>;

    /// Copy the tree at `src` into the store under `name` and return its path.
    fn add_to_store(&self, name: &str, src: &Path) -> Result<PathBuf>;
}

/// A store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (and create if needed) a store at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        ensure_dir(&root)?;
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize store directory: {}", root.display()))?;
        Ok(Self {
            root,
        })
    }
}

/// Hash a directory tree: relative paths, entry kinds, file contents and
/// link targets in sorted order.
pub fn hash_tree(src: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(src).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        if relative.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        if entry.file_type().is_file() {
            hasher.update(b"f");
            let content = std::fs::read(entry.path())
                .with_context(|| format!("Failed to read {}", entry.path().display()))?;
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
        } else if entry.file_type().is_dir() {
            hasher.update(b"d");
        } else if entry.file_type().is_symlink() {
            hasher.update(b"l");
            let link = std::fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            let link = link.to_string_lossy();
            hasher.update((link.len() as u64).to_le_bytes());
            hasher.update(link.as_bytes());
        }
    }
    // 32 hex characters are plenty to keep entries apart
    Ok(hex::encode(&hasher.finalize()[..16]))
}

impl Store for LocalStore {
    fn store_dir(&self) -> &Path {
        &self.root
    }

    fn assert_store_path(&self, path: &Path) -> Result<()> {
        let invalid = || FlakeError::InvalidStorePath {
            path: path.display().to_string(),
        };
        let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
        let in_store = path.parent() == Some(self.root.as_path())
            && name.split_once('-').is_some_and(|(hash, rest)| {
                hash.len() == 32 && hash.bytes().all(|b| b.is_ascii_hexdigit()) && !rest.is_empty()
            })
            && path.exists();
        if in_store {
            Ok(())
        } else {
            Err(invalid().into())
        }
    }

    fn add_to_store(&self, name: &str, src: &Path) -> Result<PathBuf> {
        let hash = hash_tree(src)?;
        let target = self.root.join(format!("{hash}-{name}"));
        if target.exists() {
            tracing::trace!("Store path {} already present", target.display());
            return Ok(target);
        }

        // Copy into a sibling temp dir first so a partial copy never looks valid
        let staging = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(&self.root)
            .context("Failed to create store staging directory")?;
        copy_dir_all(src, staging.path())?;
        let staged = staging.keep();
        if let Err(e) = std::fs::rename(&staged, &target) {
            let _ = std::fs::remove_dir_all(&staged);
            if !target.exists() {
                return Err(e).with_context(|| {
                    format!("Failed to move {} into the store", target.display())
                });
            }
        }

        tracing::debug!("Added {} to the store", target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source_tree(temp: &TempDir, content: &str) -> PathBuf {
        let src = temp.path().join(format!("src-{content}"));
        std::fs::create_dir_all(src.join("lib")).unwrap();
        std::fs::write(src.join("flake.toml"), content).unwrap();
        std::fs::write(src.join("lib/default.txt"), "lib").unwrap();
        src
    }

    #[test]
    fn test_add_to_store_is_content_addressed() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().join("store")).unwrap();

        let a = store.add_to_store("source", &source_tree(&temp, "a")).unwrap();
        let a_again = store.add_to_store("source", &source_tree(&temp, "a")).unwrap();
        let b = store.add_to_store("source", &source_tree(&temp, "b")).unwrap();

        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert!(a.join("lib/default.txt").exists());
        assert!(a.file_name().unwrap().to_str().unwrap().ends_with("-source"));
        store.assert_store_path(&a).unwrap();
    }

    #[test]
    fn test_assert_store_path_rejects_outside_paths() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().join("store")).unwrap();
        let src = source_tree(&temp, "a");

        let err = store.assert_store_path(&src).unwrap_err();
        assert!(err.to_string().contains("is not in the store"));

        let bogus = store.store_dir().join("not-hashed");
        std::fs::create_dir_all(&bogus).unwrap();
        assert!(store.assert_store_path(&bogus).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_add_to_store_keeps_symlinks() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::new(temp.path().join("store")).unwrap();
        let src = temp.path().join("linked");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("real.toml"), "name = \"linked\"").unwrap();
        std::os::unix::fs::symlink("real.toml", src.join("flake.toml")).unwrap();

        let path = store.add_to_store("source", &src).unwrap();
        assert_eq!(std::fs::read_to_string(path.join("flake.toml")).unwrap(), "name = \"linked\"");
    }

    #[cfg(unix)]
    #[test]
    fn test_hash_tree_covers_link_targets() {
        let temp = TempDir::new().unwrap();
        let tree = |name: &str, target: &str| {
            let dir = temp.path().join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("x"), "x").unwrap();
            std::fs::write(dir.join("y"), "y").unwrap();
            std::os::unix::fs::symlink(target, dir.join("l")).unwrap();
            dir
        };

        let a = hash_tree(&tree("a", "x")).unwrap();
        let b = hash_tree(&tree("b", "y")).unwrap();
        assert_ne!(a, b);
    }
}
