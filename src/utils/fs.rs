//! File system utilities.
//!
//! Lock files and registries are rewritten in place while other processes
//! may be reading them, so every write goes through [`atomic_write`]:
//! the content lands in a sibling temp file which is then renamed over the
//! target.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Ensures a directory exists, creating it and all parent directories if necessary.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Atomically write bytes to a file, creating parent directories as needed.
///
/// The data is written to `<path>.tmp`, synced, and renamed over `path`, so
/// readers observe either the old or the new content in full.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");

    {
        let mut file = fs::File::create(&temp_path).with_context(|| {
            format!(
                "Failed to create temp file: {}\n\nCheck file permissions and that directory exists",
                temp_path.display()
            )
        })?;

        file.write_all(content)
            .with_context(|| format!("Failed to write to temp file: {}", temp_path.display()))?;

        file.sync_all().with_context(|| "Failed to sync file to disk")?;
    }

    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Copy a directory tree, skipping any `.git` directories. Symlinks are
/// recreated, not followed.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    ensure_dir(dst)?;
    for entry in walkdir::WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        if relative.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            ensure_dir(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        } else if entry.file_type().is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Recreate the link at `src` as `dst`, keeping its target verbatim.
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("Failed to read link {}", src.display()))?;

    #[cfg(unix)]
    let created = std::os::unix::fs::symlink(&link, dst);
    #[cfg(windows)]
    let created = if src.is_dir() {
        std::os::windows::fs::symlink_dir(&link, dst)
    } else {
        std::os::windows::fs::symlink_file(&link, dst)
    };

    created.with_context(|| format!("Failed to link {} -> {}", dst.display(), link.display()))
}
