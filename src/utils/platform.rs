//! Platform helpers: locating executables and expanding user-supplied paths.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Returns true if running on Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Name of the git executable for the current platform.
#[must_use]
pub const fn get_git_command() -> &'static str {
    if is_windows() {
        "git.exe"
    } else {
        "git"
    }
}

/// Whether `cmd` can be found on `PATH`.
#[must_use]
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Expand a leading `~/` and any `$VAR` / `${VAR}` references in `path`.
pub fn resolve_path(path: &str) -> Result<PathBuf> {
    let expanded = if let Some(stripped) = path.strip_prefix("~/") {
        dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
            .join(stripped)
    } else if path.starts_with('~') {
        return Err(anyhow::anyhow!(
            "Invalid path: {path}\n\nTilde expansion only supports '~/' for the home directory"
        ));
    } else {
        PathBuf::from(path)
    };

    let path_str = expanded.to_string_lossy();
    let expanded = shellexpand::env(&path_str).with_context(|| {
        format!(
            "Failed to expand environment variables in path: {path_str}\n\n\
            Use $VAR or ${{VAR}} and make sure the variable is set"
        )
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}
