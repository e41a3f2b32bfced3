//! Utility modules shared across the crate.

pub mod fs;
pub mod platform;
pub mod progress;

pub use fs::{atomic_write, copy_dir_all, ensure_dir};
pub use platform::{command_exists, get_git_command, resolve_path};

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize `value` as JSON indented with four spaces and a trailing newline.
///
/// Lock files and registries share this layout so diffs stay stable.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    value.serialize(&mut serializer).context("Failed to serialize JSON")?;
    let mut text = String::from_utf8(buffer).context("Serialized JSON is not UTF-8")?;
    text.push('\n');
    Ok(text)
}
