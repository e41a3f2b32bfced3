//! Reading and writing `flake.lock`.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::{FlakeEntry, LockFile};
use crate::constants::LOCK_FILE_VERSION;
use crate::core::FlakeError;
use crate::flake_ref::FlakeRef;
use crate::utils::{atomic_write, to_pretty_json};

#[derive(Debug, Serialize, Deserialize)]
struct UriJson {
    uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryJson {
    uri: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    non_flake_requires: BTreeMap<String, UriJson>,
    #[serde(default, deserialize_with = "null_as_empty")]
    requires: BTreeMap<String, EntryJson>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFileJson {
    version: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    non_flake_requires: BTreeMap<String, UriJson>,
    #[serde(default, deserialize_with = "null_as_empty")]
    requires: BTreeMap<String, EntryJson>,
}

/// Older writers emitted `null` for empty sections.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a reference from a lock file and insist that it is pinned.
fn locked_ref(uri: &str, key: &str) -> Result<FlakeRef> {
    let flake_ref: FlakeRef =
        uri.parse().with_context(|| format!("Invalid reference for '{key}'"))?;
    if !flake_ref.is_immutable() {
        return Err(anyhow::Error::from(FlakeError::ImpureFetch {
            flake_ref: flake_ref.to_string(),
        })
        .context(format!("lock file entry '{key}' is not pinned to a revision")));
    }
    Ok(flake_ref)
}

fn read_non_flake(
    prefix: &str,
    entries: BTreeMap<String, UriJson>,
) -> Result<BTreeMap<String, FlakeRef>> {
    entries
        .into_iter()
        .map(|(alias, entry)| -> Result<(String, FlakeRef)> {
            let flake_ref = locked_ref(&entry.uri, &format!("{prefix}{alias}"))?;
            Ok((alias, flake_ref))
        })
        .collect()
}

fn read_flakes(
    prefix: &str,
    entries: BTreeMap<String, EntryJson>,
) -> Result<BTreeMap<String, FlakeEntry>> {
    entries
        .into_iter()
        .map(|(id, entry)| -> Result<(String, FlakeEntry)> {
            let key = format!("{prefix}{id}");
            let uri = locked_ref(&entry.uri, &key)?;
            let nested = format!("{key}/");
            let flake_entry = FlakeEntry {
                uri,
                non_flake_entries: read_non_flake(&nested, entry.non_flake_requires)?,
                flake_entries: read_flakes(&nested, entry.requires)?,
            };
            Ok((id, flake_entry))
        })
        .collect()
}

fn non_flake_json(entries: &BTreeMap<String, FlakeRef>) -> BTreeMap<String, UriJson> {
    entries
        .iter()
        .map(|(alias, flake_ref)| {
            (
                alias.clone(),
                UriJson {
                    uri: flake_ref.to_string(),
                },
            )
        })
        .collect()
}

fn flakes_json(entries: &BTreeMap<String, FlakeEntry>) -> BTreeMap<String, EntryJson> {
    entries
        .iter()
        .map(|(id, entry)| {
            if !entry.uri.is_immutable() {
                tracing::warn!("Locking mutable reference '{}' for '{}'", entry.uri, id);
            }
            (
                id.clone(),
                EntryJson {
                    uri: entry.uri.to_string(),
                    non_flake_requires: non_flake_json(&entry.non_flake_entries),
                    requires: flakes_json(&entry.flake_entries),
                },
            )
        })
        .collect()
}

impl LockFile {
    /// Parse lock file JSON. `origin` names the source in error messages.
    pub fn from_json_str(content: &str, origin: &str) -> Result<Self> {
        let parse_error = |reason: String| FlakeError::LockFileParseError {
            file: origin.to_string(),
            reason,
        };

        let json: serde_json::Value =
            serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?;
        let version = json.get("version").and_then(serde_json::Value::as_u64).unwrap_or(0);
        if version != LOCK_FILE_VERSION {
            return Err(FlakeError::UnsupportedVersion {
                kind: "lock file".to_string(),
                path: origin.to_string(),
                version,
            }
            .into());
        }

        let file: LockFileJson =
            serde_json::from_value(json).map_err(|e| parse_error(e.to_string()))?;
        let lock_file = Self {
            non_flake_entries: read_non_flake("", file.non_flake_requires)
                .with_context(|| format!("Invalid lock file {origin}"))?,
            flake_entries: read_flakes("", file.requires)
                .with_context(|| format!("Invalid lock file {origin}"))?,
        };
        Ok(lock_file)
    }

    /// Load a lock file. A missing file is an empty lock file.
    ///
    /// Fails if the version is not 1 or any entry is not pinned to a revision.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read lock file: {}", path.display()))?;
        Self::from_json_str(&content, &path.display().to_string())
    }

    /// The JSON text of the lock file, keys sorted and indented by four spaces.
    pub fn to_json_string(&self) -> Result<String> {
        for (alias, flake_ref) in &self.non_flake_entries {
            if !flake_ref.is_immutable() {
                tracing::warn!("Locking mutable reference '{}' for '{}'", flake_ref, alias);
            }
        }
        let file = LockFileJson {
            version: LOCK_FILE_VERSION,
            non_flake_requires: non_flake_json(&self.non_flake_entries),
            requires: flakes_json(&self.flake_entries),
        };
        to_pretty_json(&file)
    }

    /// Write the lock file atomically, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        let content = self.to_json_string()?;
        atomic_write(path, content.as_bytes())
            .with_context(|| format!("Cannot write lock file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_rev;
    use tempfile::TempDir;

    fn sample() -> LockFile {
        let mut nested = FlakeEntry {
            uri: FlakeRef::git("https://example.org/dep.git").with_ref("main").with_rev(test_rev(2)),
            non_flake_entries: BTreeMap::new(),
            flake_entries: BTreeMap::new(),
        };
        nested
            .non_flake_entries
            .insert("assets".to_string(), FlakeRef::github("owner", "assets").with_rev(test_rev(3)));

        let mut lock = LockFile::new();
        lock.flake_entries.insert("dep".to_string(), nested);
        lock.non_flake_entries
            .insert("data".to_string(), FlakeRef::github("owner", "data").with_rev(test_rev(4)));
        lock
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/flake.lock");
        let lock = sample();
        lock.write(&path).unwrap();
        assert_eq!(LockFile::read(&path).unwrap(), lock);
    }

    #[test]
    fn test_json_layout() {
        let text = sample().to_json_string().unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["nonFlakeRequires"]["data"]["uri"], format!("github:owner/data/{}", test_rev(4)));
        assert_eq!(
            json["requires"]["dep"]["nonFlakeRequires"]["assets"]["uri"],
            format!("github:owner/assets/{}", test_rev(3))
        );
        assert!(text.contains("\n    \"nonFlakeRequires\""));
        // Sorted keys: "nonFlakeRequires" < "requires" < "version"
        let non_flake = text.find("\"nonFlakeRequires\"").unwrap();
        let version = text.find("\"version\"").unwrap();
        assert!(non_flake < version);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(LockFile::read(&temp.path().join("flake.lock")).unwrap().is_empty());
    }

    #[test]
    fn test_version_gate() {
        for content in [
            r#"{"version": 2, "nonFlakeRequires": {}, "requires": {}}"#,
            r#"{"nonFlakeRequires": {}, "requires": {}}"#,
        ] {
            let err = LockFile::from_json_str(content, "flake.lock").unwrap_err();
            assert!(matches!(
                err.downcast_ref::<FlakeError>(),
                Some(FlakeError::UnsupportedVersion { .. })
            ));
        }
    }

    #[test]
    fn test_mutable_entry_is_rejected() {
        let content = r#"{"version": 1, "nonFlakeRequires": {"data": {"uri": "github:owner/data"}}, "requires": {}}"#;
        let err = LockFile::from_json_str(content, "flake.lock").unwrap_err();
        assert!(err.chain().any(|cause| matches!(
            cause.downcast_ref::<FlakeError>(),
            Some(FlakeError::ImpureFetch { .. })
        )));
    }

    #[test]
    fn test_mutable_nested_entry_is_rejected() {
        let content = format!(
            r#"{{"version": 1, "requires": {{"dep": {{"uri": "github:owner/dep/{}", "requires": {{"inner": {{"uri": "github:owner/inner/main"}}}}}}}}}}"#,
            test_rev(1)
        );
        let err = LockFile::from_json_str(&content, "flake.lock").unwrap_err();
        assert!(format!("{err:#}").contains("dep/inner"));
    }

    #[test]
    fn test_null_sections_read_as_empty() {
        let content = r#"{"version": 1, "nonFlakeRequires": null, "requires": null}"#;
        assert!(LockFile::from_json_str(content, "flake.lock").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_json() {
        let err = LockFile::from_json_str("{not json", "flake.lock").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FlakeError>(),
            Some(FlakeError::LockFileParseError { .. })
        ));
    }
}
