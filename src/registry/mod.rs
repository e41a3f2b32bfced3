//! Flake registries and alias lookup.
//!
//! A registry maps references (usually aliases such as `nixpkgs`) to other
//! references. Several registries are consulted in a fixed precedence order,
//! see [`RegistryKind`], and [`lookup_flake`] follows mappings until it
//! reaches a reference that no registry rewrites.
//!
//! # File Format
//!
//! ```json
//! {
//!     "version": 1,
//!     "flakes": {
//!         "nixpkgs": { "uri": "github:NixOS/nixpkgs" }
//!     }
//! }
//! ```
//!
//! A missing file is an empty registry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::constants::REGISTRY_VERSION;
use crate::core::FlakeError;
use crate::flake_ref::{FlakeRef, FlakeRefData};
use crate::utils::{atomic_write, to_pretty_json};

/// One entry of the `flakes` object in a registry file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEntry {
    uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    version: u64,
    #[serde(default)]
    flakes: BTreeMap<String, RegistryEntry>,
}

/// An ordered mapping from reference to reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    /// The mappings, ordered by source reference
    pub entries: BTreeMap<FlakeRef, FlakeRef>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping.
    pub fn insert(&mut self, from: FlakeRef, to: FlakeRef) -> Option<FlakeRef> {
        self.entries.insert(from, to)
    }

    /// Remove a mapping.
    pub fn remove(&mut self, from: &FlakeRef) -> Option<FlakeRef> {
        self.entries.remove(from)
    }

    /// Look up a mapping.
    #[must_use]
    pub fn get(&self, from: &FlakeRef) -> Option<&FlakeRef> {
        self.entries.get(from)
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate mappings in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&FlakeRef, &FlakeRef)> {
        self.entries.iter()
    }

    /// Read a registry file. A missing file yields an empty registry.
    ///
    /// The version is checked before anything else in the document, so a
    /// file with an unknown version fails even if the rest would parse.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read flake registry: {}", path.display()))?;
        let parse_error = |reason: String| FlakeError::RegistryParseError {
            file: path.display().to_string(),
            reason,
        };

        let json: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        let version = json.get("version").and_then(serde_json::Value::as_u64).unwrap_or(0);
        if version != REGISTRY_VERSION {
            return Err(FlakeError::UnsupportedVersion {
                kind: "flake registry".to_string(),
                path: path.display().to_string(),
                version,
            }
            .into());
        }

        let file: RegistryFile =
            serde_json::from_value(json).map_err(|e| parse_error(e.to_string()))?;
        let mut registry = Self::new();
        for (from, entry) in file.flakes {
            let from_ref: FlakeRef = from
                .parse()
                .with_context(|| format!("Invalid registry key in {}", path.display()))?;
            let to_ref: FlakeRef = entry
                .uri
                .parse()
                .with_context(|| format!("Invalid registry entry '{from}' in {}", path.display()))?;
            registry.insert(from_ref, to_ref);
        }
        Ok(registry)
    }

    /// Write the registry atomically, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = RegistryFile {
            version: REGISTRY_VERSION,
            flakes: self
                .entries
                .iter()
                .map(|(from, to)| {
                    (
                        from.to_string(),
                        RegistryEntry {
                            uri: to.to_string(),
                        },
                    )
                })
                .collect(),
        };
        let content = to_pretty_json(&file)?;
        atomic_write(path, content.as_bytes())
            .with_context(|| format!("Failed to write flake registry: {}", path.display()))
    }
}

/// Where a registry in the precedence list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegistryKind {
    /// Configured global registry
    Global,
    /// Per-user registry
    User,
    /// Machine-local registry below the data directory
    Local,
    /// Overrides given on the command line
    Flag,
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::User => write!(f, "user"),
            Self::Local => write!(f, "local"),
            Self::Flag => write!(f, "flag"),
        }
    }
}

/// The ordered list of registries consulted during one session.
///
/// Built once and shared read-only for the whole resolution.
#[derive(Debug, Clone, Default)]
pub struct Registries {
    registries: Vec<(RegistryKind, Arc<Registry>)>,
}

impl Registries {
    /// Build from an explicit precedence list.
    #[must_use]
    pub fn new(registries: Vec<(RegistryKind, Arc<Registry>)>) -> Self {
        Self {
            registries,
        }
    }

    /// Build from plain registries, all tagged as [`RegistryKind::Flag`].
    #[must_use]
    pub fn from_registries(registries: impl IntoIterator<Item = Registry>) -> Self {
        Self::new(registries.into_iter().map(|r| (RegistryKind::Flag, Arc::new(r))).collect())
    }

    /// Load the global, user, local and flag registries for a session.
    ///
    /// In pure mode the on-disk registries are replaced by empty placeholders
    /// so evaluation cannot depend on machine state; the flag registry is
    /// always used.
    pub fn load(settings: &Settings, flag: Registry) -> Result<Self> {
        let mut registries = Vec::with_capacity(4);

        if settings.pure_eval {
            tracing::debug!("Pure evaluation: skipping on-disk flake registries");
            registries.push((RegistryKind::Global, Arc::new(Registry::new())));
            registries.push((RegistryKind::User, Arc::new(Registry::new())));
            registries.push((RegistryKind::Local, Arc::new(Registry::new())));
        } else {
            let global = match settings.global_registry_path()? {
                Some(path) => Registry::read(&path)?,
                None => Registry::new(),
            };
            registries.push((RegistryKind::Global, Arc::new(global)));
            registries
                .push((RegistryKind::User, Arc::new(Registry::read(&settings.user_registry_path()?)?)));
            registries.push((
                RegistryKind::Local,
                Arc::new(Registry::read(&settings.local_registry_path()?)?),
            ));
        }

        registries.push((RegistryKind::Flag, Arc::new(flag)));
        Ok(Self::new(registries))
    }

    /// Iterate registries in precedence order.
    pub fn iter(&self) -> impl Iterator<Item = (RegistryKind, &Registry)> {
        self.registries.iter().map(|(kind, registry)| (*kind, registry.as_ref()))
    }

    /// The registry of the given kind, if present.
    #[must_use]
    pub fn get(&self, kind: RegistryKind) -> Option<&Registry> {
        self.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    fn alias_ids(&self) -> impl Iterator<Item = &str> {
        self.iter().flat_map(|(_, registry)| registry.entries.keys()).filter_map(|key| {
            match &key.data {
                FlakeRefData::Alias {
                    id,
                } => Some(id.as_str()),
                _ => None,
            }
        })
    }
}

/// Parse `alias=reference` pairs given on the command line into a registry.
pub fn parse_overrides<S: AsRef<str>>(overrides: &[S]) -> Result<Registry> {
    let mut registry = Registry::new();
    for raw in overrides {
        let raw = raw.as_ref();
        let (from, to) = raw
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid override '{raw}', expected <alias>=<reference>"))?;
        registry.insert(from.trim().parse()?, to.trim().parse()?);
    }
    Ok(registry)
}

fn find_mapping<'a>(registries: &'a Registries, flake_ref: &FlakeRef) -> Option<&'a FlakeRef> {
    let base = (!flake_ref.is_direct()).then(|| flake_ref.base_ref());
    registries.iter().find_map(|(kind, registry)| {
        let found = registry
            .get(flake_ref)
            .or_else(|| base.as_ref().and_then(|base| registry.get(base)));
        if found.is_some() {
            tracing::trace!("Registry '{kind}' maps '{flake_ref}'");
        }
        found
    })
}

/// Resolve a reference through the registries until no registry rewrites it.
///
/// An alias input matches an entry keyed by the same alias, or by the alias
/// without its `ref`/`rev`; the first registry in precedence order wins. A
/// `ref` or `rev` given on an alias overrides the one in the registry entry.
/// A chain that revisits a reference fails with [`FlakeError::RegistryCycle`];
/// an alias that no registry maps fails with [`FlakeError::UnresolvedAlias`].
pub fn lookup_flake(flake_ref: &FlakeRef, registries: &Registries) -> Result<FlakeRef> {
    let mut current = flake_ref.clone();
    let mut visited = vec![current.clone()];

    while let Some(mapped) = find_mapping(registries, &current) {
        let mut new_ref = mapped.clone();
        if !current.is_direct() {
            if let Some(git_ref) = &current.git_ref {
                new_ref.git_ref = Some(git_ref.clone());
            }
            if let Some(rev) = current.rev {
                new_ref.rev = Some(rev);
            }
        }

        if visited.contains(&new_ref) {
            visited.push(new_ref);
            let chain = visited.iter().map(ToString::to_string).collect::<Vec<_>>().join(" - ");
            return Err(FlakeError::RegistryCycle {
                chain,
            }
            .into());
        }

        visited.push(new_ref.clone());
        current = new_ref;
    }

    if !current.is_direct() {
        let requested = current.base_ref().to_string();
        let mut similar: Vec<(usize, String)> = registries
            .alias_ids()
            .map(|id| (strsim::levenshtein(&requested, id), id.to_string()))
            .filter(|(distance, _)| *distance <= 3)
            .collect();
        similar.sort();
        similar.dedup();
        return Err(FlakeError::UnresolvedAlias {
            flake_ref: current.to_string(),
            similar: similar.into_iter().map(|(_, id)| id).collect(),
        }
        .into());
    }

    if visited.len() > 1 {
        tracing::debug!("Resolved '{flake_ref}' to '{current}'");
    }
    Ok(current)
}
