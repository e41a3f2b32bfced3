//! Lock files.
//!
//! A lock file records a resolved dependency tree so it can be replayed
//! exactly. Every reference in it is pinned to a revision; [`LockFile::read`]
//! refuses files that are not. The on-disk form is JSON:
//!
//! ```json
//! {
//!     "nonFlakeRequires": {
//!         "data": { "uri": "github:owner/data/<rev>" }
//!     },
//!     "requires": {
//!         "dep": {
//!             "nonFlakeRequires": {},
//!             "requires": {},
//!             "uri": "github:owner/dep/<rev>"
//!         }
//!     },
//!     "version": 1
//! }
//! ```
//!
//! The top flake itself has no `uri`: the lock file lives next to it.

mod io;

use std::collections::BTreeMap;

use crate::flake_ref::FlakeRef;
use crate::resolver::Dependencies;

/// A locked flake and its locked dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlakeEntry {
    /// The pinned reference the flake was fetched from
    pub uri: FlakeRef,
    /// Locked plain sources, by alias
    pub non_flake_entries: BTreeMap<String, FlakeRef>,
    /// Locked flakes, by flake id
    pub flake_entries: BTreeMap<String, FlakeEntry>,
}

/// The contents of a `flake.lock` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockFile {
    /// Locked plain sources of the top flake, by alias
    pub non_flake_entries: BTreeMap<String, FlakeRef>,
    /// Locked flakes required by the top flake, by flake id
    pub flake_entries: BTreeMap<String, FlakeEntry>,
}

impl FlakeEntry {
    /// Describe a resolved subtree.
    ///
    /// When two dependencies share an id or alias the first one is kept.
    pub fn from_dependencies<V>(deps: &Dependencies<V>) -> Self {
        let mut non_flake_entries = BTreeMap::new();
        for non_flake in &deps.non_flake_deps {
            non_flake_entries
                .entry(non_flake.alias.clone())
                .or_insert_with(|| non_flake.flake_ref.clone());
        }

        let mut flake_entries = BTreeMap::new();
        for dep in &deps.flake_deps {
            if flake_entries.contains_key(&dep.flake.id) {
                tracing::debug!(
                    "Flake '{}' is required more than once by '{}'; locking the first",
                    dep.flake.id,
                    deps.flake.id
                );
                continue;
            }
            flake_entries.insert(dep.flake.id.clone(), Self::from_dependencies(dep));
        }

        Self {
            uri: deps.flake.flake_ref.clone(),
            non_flake_entries,
            flake_entries,
        }
    }
}

impl LockFile {
    /// An empty lock file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the lock file locks nothing.
    pub fn is_empty(&self) -> bool {
        self.non_flake_entries.is_empty() && self.flake_entries.is_empty()
    }

    /// Describe a resolved tree. The top flake's own reference is dropped.
    pub fn from_dependencies<V>(deps: &Dependencies<V>) -> Self {
        let FlakeEntry {
            non_flake_entries,
            flake_entries,
            ..
        } = FlakeEntry::from_dependencies(deps);
        Self {
            non_flake_entries,
            flake_entries,
        }
    }

    /// Every reference in the file with the path of lock keys leading to it.
    pub fn references(&self) -> Vec<(String, &FlakeRef)> {
        fn collect<'a>(
            prefix: &str,
            non_flake_entries: &'a BTreeMap<String, FlakeRef>,
            flake_entries: &'a BTreeMap<String, FlakeEntry>,
            out: &mut Vec<(String, &'a FlakeRef)>,
        ) {
            for (alias, flake_ref) in non_flake_entries {
                out.push((format!("{prefix}{alias}"), flake_ref));
            }
            for (id, entry) in flake_entries {
                let path = format!("{prefix}{id}");
                out.push((path.clone(), &entry.uri));
                collect(&format!("{path}/"), &entry.non_flake_entries, &entry.flake_entries, out);
            }
        }

        let mut out = Vec::new();
        collect("", &self.non_flake_entries, &self.flake_entries, &mut out);
        out
    }
}
