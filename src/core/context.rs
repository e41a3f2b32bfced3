//! Per-session resolution state.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::Settings;
use crate::eval::Evaluator;
use crate::fetch::Fetcher;
use crate::registry::Registries;
use crate::store::Store;

/// Everything a resolution needs, assembled once per session.
///
/// The registries are loaded up front and shared read-only. The only mutable
/// state is the list of store paths the evaluator may read, which exists
/// only when `restrict_eval` is set.
pub struct ResolveContext<E: Evaluator> {
    /// Session settings
    pub settings: Settings,
    /// Registries in lookup precedence order
    pub registries: Arc<Registries>,
    /// The store every fetched source lands in
    pub store: Arc<dyn Store>,
    /// Fetch dispatch
    pub fetcher: Fetcher,
    /// Evaluator for flake descriptions
    pub evaluator: E,
    allowed_paths: Option<Mutex<BTreeSet<PathBuf>>>,
}

impl<E: Evaluator> ResolveContext<E> {
    /// Assemble a context. Path restriction follows `settings.restrict_eval`.
    pub fn new(
        settings: Settings,
        registries: Arc<Registries>,
        store: Arc<dyn Store>,
        fetcher: Fetcher,
        evaluator: E,
    ) -> Self {
        let allowed_paths = settings.restrict_eval.then(|| Mutex::new(BTreeSet::new()));
        Self {
            settings,
            registries,
            store,
            fetcher,
            evaluator,
            allowed_paths,
        }
    }

    /// Permit the evaluator to read `path`. No-op without path restriction.
    pub fn allow_path(&self, path: &Path) {
        if let Some(allowed) = &self.allowed_paths {
            let mut allowed = allowed.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            allowed.insert(path.to_path_buf());
        }
    }

    /// The recorded paths, or `None` when reads are unrestricted.
    pub fn allowed_paths(&self) -> Option<Vec<PathBuf>> {
        self.allowed_paths.as_ref().map(|allowed| {
            allowed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .iter()
                .cloned()
                .collect()
        })
    }
}
