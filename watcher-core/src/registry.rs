//! The set of decoy paths currently being protected.
//!
//! A [`PathRegistry`] is an immutable snapshot: paths are canonicalized and
//! checked for existence at construction, and lookups need no locking for
//! the lifetime of a monitoring session. Refreshes go through
//! [`RegistryHandle`], which swaps in a complete new snapshot atomically so
//! in-flight matching never observes a partially-updated registry.

use crate::error::WatchError;
use canaryd_lib::models::{normalize_path, DecoyPath};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Immutable snapshot of registered decoy paths, keyed by canonical path.
#[derive(Debug, Default)]
pub struct PathRegistry {
    entries: HashMap<PathBuf, DecoyPath>,
}

impl PathRegistry {
    /// Build a registry from decoy entries.
    ///
    /// Each path is resolved to canonical absolute form; a path that does not
    /// physically exist fails construction, since monitoring a nonexistent
    /// path is undefined.
    pub fn new(decoys: impl IntoIterator<Item = DecoyPath>) -> Result<Self, WatchError> {
        let mut entries = HashMap::new();
        for mut decoy in decoys {
            let canonical =
                decoy
                    .path
                    .canonicalize()
                    .map_err(|source| WatchError::Unavailable {
                        path: decoy.path.clone(),
                        source,
                    })?;
            decoy.path = canonical.clone();
            entries.insert(canonical, decoy);
        }
        Ok(Self { entries })
    }

    /// Match a reported path against the registry.
    ///
    /// The probe is resolved to canonical form when it still exists (symlink
    /// and case differences); for paths that are already gone (deleted or
    /// moved-away decoys) the comparison falls back to lexical cleanup, which
    /// is exact for paths the OS reported from the same watched root.
    #[must_use]
    pub fn lookup(&self, probe: &Path) -> Option<&DecoyPath> {
        if let Ok(canonical) = probe.canonicalize() {
            if let Some(decoy) = self.entries.get(&canonical) {
                return Some(decoy);
            }
        }
        self.entries.get(&normalize_path(probe))
    }

    /// Number of registered decoys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over registered decoys.
    pub fn iter(&self) -> impl Iterator<Item = &DecoyPath> {
        self.entries.values()
    }
}

/// Shared handle to the current registry snapshot.
///
/// The watcher holds a handle and takes a cheap `Arc` snapshot per event;
/// [`RegistryHandle::replace`] installs a new immutable snapshot atomically.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    inner: Arc<RwLock<Arc<PathRegistry>>>,
}

impl RegistryHandle {
    #[must_use]
    pub fn new(registry: PathRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(registry))),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PathRegistry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically install a new snapshot.
    pub fn replace(&self, registry: PathRegistry) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(registry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canaryd_lib::models::TokenCategory;

    fn plant(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, "decoy").unwrap();
        path
    }

    #[test]
    fn registers_and_matches_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = plant(dir.path(), "credentials");

        let registry =
            PathRegistry::new([DecoyPath::new(path.clone(), TokenCategory::Aws)]).unwrap();
        assert_eq!(registry.len(), 1);

        let decoy = registry.lookup(&path).unwrap();
        assert_eq!(decoy.category, TokenCategory::Aws);
    }

    #[test]
    fn nonexistent_path_fails_registration() {
        let result = PathRegistry::new([DecoyPath::new(
            PathBuf::from("/nonexistent/decoy"),
            TokenCategory::Ssh,
        )]);
        assert!(matches!(result, Err(WatchError::Unavailable { .. })));
    }

    #[test]
    fn lookup_matches_deleted_decoy_lexically() {
        let dir = tempfile::tempdir().unwrap();
        let path = plant(dir.path(), "id_rsa");
        let canonical = path.canonicalize().unwrap();

        let registry = PathRegistry::new([DecoyPath::new(path, TokenCategory::Ssh)]).unwrap();

        // After deletion the probe can no longer be canonicalized, but the
        // OS reports the same absolute path it was watching.
        std::fs::remove_file(&canonical).unwrap();
        assert!(registry.lookup(&canonical).is_some());
    }

    #[test]
    fn non_matching_paths_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = plant(dir.path(), "api.env");
        let other = plant(dir.path(), "innocent.txt");

        let registry = PathRegistry::new([DecoyPath::new(path, TokenCategory::Api)]).unwrap();
        assert!(registry.lookup(&other).is_none());
    }

    #[test]
    fn handle_swaps_snapshots_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let first = plant(dir.path(), "one");
        let second = plant(dir.path(), "two");

        let handle = RegistryHandle::new(
            PathRegistry::new([DecoyPath::new(first.clone(), TokenCategory::Aws)]).unwrap(),
        );
        let old_snapshot = handle.snapshot();

        handle.replace(
            PathRegistry::new([DecoyPath::new(second.clone(), TokenCategory::Database)]).unwrap(),
        );

        // The old snapshot is unchanged; the new one sees only the new entry.
        assert!(old_snapshot.lookup(&first).is_some());
        let new_snapshot = handle.snapshot();
        assert!(new_snapshot.lookup(&first).is_none());
        assert!(new_snapshot.lookup(&second).is_some());
    }
}
