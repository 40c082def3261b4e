//! In-memory stores, mainly for tests and embedding.

use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};
use synctree_common::{
    ContentStore, RemoteState, RemoteStateProvider, ResourcePath, StoreError, SyncError,
};

fn path_of(raw: &str) -> Result<ResourcePath, SyncError> {
    ResourcePath::parse(raw)
}

fn files_in<V>(map: &BTreeMap<ResourcePath, V>, root: &ResourcePath) -> Vec<ResourcePath> {
    map.range(root.clone()..)
        .take_while(|(path, _)| root.is_prefix_of(path))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Content store holding files in a map
pub struct MemoryStore {
    instance_id: String,
    files: RwLock<BTreeMap<ResourcePath, Vec<u8>>>,
    failing: RwLock<HashSet<ResourcePath>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            instance_id: "memory:local".to_string(),
            files: RwLock::new(BTreeMap::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    /// Add or replace a file; `raw` is parsed like [`ResourcePath::parse`]
    pub fn insert(&self, raw: &str, content: impl AsRef<[u8]>) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, content.as_ref().to_vec());
        Ok(())
    }

    pub fn remove(&self, raw: &str) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path);
        Ok(())
    }

    pub fn get(&self, raw: &str) -> Option<Vec<u8>> {
        let path = path_of(raw).ok()?;
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
            .cloned()
    }

    /// Make every read, write and delete of `raw` fail
    pub fn fail_on(&self, raw: &str) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path);
        Ok(())
    }

    fn check(&self, path: &ResourcePath) -> Result<(), StoreError> {
        let failing = self.failing.read().unwrap_or_else(PoisonError::into_inner);
        if failing.contains(path) {
            return Err(StoreError::PermissionDenied(path.to_string()));
        }
        Ok(())
    }
}

impl ContentStore for MemoryStore {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn read(&self, path: &ResourcePath) -> Result<Vec<u8>, StoreError> {
        self.check(path)?;
        self.files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn write(&self, path: &ResourcePath, content: &[u8]) -> Result<(), StoreError> {
        self.check(path)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), content.to_vec());
        Ok(())
    }

    fn delete(&self, path: &ResourcePath) -> Result<(), StoreError> {
        self.check(path)?;
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files_in(&files, root))
    }
}

/// Remote state provider holding ancestor and remote contents in maps
#[derive(Default)]
pub struct MemoryRemoteProvider {
    ancestors: RwLock<BTreeMap<ResourcePath, Vec<u8>>>,
    remotes: RwLock<BTreeMap<ResourcePath, Vec<u8>>>,
    failing: RwLock<HashSet<ResourcePath>>,
}

impl MemoryRemoteProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ancestor(&self, raw: &str, content: impl AsRef<[u8]>) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.ancestors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, content.as_ref().to_vec());
        Ok(())
    }

    pub fn set_remote(&self, raw: &str, content: impl AsRef<[u8]>) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, content.as_ref().to_vec());
        Ok(())
    }

    pub fn remove_ancestor(&self, raw: &str) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.ancestors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path);
        Ok(())
    }

    pub fn remove_remote(&self, raw: &str) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path);
        Ok(())
    }

    /// Make every fetch of `raw` fail
    pub fn fail_on(&self, raw: &str) -> Result<(), SyncError> {
        let path = path_of(raw)?;
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path);
        Ok(())
    }
}

impl RemoteStateProvider for MemoryRemoteProvider {
    fn fetch(&self, path: &ResourcePath) -> Result<RemoteState, StoreError> {
        if self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
        {
            return Err(StoreError::Other(format!("remote unavailable for {}", path)));
        }
        let ancestor = self
            .ancestors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        let remote = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned();
        Ok(RemoteState::new(ancestor, remote))
    }

    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError> {
        let ancestors = self.ancestors.read().unwrap_or_else(PoisonError::into_inner);
        let remotes = self.remotes.read().unwrap_or_else(PoisonError::into_inner);
        let mut files = files_in(&ancestors, root);
        files.extend(files_in(&remotes, root));
        files.sort();
        files.dedup();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    #[test]
    fn test_memory_store_lists_subtree() {
        let store = MemoryStore::new();
        store.insert("a/x.txt", "x").unwrap();
        store.insert("a/b/y.txt", "y").unwrap();
        store.insert("ab.txt", "z").unwrap();

        let files = store.files_under(&p("a")).unwrap();
        assert_eq!(files, vec![p("a/b/y.txt"), p("a/x.txt")]);
        assert_eq!(store.files_under(&ResourcePath::root()).unwrap().len(), 3);
    }

    #[test]
    fn test_memory_store_failures() {
        let store = MemoryStore::new();
        store.insert("a.txt", "x").unwrap();
        store.fail_on("a.txt").unwrap();
        assert!(matches!(
            store.read(&p("a.txt")),
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(store.delete(&p("missing.txt")).is_err());
    }

    #[test]
    fn test_memory_remote_provider() {
        let remote = MemoryRemoteProvider::new();
        remote.set_ancestor("a.txt", "base").unwrap();
        remote.set_remote("b.txt", "new").unwrap();

        let state = remote.fetch(&p("a.txt")).unwrap();
        assert_eq!(state.ancestor.as_deref(), Some(&b"base"[..]));
        assert!(state.remote.is_none());
        assert_eq!(
            remote.files_under(&ResourcePath::root()).unwrap(),
            vec![p("a.txt"), p("b.txt")]
        );
    }

    #[test]
    fn test_parent_references_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.insert("a/../b.txt", "x"),
            Err(SyncError::Path(_))
        ));
        assert!(store.get("a/../b.txt").is_none());
        assert!(store.files_under(&ResourcePath::root()).unwrap().is_empty());

        let remote = MemoryRemoteProvider::new();
        assert!(remote.set_remote("../outside.txt", "x").is_err());
    }
}
