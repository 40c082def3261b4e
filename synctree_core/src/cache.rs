use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use synctree_common::Blake3Hash;
use tracing::debug;

type DisposeListener = Box<dyn FnOnce() + Send>;

/// Per-context cache
///
/// Holds the ancestor and remote snapshots captured during refresh, keyed by
/// content digest, so that a `StateRef` can be resolved without asking the
/// remote provider again. Also carries arbitrary named properties for
/// collaborators that want to share state for the lifetime of a session.
#[derive(Default)]
pub struct SynchronizationCache {
    contents: RwLock<HashMap<Blake3Hash, Arc<Vec<u8>>>>,
    properties: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    dispose_listeners: Mutex<Vec<DisposeListener>>,
    disposed: AtomicBool,
}

impl SynchronizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot and return its digest
    pub fn put_content(&self, content: &[u8]) -> Blake3Hash {
        let digest = Blake3Hash::of(content);
        self.contents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(digest)
            .or_insert_with(|| Arc::new(content.to_vec()));
        digest
    }

    /// Drop every snapshot whose digest `keep` rejects; returns how many went
    pub fn retain_contents(&self, keep: impl Fn(&Blake3Hash) -> bool) -> usize {
        let mut contents = self.contents.write().unwrap_or_else(PoisonError::into_inner);
        let before = contents.len();
        contents.retain(|digest, _| keep(digest));
        before - contents.len()
    }

    /// Get a snapshot by digest
    pub fn content(&self, digest: &Blake3Hash) -> Option<Arc<Vec<u8>>> {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(digest)
            .cloned()
    }

    pub fn put<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = self
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()?;
        value.downcast::<T>().ok()
    }

    pub fn remove(&self, name: &str) {
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// Run `listener` when the cache is disposed
    ///
    /// If the cache is already disposed the listener runs immediately.
    pub fn add_dispose_listener(&self, listener: impl FnOnce() + Send + 'static) {
        if self.is_disposed() {
            listener();
            return;
        }
        self.dispose_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Get the number of cached snapshots
    pub fn len(&self) -> usize {
        self.contents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no snapshot is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries and run dispose listeners once
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.contents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        let listeners: Vec<DisposeListener> = std::mem::take(
            &mut *self
                .dispose_listeners
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!("Disposing cache, {} listeners", listeners.len());
        for listener in listeners {
            listener();
        }
    }
}
