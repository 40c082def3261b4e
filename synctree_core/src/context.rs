//! Synchronization context: binds a scope to a diff tree.
//!
//! The context owns the only write access to its diff tree. Diffs are
//! computed by [`SynchronizationContext::refresh`] from the local content
//! store and the remote state provider; the merge engine mutates the tree
//! through crate-internal hooks while holding a scheduling rule.

use crate::cache::SynchronizationCache;
use crate::diff::{Diff, StateRef, ThreeWayDiff, TwoWayDiff};
use crate::diff_tree::{DiffTreeBatch, DiffTreeDelta, ResourceDiffTree};
use crate::rules::{rule_for, RuleGuard, RuleManager};
use crate::scope::{MappingProvider, SynchronizationScope};
use crossbeam::channel::{bounded, Receiver};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use synctree_common::{
    compact_traversals, Blake3Hash, ContentStore, RemoteState, RemoteStateProvider,
    ResourceMapping, ResourcePath, ResourceTraversal, SessionId, StateSide, StoreError,
    SyncConfig, SyncError, SyncType,
};
use tracing::{debug, info, warn};

/// A remote state the user chose to ignore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// Three-way: ignore the remote while it still has this digest
    Remote(Option<Blake3Hash>),
    /// Two-way: ignore the difference while both sides keep these digests
    Both {
        local: Option<Blake3Hash>,
        remote: Option<Blake3Hash>,
    },
}

/// Ancestor overrides and rejections recorded by merge operations
#[derive(Default)]
struct BaseLedger {
    bases: HashMap<ResourcePath, Option<Arc<Vec<u8>>>>,
    rejections: HashMap<ResourcePath, Rejection>,
}

pub struct SynchronizationContext {
    session: SessionId,
    sync_type: SyncType,
    scope: RwLock<SynchronizationScope>,
    tree: RwLock<ResourceDiffTree>,
    store: Arc<dyn ContentStore>,
    remote: Arc<dyn RemoteStateProvider>,
    rules: Arc<RuleManager>,
    cache: SynchronizationCache,
    ledger: Mutex<BaseLedger>,
    config: SyncConfig,
    outstanding: Arc<AtomicUsize>,
}

impl SynchronizationContext {
    pub fn new(
        scope: SynchronizationScope,
        sync_type: SyncType,
        store: Arc<dyn ContentStore>,
        remote: Arc<dyn RemoteStateProvider>,
    ) -> Self {
        Self {
            session: SessionId::new(),
            sync_type,
            scope: RwLock::new(scope),
            tree: RwLock::new(ResourceDiffTree::new()),
            store,
            remote,
            rules: RuleManager::new(),
            cache: SynchronizationCache::new(),
            ledger: Mutex::new(BaseLedger::default()),
            config: SyncConfig::default(),
            outstanding: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a lock table with other contexts over the same resources
    pub fn with_rule_manager(mut self, rules: Arc<RuleManager>) -> Self {
        self.rules = rules;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    pub fn sync_type(&self) -> SyncType {
        self.sync_type
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    pub fn rule_manager(&self) -> &Arc<RuleManager> {
        &self.rules
    }

    pub fn cache(&self) -> &SynchronizationCache {
        &self.cache
    }

    pub fn scope(&self) -> RwLockReadGuard<'_, SynchronizationScope> {
        self.scope.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read access to the diff tree
    pub fn diff_tree(&self) -> RwLockReadGuard<'_, ResourceDiffTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_diff(&self, path: &ResourcePath) -> Option<Diff> {
        self.diff_tree().get_diff(path).cloned()
    }

    pub fn get_diffs(&self, traversals: &[ResourceTraversal]) -> Vec<Diff> {
        self.diff_tree()
            .get_diffs(traversals)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Receive one delta per diff tree update
    pub fn subscribe(&self) -> Receiver<DiffTreeDelta> {
        self.tree
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribe()
    }

    /// True while a background refresh is running
    pub fn has_outstanding_work(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) > 0
    }

    pub fn is_disposed(&self) -> bool {
        self.cache.is_disposed()
    }

    /// Release the cache and drop all listener channels
    pub fn dispose(&self) {
        info!("Disposing synchronization context {}", self.session);
        self.cache.dispose();
        self.tree
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_subscribers();
    }

    /// Recompute diffs for everything covered by `traversals`
    ///
    /// Work is committed in chunks of `refresh_batch_size` files. On
    /// cancellation the pending chunk is committed and `Cancelled` returned;
    /// the tree keeps whatever was committed.
    pub fn refresh(
        &self,
        traversals: &[ResourceTraversal],
        cancel: Option<&AtomicBool>,
    ) -> Result<DiffTreeDelta, SyncError> {
        self.ensure_active()?;
        let traversals = compact_traversals(traversals);
        let roots: Vec<ResourcePath> = traversals.iter().map(|t| t.root.clone()).collect();
        let Some(rule) = rule_for(&roots) else {
            return Ok(DiffTreeDelta::default());
        };
        let guard = self.rules.acquire(rule)?;

        let candidates = self.refresh_candidates(&traversals)?;
        info!(
            "Refreshing {} resources under {} traversals",
            candidates.len(),
            traversals.len()
        );

        let chunk_size = self.config.refresh_batch_size.max(1);
        let mut delta = DiffTreeDelta::default();
        let mut batch = DiffTreeBatch::new();

        for path in candidates {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                delta.extend(self.commit(batch, &guard)?);
                info!("Refresh cancelled after {} tree changes", delta.len());
                return Err(SyncError::Cancelled);
            }

            match self.compute_diff(&path)? {
                Some(diff) => batch.set(diff),
                None => batch.remove(path),
            }

            if batch.len() >= chunk_size {
                let full = std::mem::take(&mut batch);
                delta.extend(self.commit(full, &guard)?);
            }
        }
        delta.extend(self.commit(batch, &guard)?);

        info!(
            "Refresh complete: {} added, {} removed, {} changed",
            delta.added.len(),
            delta.removed.len(),
            delta.changed.len()
        );
        Ok(delta)
    }

    /// Refresh everything in scope
    ///
    /// Snapshots no longer referenced by any diff are dropped from the cache.
    pub fn refresh_all(&self, cancel: Option<&AtomicBool>) -> Result<DiffTreeDelta, SyncError> {
        let traversals = self.scope().traversals().to_vec();
        let delta = self.refresh(&traversals, cancel)?;
        self.prune_snapshots();
        Ok(delta)
    }

    /// Run a refresh on the rayon pool
    ///
    /// The result arrives on the returned channel; tree updates are also
    /// delivered to subscribers as they are committed.
    pub fn refresh_in_background(
        self: &Arc<Self>,
        traversals: Vec<ResourceTraversal>,
        cancel: Arc<AtomicBool>,
    ) -> Receiver<Result<DiffTreeDelta, SyncError>> {
        let (tx, rx) = bounded(1);
        let context = Arc::clone(self);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        rayon::spawn(move || {
            let result = context.refresh(&traversals, Some(&cancel));
            if let Err(e) = &result {
                warn!("Background refresh failed: {}", e);
            }
            context.outstanding.fetch_sub(1, Ordering::AcqRel);
            let _ = tx.send(result);
        });
        rx
    }

    /// Grow the scope and refresh only what became newly visible
    pub fn extend_scope(
        &self,
        mappings: Vec<ResourceMapping>,
    ) -> Result<DiffTreeDelta, SyncError> {
        self.ensure_active()?;
        let change = self
            .scope
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_mappings(mappings);
        if change.new_traversals.is_empty() {
            return Ok(DiffTreeDelta::default());
        }
        self.refresh(&change.new_traversals, None)
    }

    /// Shrink the scope and drop every diff under the removed roots
    pub fn remove_roots(&self, roots: &[ResourcePath]) -> Result<DiffTreeDelta, SyncError> {
        self.ensure_active()?;
        let Some(rule) = rule_for(roots) else {
            return Ok(DiffTreeDelta::default());
        };
        let guard = self.rules.acquire(rule)?;
        self.scope
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_roots(roots);

        let removed: Vec<ResourceTraversal> = roots
            .iter()
            .cloned()
            .map(ResourceTraversal::infinite)
            .collect();
        let mut batch = DiffTreeBatch::new();
        for path in self.diff_tree().affected_paths(&removed) {
            batch.remove(path);
        }
        let delta = self.commit(batch, &guard)?;
        self.prune_snapshots();
        Ok(delta)
    }

    fn prune_snapshots(&self) {
        let live: HashSet<Blake3Hash> = self
            .diff_tree()
            .iter()
            .flat_map(|diff| diff.state_refs())
            .map(|state| state.digest)
            .collect();
        let dropped = self.cache.retain_contents(|digest| live.contains(digest));
        if dropped > 0 {
            debug!("Dropped {} unreferenced snapshots", dropped);
        }
    }

    /// Pull derived mappings from `provider` and refresh new coverage
    pub fn refresh_scope(
        &self,
        provider: &dyn MappingProvider,
    ) -> Result<DiffTreeDelta, SyncError> {
        self.ensure_active()?;
        let change = self
            .scope
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh(provider);
        if change.new_traversals.is_empty() {
            return Ok(DiffTreeDelta::default());
        }
        self.refresh(&change.new_traversals, None)
    }

    pub(crate) fn ensure_active(&self) -> Result<(), SyncError> {
        if self.is_disposed() {
            return Err(SyncError::Disposed);
        }
        Ok(())
    }

    /// Apply a batch under a rule obtained from this context's lock table
    pub(crate) fn commit(
        &self,
        batch: DiffTreeBatch,
        guard: &RuleGuard,
    ) -> Result<DiffTreeDelta, SyncError> {
        if !guard.is_from(&self.rules) {
            return Err(SyncError::SchedulingViolation(
                "rule was not acquired from this context".to_string(),
            ));
        }
        if batch.is_empty() {
            return Ok(DiffTreeDelta::default());
        }
        self.tree
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(batch, guard)
    }

    pub(crate) fn read_local(&self, path: &ResourcePath) -> Result<Option<Vec<u8>>, SyncError> {
        self.store
            .read_optional(path)
            .map_err(|source| SyncError::ContentIo {
                path: path.clone(),
                source,
            })
    }

    /// Bytes behind a state handle
    ///
    /// Snapshots captured during refresh live in the cache. On a miss the
    /// provider is asked again and the snapshot is accepted only if it still
    /// has the same digest.
    pub(crate) fn resolve_state(
        &self,
        path: &ResourcePath,
        state: Option<&StateRef>,
    ) -> Result<Option<Arc<Vec<u8>>>, SyncError> {
        let Some(state) = state else {
            return Ok(None);
        };
        if let Some(content) = self.cache.content(&state.digest) {
            return Ok(Some(content));
        }
        let content = match state.side {
            StateSide::Local => self.read_local(path)?,
            StateSide::Ancestor | StateSide::Remote => {
                let fetched = self.fetch_remote(path)?;
                if state.side == StateSide::Ancestor {
                    fetched.ancestor
                } else {
                    fetched.remote
                }
            }
        };
        match content {
            Some(bytes) if Blake3Hash::of(&bytes) == state.digest => Ok(Some(Arc::new(bytes))),
            _ => {
                debug!(
                    "{:?} snapshot {} of {} is gone",
                    state.side, state.digest, path
                );
                Err(SyncError::ContentIo {
                    path: path.clone(),
                    source: StoreError::NotFound(format!(
                        "{:?} snapshot is no longer available",
                        state.side
                    )),
                })
            }
        }
    }

    /// Treat `remote` as the new common ancestor of `path`
    pub(crate) fn record_base(&self, path: &ResourcePath, remote: Option<Arc<Vec<u8>>>) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.rejections.remove(path);
        ledger.bases.insert(path.clone(), remote);
    }

    /// Ignore the current remote change of a three-way diff
    pub(crate) fn record_remote_rejection(&self, path: &ResourcePath, remote: Option<Blake3Hash>) {
        match &remote {
            Some(digest) => debug!("Rejecting remote state {} of {}", digest, path),
            None => debug!("Rejecting remote removal of {}", path),
        }
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rejections
            .insert(path.clone(), Rejection::Remote(remote));
    }

    /// Ignore a two-way difference while neither side changes
    pub(crate) fn record_two_way_rejection(
        &self,
        path: &ResourcePath,
        local: Option<Blake3Hash>,
        remote: Option<Blake3Hash>,
    ) {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rejections
            .insert(path.clone(), Rejection::Both { local, remote });
    }

    /// Diff of `path` against the current local, ancestor and remote states
    pub(crate) fn compute_diff(&self, path: &ResourcePath) -> Result<Option<Diff>, SyncError> {
        let local = self.read_local(path)?;
        let state = self.fetch_remote(path)?;
        let diff = self.build_diff(path, local.as_deref(), state);
        debug!("Computed diff for {}: in sync = {}", path, diff.is_in_sync());
        Ok(if diff.is_in_sync() { None } else { Some(diff) })
    }

    fn build_diff(
        &self,
        path: &ResourcePath,
        local: Option<&[u8]>,
        state: RemoteState,
    ) -> Diff {
        let local_ref = local.map(|bytes| StateRef::new(StateSide::Local, bytes));
        let remote_ref = state
            .remote
            .as_deref()
            .map(|bytes| StateRef::new(StateSide::Remote, bytes));

        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);

        let diff = match self.sync_type {
            SyncType::TwoWay => {
                let local_digest = local_ref.map(|s| s.digest);
                let remote_digest = remote_ref.map(|s| s.digest);
                let rejected = match ledger.rejections.get(path) {
                    Some(Rejection::Both { local, remote }) => {
                        *local == local_digest && *remote == remote_digest
                    }
                    _ => false,
                };
                let diff = if rejected {
                    TwoWayDiff::no_change()
                } else {
                    TwoWayDiff::between(local_ref, remote_ref)
                };
                Diff::TwoWay {
                    path: path.clone(),
                    diff,
                }
            }
            SyncType::ThreeWay => {
                let provider_ancestor = state.ancestor.map(Arc::new);
                let ancestor = match ledger.bases.get(path) {
                    Some(base) => {
                        let caught_up = base.as_ref().map(|b| Blake3Hash::of(b))
                            == provider_ancestor.as_ref().map(|a| Blake3Hash::of(a));
                        let base = base.clone();
                        if caught_up {
                            ledger.bases.remove(path);
                        }
                        base
                    }
                    None => provider_ancestor,
                };
                let ancestor_ref = ancestor
                    .as_deref()
                    .map(|bytes| StateRef::new(StateSide::Ancestor, bytes));

                let remote_rejected = match ledger.rejections.get(path) {
                    Some(Rejection::Remote(digest)) => *digest == remote_ref.map(|s| s.digest),
                    _ => false,
                };
                if !remote_rejected {
                    ledger.rejections.remove(path);
                }

                let local_diff = TwoWayDiff::between(ancestor_ref, local_ref);
                let remote_diff = if remote_rejected {
                    TwoWayDiff::no_change()
                } else {
                    TwoWayDiff::between(ancestor_ref, remote_ref)
                };

                if !(local_diff.is_no_change() && remote_diff.is_no_change()) {
                    if let Some(bytes) = &ancestor {
                        self.cache.put_content(bytes);
                    }
                }
                Diff::ThreeWay {
                    path: path.clone(),
                    diff: ThreeWayDiff::new(local_diff, remote_diff),
                }
            }
        };

        if !diff.is_in_sync() {
            if let Some(bytes) = &state.remote {
                self.cache.put_content(bytes);
            }
        }
        diff
    }

    fn fetch_remote(&self, path: &ResourcePath) -> Result<RemoteState, SyncError> {
        self.remote.fetch(path).map_err(|source| SyncError::Remote {
            path: path.clone(),
            source,
        })
    }

    fn refresh_candidates(
        &self,
        traversals: &[ResourceTraversal],
    ) -> Result<BTreeSet<ResourcePath>, SyncError> {
        let scope = self.scope();
        let mut candidates = BTreeSet::new();
        for traversal in traversals {
            let local = self
                .store
                .files_under(&traversal.root)
                .map_err(|source| SyncError::ContentIo {
                    path: traversal.root.clone(),
                    source,
                })?;
            let remote = self
                .remote
                .files_under(&traversal.root)
                .map_err(|source| SyncError::Remote {
                    path: traversal.root.clone(),
                    source,
                })?;
            candidates.extend(
                local
                    .into_iter()
                    .chain(remote)
                    .filter(|path| traversal.covers(path) && scope.contains(path)),
            );
        }
        candidates.extend(self.diff_tree().affected_paths(traversals));
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{classify_diff, DiffKind, Direction};
    use crate::store::{MemoryRemoteProvider, MemoryStore};
    use std::time::Duration;

    fn p(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        remote: Arc<MemoryRemoteProvider>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                remote: Arc::new(MemoryRemoteProvider::new()),
            }
        }

        fn context(&self, sync_type: SyncType) -> SynchronizationContext {
            SynchronizationContext::new(
                SynchronizationScope::for_roots(vec![ResourcePath::root()]),
                sync_type,
                self.store.clone(),
                self.remote.clone(),
            )
        }
    }

    fn everything() -> Vec<ResourceTraversal> {
        vec![ResourceTraversal::infinite(ResourcePath::root())]
    }

    fn classification(context: &SynchronizationContext, path: &str) -> (Direction, DiffKind) {
        let diff = context.get_diff(&p(path)).expect("diff present");
        let c = classify_diff(&diff).unwrap();
        (c.direction, c.kind)
    }

    #[test]
    fn test_three_way_refresh_classifies_changes() {
        let fx = Fixture::new();
        fx.store.insert("same.txt", "x").unwrap();
        fx.remote.set_ancestor("same.txt", "x").unwrap();
        fx.remote.set_remote("same.txt", "x").unwrap();

        fx.store.insert("incoming.txt", "old").unwrap();
        fx.remote.set_ancestor("incoming.txt", "old").unwrap();
        fx.remote.set_remote("incoming.txt", "new").unwrap();

        fx.store.insert("outgoing.txt", "mine").unwrap();

        fx.store.insert("both.txt", "mine").unwrap();
        fx.remote.set_ancestor("both.txt", "base").unwrap();
        fx.remote.set_remote("both.txt", "theirs").unwrap();

        fx.remote.set_ancestor("gone.txt", "base").unwrap();
        fx.store.insert("gone.txt", "base").unwrap();

        let context = fx.context(SyncType::ThreeWay);
        let delta = context.refresh(&everything(), None).unwrap();

        assert_eq!(delta.added.len(), 4);
        assert!(context.get_diff(&p("same.txt")).is_none());
        assert_eq!(
            classification(&context, "incoming.txt"),
            (Direction::Incoming, DiffKind::Change)
        );
        assert_eq!(
            classification(&context, "outgoing.txt"),
            (Direction::Outgoing, DiffKind::Add)
        );
        assert_eq!(
            classification(&context, "both.txt"),
            (Direction::Conflicting, DiffKind::Change)
        );
        assert_eq!(
            classification(&context, "gone.txt"),
            (Direction::Incoming, DiffKind::Remove)
        );
    }

    #[test]
    fn test_two_way_refresh() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "local").unwrap();
        fx.remote.set_remote("a.txt", "remote").unwrap();
        fx.remote.set_remote("b.txt", "remote only").unwrap();
        fx.store.insert("c.txt", "same").unwrap();
        fx.remote.set_remote("c.txt", "same").unwrap();

        let context = fx.context(SyncType::TwoWay);
        context.refresh(&everything(), None).unwrap();

        assert_eq!(
            classification(&context, "a.txt"),
            (Direction::Incoming, DiffKind::Change)
        );
        assert_eq!(
            classification(&context, "b.txt"),
            (Direction::Incoming, DiffKind::Add)
        );
        assert!(context.get_diff(&p("c.txt")).is_none());
    }

    #[test]
    fn test_refresh_clears_resolved_entries() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "mine").unwrap();
        let context = fx.context(SyncType::ThreeWay);
        context.refresh(&everything(), None).unwrap();
        assert!(context.get_diff(&p("a.txt")).is_some());

        fx.store.remove("a.txt").unwrap();
        let delta = context.refresh(&everything(), None).unwrap();
        assert_eq!(delta.removed, vec![p("a.txt")]);
        assert!(context.diff_tree().is_empty());
    }

    #[test]
    fn test_refresh_stays_inside_scope() {
        let fx = Fixture::new();
        fx.store.insert("in/a.txt", "x").unwrap();
        fx.store.insert("out/b.txt", "x").unwrap();
        let context = SynchronizationContext::new(
            SynchronizationScope::for_roots(vec![p("in")]),
            SyncType::ThreeWay,
            fx.store.clone(),
            fx.remote.clone(),
        );

        context.refresh(&everything(), None).unwrap();
        assert!(context.get_diff(&p("in/a.txt")).is_some());
        assert!(context.get_diff(&p("out/b.txt")).is_none());
    }

    #[test]
    fn test_refresh_commits_in_chunks() {
        let fx = Fixture::new();
        for i in 0..5 {
            fx.store.insert(&format!("f{}.txt", i), "x").unwrap();
        }
        let config = SyncConfig {
            refresh_batch_size: 2,
            ..Default::default()
        };
        let context = fx.context(SyncType::ThreeWay).with_config(config);
        let events = context.subscribe();

        let delta = context.refresh(&everything(), None).unwrap();
        assert_eq!(delta.added.len(), 5);
        assert_eq!(events.try_iter().count(), 3);
    }

    #[test]
    fn test_cancelled_refresh_keeps_partial_progress() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "x").unwrap();
        let context = fx.context(SyncType::ThreeWay);
        let cancel = AtomicBool::new(true);

        let err = context.refresh(&everything(), Some(&cancel)).unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert!(context.diff_tree().is_empty());
    }

    #[test]
    fn test_background_refresh_reports_through_channel() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "x").unwrap();
        let context = Arc::new(fx.context(SyncType::ThreeWay));
        let events = context.subscribe();

        let result = context.refresh_in_background(everything(), Arc::new(AtomicBool::new(false)));
        let delta = result
            .recv_timeout(Duration::from_secs(10))
            .unwrap()
            .unwrap();

        assert_eq!(delta.added, vec![p("a.txt")]);
        assert!(!context.has_outstanding_work());
        assert_eq!(events.recv_timeout(Duration::from_secs(1)).unwrap(), delta);
    }

    #[test]
    fn test_extend_scope_refreshes_new_traversals_only() {
        let fx = Fixture::new();
        fx.store.insert("a/x.txt", "x").unwrap();
        fx.store.insert("b/y.txt", "y").unwrap();
        let context = SynchronizationContext::new(
            SynchronizationScope::for_roots(vec![p("a")]),
            SyncType::ThreeWay,
            fx.store.clone(),
            fx.remote.clone(),
        );
        context.refresh_all(None).unwrap();
        assert_eq!(context.diff_tree().len(), 1);

        let delta = context
            .extend_scope(vec![ResourceMapping::for_resource(p("b"))])
            .unwrap();
        assert_eq!(delta.added, vec![p("b/y.txt")]);
        assert!(context.scope().contains(&p("b/y.txt")));
    }

    #[test]
    fn test_remove_roots_drops_diffs_below() {
        let fx = Fixture::new();
        fx.store.insert("a/x.txt", "x").unwrap();
        fx.store.insert("a/deep/y.txt", "y").unwrap();
        fx.store.insert("b/z.txt", "z").unwrap();
        let context = fx.context(SyncType::ThreeWay);
        context.refresh_all(None).unwrap();
        assert_eq!(context.diff_tree().len(), 3);
        let events = context.subscribe();

        let delta = context.remove_roots(&[p("a")]).unwrap();
        assert_eq!(delta.removed, vec![p("a/deep/y.txt"), p("a/x.txt")]);
        assert_eq!(events.try_recv().unwrap(), delta);
        assert!(!context.scope().contains(&p("a/x.txt")));

        let remaining = context.get_diffs(&everything());
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path(), &p("b/z.txt"));

        // Still present locally, but no longer in scope
        context.refresh_all(None).unwrap();
        assert!(context.get_diff(&p("a/x.txt")).is_none());
        assert_eq!(context.diff_tree().len(), 1);
    }

    #[test]
    fn test_resolved_snapshots_leave_the_cache() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "old").unwrap();
        fx.remote.set_ancestor("a.txt", "old").unwrap();
        fx.remote.set_remote("a.txt", "new").unwrap();
        fx.store.insert("b.txt", "b").unwrap();
        let context = fx.context(SyncType::ThreeWay);
        context.refresh_all(None).unwrap();
        assert!(context.cache().content(&Blake3Hash::of(b"new")).is_some());

        fx.store.insert("a.txt", "new").unwrap();
        fx.remote.set_ancestor("a.txt", "new").unwrap();
        context.refresh_all(None).unwrap();
        assert!(context.get_diff(&p("a.txt")).is_none());
        assert!(context.cache().content(&Blake3Hash::of(b"new")).is_none());
        assert!(context.cache().content(&Blake3Hash::of(b"old")).is_none());
    }

    #[test]
    fn test_disposed_context_refuses_work() {
        let fx = Fixture::new();
        let context = fx.context(SyncType::ThreeWay);
        let events = context.subscribe();
        context.dispose();

        assert!(matches!(
            context.refresh(&everything(), None),
            Err(SyncError::Disposed)
        ));
        assert!(events.recv().is_err());
    }

    #[test]
    fn test_resolve_state_uses_cached_snapshot() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "old").unwrap();
        fx.remote.set_ancestor("a.txt", "old").unwrap();
        fx.remote.set_remote("a.txt", "new").unwrap();
        let context = fx.context(SyncType::ThreeWay);
        context.refresh(&everything(), None).unwrap();

        fx.remote.set_remote("a.txt", "newer").unwrap();
        let Some(Diff::ThreeWay { diff, .. }) = context.get_diff(&p("a.txt")) else {
            panic!("expected three-way diff");
        };
        let content = context
            .resolve_state(&p("a.txt"), diff.remote.after.as_ref())
            .unwrap()
            .unwrap();
        assert_eq!(content.as_slice(), b"new");
    }

    #[test]
    fn test_remote_failure_is_propagated() {
        let fx = Fixture::new();
        fx.store.insert("a.txt", "x").unwrap();
        fx.remote.fail_on("a.txt").unwrap();
        let context = fx.context(SyncType::ThreeWay);

        let err = context.refresh(&everything(), None).unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
    }
}
