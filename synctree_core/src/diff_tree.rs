//! Path-indexed tree of out-of-sync resources.
//!
//! Only resources that differ have entries: a missing path means "in sync",
//! never "unknown". Ancestor/descendant relationships come from path
//! structure, so a subtree is a contiguous range of the ordered map.

use crate::diff::{classify_diff, Diff, DiffKind, Direction};
use crate::rules::RuleGuard;
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use synctree_common::{compact_traversals, Depth, ResourcePath, ResourceTraversal, SyncError};
use tracing::debug;

/// Paths affected by one mutation batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffTreeDelta {
    pub added: Vec<ResourcePath>,
    pub removed: Vec<ResourcePath>,
    pub changed: Vec<ResourcePath>,
}

impl DiffTreeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// Fold a later delta into this one
    pub fn extend(&mut self, other: DiffTreeDelta) {
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.changed.extend(other.changed);
    }
}

/// Pending mutations, applied to the tree in one step
///
/// Later operations on the same path replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct DiffTreeBatch {
    ops: BTreeMap<ResourcePath, Option<Diff>>,
}

impl DiffTreeBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diff; a diff without change becomes a removal
    pub fn set(&mut self, diff: Diff) {
        if diff.is_in_sync() {
            self.remove(diff.path().clone());
        } else {
            self.ops.insert(diff.path().clone(), Some(diff));
        }
    }

    pub fn remove(&mut self, path: ResourcePath) {
        self.ops.insert(path, None);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.ops.keys()
    }
}

#[derive(Default)]
pub struct ResourceDiffTree {
    diffs: BTreeMap<ResourcePath, Diff>,
    subscribers: Vec<Sender<DiffTreeDelta>>,
}

impl ResourceDiffTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.diffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.is_empty()
    }

    /// Diff recorded for `path`, `None` when in sync
    pub fn get_diff(&self, path: &ResourcePath) -> Option<&Diff> {
        self.diffs.get(path)
    }

    /// All diffs covered by any of the traversals, in path order
    pub fn get_diffs(&self, traversals: &[ResourceTraversal]) -> Vec<&Diff> {
        self.covered(traversals).into_values().collect()
    }

    pub fn affected_paths(&self, traversals: &[ResourceTraversal]) -> Vec<ResourcePath> {
        self.covered(traversals).into_keys().cloned().collect()
    }

    pub fn has_diffs(&self, traversals: &[ResourceTraversal]) -> bool {
        compact_traversals(traversals)
            .iter()
            .any(|t| self.subtree(&t.root).any(|(path, _)| t.covers(path)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diff> {
        self.diffs.values()
    }

    /// Depth-first walk over covered diffs, parents before children
    ///
    /// Returning `Ok(false)` from the visitor skips the descendants of the
    /// visited path. Visitor errors stop the walk and are returned unchanged.
    pub fn accept<E, F>(&self, traversals: &[ResourceTraversal], mut visitor: F) -> Result<(), E>
    where
        F: FnMut(&Diff) -> Result<bool, E>,
    {
        let mut pruned: Option<&ResourcePath> = None;
        for (path, diff) in self.covered(traversals) {
            if let Some(prefix) = pruned {
                if prefix.is_prefix_of(path) {
                    continue;
                }
            }
            if !visitor(diff)? {
                pruned = Some(path);
            }
        }
        Ok(())
    }

    /// Direct children of `path` that have a diff or a descendant with one
    pub fn members(&self, path: &ResourcePath) -> Vec<ResourcePath> {
        let mut children: Vec<ResourcePath> = Vec::new();
        for (candidate, _) in self.subtree(path) {
            if let Some(child) = path.child_towards(candidate) {
                if children.last() != Some(&child) {
                    children.push(child);
                }
            }
        }
        children
    }

    /// Number of diffs matching a direction and kind; `None` matches anything
    pub fn count_for(&self, direction: Option<Direction>, kind: Option<DiffKind>) -> usize {
        self.diffs
            .values()
            .filter_map(|diff| classify_diff(diff).ok())
            .filter(|c| direction.map_or(true, |d| c.direction == d))
            .filter(|c| kind.map_or(true, |k| c.kind == k))
            .count()
    }

    /// Receive one delta per applied batch
    pub fn subscribe(&mut self) -> Receiver<DiffTreeDelta> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub(crate) fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    /// Apply a batch while holding a rule that covers every touched path
    ///
    /// Nothing is changed if any path lies outside the rule.
    pub(crate) fn apply(
        &mut self,
        batch: DiffTreeBatch,
        guard: &RuleGuard,
    ) -> Result<DiffTreeDelta, SyncError> {
        if let Some(outside) = batch.paths().find(|path| !guard.covers(path)) {
            return Err(SyncError::SchedulingViolation(format!(
                "{} is outside the held rule {}",
                outside,
                guard.rule().root()
            )));
        }

        let mut delta = DiffTreeDelta::default();
        for (path, op) in batch.ops {
            match op {
                Some(diff) => match self.diffs.insert(path.clone(), diff) {
                    Some(previous) if Some(&previous) == self.diffs.get(&path) => {}
                    Some(_) => delta.changed.push(path),
                    None => delta.added.push(path),
                },
                None => {
                    if self.diffs.remove(&path).is_some() {
                        delta.removed.push(path);
                    }
                }
            }
        }

        if !delta.is_empty() {
            debug!(
                "Diff tree updated: {} added, {} removed, {} changed",
                delta.added.len(),
                delta.removed.len(),
                delta.changed.len()
            );
            self.subscribers.retain(|tx| tx.send(delta.clone()).is_ok());
        }
        Ok(delta)
    }

    fn subtree<'a, 'b>(
        &'a self,
        root: &'b ResourcePath,
    ) -> impl Iterator<Item = (&'a ResourcePath, &'a Diff)> + 'b
    where
        'a: 'b,
    {
        self.diffs
            .range(root.clone()..)
            .take_while(move |(path, _)| root.is_prefix_of(path))
    }

    fn covered(&self, traversals: &[ResourceTraversal]) -> BTreeMap<&ResourcePath, &Diff> {
        let mut covered = BTreeMap::new();
        for traversal in compact_traversals(traversals) {
            if traversal.depth == Depth::Zero {
                if let Some((path, diff)) = self.diffs.get_key_value(&traversal.root) {
                    covered.insert(path, diff);
                }
                continue;
            }
            for (path, diff) in self.subtree(&traversal.root) {
                if traversal.covers(path) {
                    covered.insert(path, diff);
                }
            }
        }
        covered
    }
}
