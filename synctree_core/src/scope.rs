//! Synchronization scope: the resources an operation considers in bounds.
//!
//! A scope starts from the input mappings a user selected and may grow as
//! models contribute derived mappings. It only shrinks through an explicit
//! [`SynchronizationScope::remove_roots`] call.

use crossbeam::channel::{unbounded, Receiver, Sender};
use synctree_common::{
    compact_traversals, ResourceMapping, ResourcePath, ResourceTraversal,
};
use tracing::{debug, info};

/// Source of mappings derived from an input mapping (e.g. a model provider)
pub trait MappingProvider: Send + Sync {
    fn derived_mappings(&self, input: &ResourceMapping) -> Vec<ResourceMapping>;
}

/// What changed in a scope
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeChange {
    pub new_mappings: Vec<ResourceMapping>,
    /// Traversals covering resources that were not in scope before
    pub new_traversals: Vec<ResourceTraversal>,
    pub removed_roots: Vec<ResourcePath>,
}

impl ScopeChange {
    pub fn is_empty(&self) -> bool {
        self.new_mappings.is_empty()
            && self.new_traversals.is_empty()
            && self.removed_roots.is_empty()
    }
}

#[derive(Default)]
pub struct SynchronizationScope {
    input_mappings: Vec<ResourceMapping>,
    derived_mappings: Vec<ResourceMapping>,
    traversals: Vec<ResourceTraversal>,
    /// Removed subtrees that a broader traversal would otherwise still cover
    excluded: Vec<ResourcePath>,
    subscribers: Vec<Sender<ScopeChange>>,
}

impl SynchronizationScope {
    pub fn new(input_mappings: Vec<ResourceMapping>) -> Self {
        let traversals = compact_traversals(
            &input_mappings
                .iter()
                .flat_map(|m| m.traversals.iter().cloned())
                .collect::<Vec<_>>(),
        );
        Self {
            input_mappings,
            derived_mappings: Vec::new(),
            traversals,
            excluded: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Scope covering the given resource subtrees
    pub fn for_roots(roots: Vec<ResourcePath>) -> Self {
        Self::new(roots.into_iter().map(ResourceMapping::for_resource).collect())
    }

    pub fn input_mappings(&self) -> &[ResourceMapping] {
        &self.input_mappings
    }

    pub fn derived_mappings(&self) -> &[ResourceMapping] {
        &self.derived_mappings
    }

    pub fn mappings(&self) -> impl Iterator<Item = &ResourceMapping> {
        self.input_mappings.iter().chain(self.derived_mappings.iter())
    }

    /// Compacted traversals of every mapping in scope
    pub fn traversals(&self) -> &[ResourceTraversal] {
        &self.traversals
    }

    pub fn roots(&self) -> Vec<ResourcePath> {
        let mut roots: Vec<ResourcePath> = self.traversals.iter().map(|t| t.root.clone()).collect();
        roots.sort();
        roots.dedup();
        roots
    }

    /// Covered by a traversal and not inside a subtree removed below it
    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.traversals.iter().any(|t| {
            t.covers(path)
                && !self
                    .excluded
                    .iter()
                    .any(|e| t.root.is_prefix_of(e) && e.is_prefix_of(path))
        })
    }

    /// Subtrees removed from the scope while an enclosing traversal remains
    pub fn excluded_roots(&self) -> &[ResourcePath] {
        &self.excluded
    }

    /// Whether an exclusion cuts into what `traversal` covers under `outer`
    fn cut_by_exclusion(&self, outer: &ResourceTraversal, traversal: &ResourceTraversal) -> bool {
        self.excluded.iter().any(|e| {
            outer.root.is_prefix_of(e)
                && (e.is_prefix_of(&traversal.root) || traversal.root.is_prefix_of(e))
        })
    }

    pub fn subscribe(&mut self) -> Receiver<ScopeChange> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Add input mappings; already known mappings are ignored
    pub fn add_mappings(&mut self, mappings: Vec<ResourceMapping>) -> ScopeChange {
        let mut change = ScopeChange::default();
        for mapping in mappings {
            if self.mappings().any(|known| known == &mapping) {
                continue;
            }
            self.input_mappings.push(mapping.clone());
            change.new_mappings.push(mapping);
        }
        self.grow(change)
    }

    /// Ask `provider` for mappings derived from the inputs and add new ones
    pub fn refresh(&mut self, provider: &dyn MappingProvider) -> ScopeChange {
        let mut change = ScopeChange::default();
        let derived: Vec<ResourceMapping> = self
            .input_mappings
            .iter()
            .flat_map(|input| provider.derived_mappings(input))
            .collect();
        for mapping in derived {
            if self.mappings().any(|known| known == &mapping)
                || change.new_mappings.contains(&mapping)
            {
                continue;
            }
            self.derived_mappings.push(mapping.clone());
            change.new_mappings.push(mapping);
        }
        self.grow(change)
    }

    /// Explicitly drop every traversal and mapping rooted under `roots`
    ///
    /// A removed root that a broader traversal still covers is excluded, so
    /// `contains` no longer reports anything beneath it.
    pub fn remove_roots(&mut self, roots: &[ResourcePath]) -> ScopeChange {
        let under_removed = |path: &ResourcePath| roots.iter().any(|r| r.is_prefix_of(path));

        self.traversals.retain(|t| !under_removed(&t.root));
        let keep = |m: &ResourceMapping| !m.traversals.iter().all(|t| under_removed(&t.root));
        self.input_mappings.retain(keep);
        self.derived_mappings.retain(keep);

        for root in roots {
            let still_covered = self.traversals.iter().any(|t| t.covers(root));
            if still_covered && !self.excluded.iter().any(|e| e.is_prefix_of(root)) {
                self.excluded.retain(|e| !root.is_prefix_of(e));
                self.excluded.push(root.clone());
            }
        }

        let change = ScopeChange {
            removed_roots: roots.to_vec(),
            ..Default::default()
        };
        info!("Removed {} roots from scope", roots.len());
        self.notify(&change);
        change
    }

    fn grow(&mut self, mut change: ScopeChange) -> ScopeChange {
        for mapping in &change.new_mappings {
            for traversal in &mapping.traversals {
                let known = self
                    .traversals
                    .iter()
                    .any(|t| t.contains(traversal) && !self.cut_by_exclusion(t, traversal))
                    || change.new_traversals.iter().any(|t| t.contains(traversal));
                if !known {
                    change.new_traversals.push(traversal.clone());
                }
            }
        }
        change.new_traversals = compact_traversals(&change.new_traversals);
        for traversal in &change.new_traversals {
            self.excluded.retain(|e| !traversal.root.is_prefix_of(e));
        }

        if !change.new_traversals.is_empty() {
            let mut all = self.traversals.clone();
            all.extend(change.new_traversals.iter().cloned());
            // Traversals inside an excluded subtree are never redundant with
            // the broader traversal the exclusion cuts into
            let (inside, outside): (Vec<_>, Vec<_>) = all
                .into_iter()
                .partition(|t| self.excluded.iter().any(|e| e.is_prefix_of(&t.root)));
            self.traversals = compact_traversals(&outside);
            self.traversals.extend(compact_traversals(&inside));
        }

        if !change.is_empty() {
            debug!(
                "Scope grew by {} mappings and {} traversals",
                change.new_mappings.len(),
                change.new_traversals.len()
            );
            self.notify(&change);
        }
        change
    }

    fn notify(&mut self, change: &ScopeChange) {
        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
    }
}
