//! Scheduling rules: subtree-keyed mutual exclusion.
//!
//! A rule is a resource subtree. Two rules conflict when one contains the
//! other, so batches touching disjoint subtrees run in parallel while
//! overlapping batches serialize.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use synctree_common::{ResourcePath, SyncError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchedulingRule {
    root: ResourcePath,
}

impl SchedulingRule {
    pub fn new(root: ResourcePath) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &ResourcePath {
        &self.root
    }

    pub fn contains(&self, other: &SchedulingRule) -> bool {
        self.root.is_prefix_of(&other.root)
    }

    pub fn is_conflicting(&self, other: &SchedulingRule) -> bool {
        self.contains(other) || other.contains(self)
    }

    pub fn covers(&self, path: &ResourcePath) -> bool {
        self.root.is_prefix_of(path)
    }
}

/// Smallest rule covering every path, `None` for an empty set
pub fn rule_for<'a, I>(paths: I) -> Option<SchedulingRule>
where
    I: IntoIterator<Item = &'a ResourcePath>,
{
    paths
        .into_iter()
        .map(|path| SchedulingRule::new(path.clone()))
        .reduce(|a, b| combine(&a, &b))
}

/// Smallest rule containing both
pub fn combine(a: &SchedulingRule, b: &SchedulingRule) -> SchedulingRule {
    SchedulingRule::new(a.root.common_ancestor(&b.root))
}

struct HeldRule {
    id: u64,
    rule: SchedulingRule,
    owner: ThreadId,
}

/// Lock table of currently held rules
#[derive(Default)]
pub struct RuleManager {
    held: Mutex<Vec<HeldRule>>,
    released: Condvar,
    next_id: AtomicU64,
}

impl RuleManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until `rule` can be held by the calling thread
    ///
    /// A thread already holding a rule may only nest rules contained in one
    /// it holds; anything else would risk deadlock and is refused.
    pub fn acquire(self: &Arc<Self>, rule: SchedulingRule) -> Result<RuleGuard, SyncError> {
        let owner = thread::current().id();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        let nested = {
            let own: Vec<&HeldRule> = held.iter().filter(|h| h.owner == owner).collect();
            if !own.is_empty() && !own.iter().any(|h| h.rule.contains(&rule)) {
                return Err(SyncError::SchedulingViolation(format!(
                    "rule {} does not match the outer rule {} held by this thread",
                    rule.root, own[0].rule.root
                )));
            }
            !own.is_empty()
        };

        if !nested {
            while held
                .iter()
                .any(|h| h.owner != owner && h.rule.is_conflicting(&rule))
            {
                debug!("Waiting for rule {}", rule.root);
                held = self
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        held.push(HeldRule {
            id,
            rule: rule.clone(),
            owner,
        });
        debug!("Acquired rule {}", rule.root);

        Ok(RuleGuard {
            manager: Arc::clone(self),
            id,
            rule,
        })
    }

    /// Number of rules currently held across all threads
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn release(&self, id: u64) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.retain(|h| h.id != id);
        self.released.notify_all();
    }
}

/// Proof that a rule is held; released on drop
pub struct RuleGuard {
    manager: Arc<RuleManager>,
    id: u64,
    rule: SchedulingRule,
}

impl RuleGuard {
    pub fn rule(&self) -> &SchedulingRule {
        &self.rule
    }

    pub fn covers(&self, path: &ResourcePath) -> bool {
        self.rule.covers(path)
    }

    pub(crate) fn is_from(&self, manager: &Arc<RuleManager>) -> bool {
        Arc::ptr_eq(&self.manager, manager)
    }
}

impl Drop for RuleGuard {
    fn drop(&mut self) {
        self.manager.release(self.id);
        debug!("Released rule {}", self.rule.root);
    }
}

impl std::fmt::Debug for RuleGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleGuard")
            .field("id", &self.id)
            .field("rule", &self.rule)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn p(raw: &str) -> ResourcePath {
        ResourcePath::parse(raw).unwrap()
    }

    #[test]
    fn test_rule_for_uses_common_ancestor() {
        let paths = vec![p("a/b/c.txt"), p("a/b/d.txt"), p("a/e.txt")];
        let rule = rule_for(&paths).unwrap();
        assert_eq!(rule.root(), &p("a"));
        assert!(rule_for(Vec::<&ResourcePath>::new()).is_none());
    }

    #[test]
    fn test_conflict_is_containment() {
        let a = SchedulingRule::new(p("a"));
        let ab = SchedulingRule::new(p("a/b"));
        let c = SchedulingRule::new(p("c"));
        assert!(a.is_conflicting(&ab));
        assert!(ab.is_conflicting(&a));
        assert!(!a.is_conflicting(&c));
        assert_eq!(combine(&ab, &c).root(), &ResourcePath::root());
    }

    #[test]
    fn test_nested_rule_on_same_thread() {
        let manager = RuleManager::new();
        let outer = manager.acquire(SchedulingRule::new(p("a"))).unwrap();
        let inner = manager.acquire(SchedulingRule::new(p("a/b"))).unwrap();
        assert_eq!(manager.held_count(), 2);
        drop(inner);
        drop(outer);
        assert_eq!(manager.held_count(), 0);
    }

    #[test]
    fn test_nesting_outside_held_rule_is_violation() {
        let manager = RuleManager::new();
        let _outer = manager.acquire(SchedulingRule::new(p("a"))).unwrap();
        let err = manager.acquire(SchedulingRule::new(p("b"))).unwrap_err();
        assert!(matches!(err, SyncError::SchedulingViolation(_)));
    }

    #[test]
    fn test_disjoint_rules_run_in_parallel() {
        let manager = RuleManager::new();
        let _a = manager.acquire(SchedulingRule::new(p("a"))).unwrap();

        let other = Arc::clone(&manager);
        let handle = thread::spawn(move || {
            let guard = other.acquire(SchedulingRule::new(p("b"))).unwrap();
            guard.rule().root().clone()
        });
        assert_eq!(handle.join().unwrap(), p("b"));
    }

    #[test]
    fn test_overlapping_rules_serialize() {
        let manager = RuleManager::new();
        let guard = manager.acquire(SchedulingRule::new(p("a"))).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        let handle = thread::spawn(move || {
            let _inner = other.acquire(SchedulingRule::new(p("a/b"))).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }
}
