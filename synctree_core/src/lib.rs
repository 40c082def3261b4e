pub mod cache;
pub mod context;
pub mod diff;
pub mod diff_tree;
pub mod merge_engine;
pub mod rules;
pub mod scope;
pub mod storage_merger;
pub mod store;
pub mod text_merge;

pub use cache::SynchronizationCache;
pub use context::SynchronizationContext;
pub use diff::{
    classify, classify_diff, Classification, Diff, DiffFlags, DiffKind, Direction, StateRef,
    ThreeWayDiff, TwoWayDiff,
};
pub use diff_tree::{DiffTreeBatch, DiffTreeDelta, ResourceDiffTree};
pub use merge_engine::{MergeEngine, MergeStatus};
pub use rules::{combine, rule_for, RuleGuard, RuleManager, SchedulingRule};
pub use scope::{MappingProvider, ScopeChange, SynchronizationScope};
pub use storage_merger::{
    DefaultContentClassifier, MergeResult, MergerRegistry, MergerSource, StorageMerger,
    StorageMergerDispatcher,
};
pub use store::{DirectoryRemoteProvider, LocalStore, MemoryRemoteProvider, MemoryStore};
pub use text_merge::TextStorageMerger;
