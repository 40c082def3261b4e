//! Merge engine: resolves diff tree entries against local storage.
//!
//! Each file is routed by its classification:
//!
//! | direction   | kind          | action                                   |
//! |-------------|---------------|------------------------------------------|
//! | outgoing    | any           | nothing                                  |
//! | incoming    | remove        | delete local, mark in sync               |
//! | incoming    | add, change   | replace local with remote, mark in sync  |
//! | conflicting | remove        | mark as merged, local state wins         |
//! | conflicting | add, change   | content merge if all three states exist  |
//!
//! A file whose local content changed since the diff was computed is never
//! replaced; it is reported as conflicting until the next refresh.
//!
//! A batch holds one scheduling rule for its whole duration and updates the
//! diff tree once at the end.

use crate::context::SynchronizationContext;
use crate::diff::{
    classify_diff, Classification, Diff, DiffKind, Direction, StateRef, ThreeWayDiff, TwoWayDiff,
};
use crate::diff_tree::{DiffTreeBatch, DiffTreeDelta};
use crate::rules::{rule_for, RuleGuard};
use crate::storage_merger::{MergeResult, StorageMergerDispatcher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synctree_common::{
    Blake3Hash, ResourcePath, ResourceTraversal, StateSide, SyncError, SyncType,
};
use tracing::{debug, info, warn};

/// Result of a merge batch
///
/// A file is either merged, skipped (outgoing) or listed as conflicting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStatus {
    pub ok: bool,
    pub conflicting_paths: Vec<ResourcePath>,
    pub merged_paths: Vec<ResourcePath>,
}

impl MergeStatus {
    fn from_outcomes(
        merged_paths: Vec<ResourcePath>,
        conflicting_paths: Vec<ResourcePath>,
    ) -> Self {
        Self {
            ok: conflicting_paths.is_empty(),
            conflicting_paths,
            merged_paths,
        }
    }
}

/// What happened to one file
enum Outcome {
    /// Resolved; the tree entry becomes `Some(diff)` or is removed
    Merged(Option<Diff>),
    Skipped,
    Conflict(String),
}

pub struct MergeEngine {
    context: Arc<SynchronizationContext>,
    dispatcher: StorageMergerDispatcher,
}

impl MergeEngine {
    pub fn new(context: Arc<SynchronizationContext>, dispatcher: StorageMergerDispatcher) -> Self {
        Self {
            context,
            dispatcher,
        }
    }

    pub fn context(&self) -> &Arc<SynchronizationContext> {
        &self.context
    }

    pub fn dispatcher(&self) -> &StorageMergerDispatcher {
        &self.dispatcher
    }

    /// Merge the diffs of `paths`
    ///
    /// Paths without a diff are already in sync and are ignored. With
    /// `ignore_local_changes` conflicting files take the remote state.
    /// Failures to read or write one file make that file conflicting; an
    /// inconsistent tree entry fails the whole call.
    pub fn merge(
        &self,
        paths: &[ResourcePath],
        ignore_local_changes: bool,
    ) -> Result<MergeStatus, SyncError> {
        let Some((guard, entries)) = self.begin(paths)? else {
            return Ok(MergeStatus::from_outcomes(Vec::new(), Vec::new()));
        };
        info!("Merging {} resources", entries.len());

        let mut batch = DiffTreeBatch::new();
        let mut merged = Vec::new();
        let mut conflicting = Vec::new();

        for (diff, classification) in entries {
            let path = diff.path().clone();
            let outcome = match self.merge_one(&diff, classification, ignore_local_changes) {
                Ok(outcome) => outcome,
                Err(e @ (SyncError::ContentIo { .. } | SyncError::Remote { .. })) => {
                    Outcome::Conflict(e.to_string())
                }
                Err(e) => return Err(e),
            };
            match outcome {
                Outcome::Merged(next) => {
                    debug!("Merged {}", path);
                    match next {
                        Some(diff) => batch.set(diff),
                        None => batch.remove(path.clone()),
                    }
                    merged.push(path);
                }
                Outcome::Skipped => debug!("Skipped outgoing {}", path),
                Outcome::Conflict(reason) => {
                    warn!("Conflict on {}: {}", path, reason);
                    conflicting.push(path);
                }
            }
        }

        self.context.commit(batch, &guard)?;
        info!(
            "Merge finished: {} merged, {} conflicting",
            merged.len(),
            conflicting.len()
        );
        Ok(MergeStatus::from_outcomes(merged, conflicting))
    }

    /// Merge every diff covered by `traversals`
    pub fn merge_all(
        &self,
        traversals: &[ResourceTraversal],
        ignore_local_changes: bool,
    ) -> Result<MergeStatus, SyncError> {
        let paths = self.context.diff_tree().affected_paths(traversals);
        self.merge(&paths, ignore_local_changes)
    }

    /// Accept the current local state as merged
    ///
    /// With `in_sync_hint` a diff is only cleared when local and remote
    /// content are byte-identical. Without it the remote state becomes the
    /// new ancestor, leaving an outgoing diff wherever local still differs.
    pub fn mark_as_merged(
        &self,
        paths: &[ResourcePath],
        in_sync_hint: bool,
    ) -> Result<DiffTreeDelta, SyncError> {
        let Some((guard, entries)) = self.begin(paths)? else {
            return Ok(DiffTreeDelta::default());
        };
        let mut batch = DiffTreeBatch::new();
        for (diff, _) in entries {
            if let Some(next) = self.mark_one(&diff, in_sync_hint)? {
                batch.set(next);
            }
        }
        self.context.commit(batch, &guard)
    }

    /// Discard the remote change of each path
    ///
    /// Three-way diffs keep only their local side, so an outgoing diff
    /// remains where local differs from the ancestor. Two-way diffs are
    /// cleared until either side changes again.
    pub fn reject(&self, paths: &[ResourcePath]) -> Result<DiffTreeDelta, SyncError> {
        let Some((guard, entries)) = self.begin(paths)? else {
            return Ok(DiffTreeDelta::default());
        };
        let mut batch = DiffTreeBatch::new();
        for (diff, _) in entries {
            match &diff {
                Diff::ThreeWay { path, diff: three_way } => {
                    if !three_way.remote.is_no_change() {
                        let digest = three_way.remote.after.map(|s| s.digest);
                        self.context.record_remote_rejection(path, digest);
                    }
                    batch.set(Diff::ThreeWay {
                        path: path.clone(),
                        diff: ThreeWayDiff::new(three_way.local, TwoWayDiff::no_change()),
                    });
                }
                Diff::TwoWay { path, diff: two_way } => {
                    self.context.record_two_way_rejection(
                        path,
                        two_way.before.map(|s| s.digest),
                        two_way.after.map(|s| s.digest),
                    );
                    batch.remove(path.clone());
                }
            }
            debug!("Rejected remote change of {}", diff.path());
        }
        self.context.commit(batch, &guard)
    }

    /// Acquire the batch rule and classify every diff up front
    fn begin(
        &self,
        paths: &[ResourcePath],
    ) -> Result<Option<(RuleGuard, Vec<(Diff, Classification)>)>, SyncError> {
        self.context.ensure_active()?;
        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();

        {
            let scope = self.context.scope();
            if let Some(outside) = paths.iter().find(|path| !scope.contains(path)) {
                return Err(SyncError::Path(format!(
                    "{} is outside the synchronization scope",
                    outside
                )));
            }
        }

        let Some(rule) = rule_for(&paths) else {
            return Ok(None);
        };
        let guard = self.context.rule_manager().acquire(rule)?;

        let mut entries = Vec::with_capacity(paths.len());
        for path in &paths {
            if let Some(diff) = self.context.get_diff(path) {
                let classification = classify_diff(&diff)?;
                entries.push((diff, classification));
            }
        }
        Ok(Some((guard, entries)))
    }

    fn merge_one(
        &self,
        diff: &Diff,
        classification: Classification,
        ignore_local_changes: bool,
    ) -> Result<Outcome, SyncError> {
        let path = diff.path();
        let three_way = match diff {
            Diff::TwoWay { diff: two_way, .. } => {
                return self.replace_local(path, two_way.before.as_ref(), two_way.after.as_ref());
            }
            Diff::ThreeWay { diff: three_way, .. } => three_way,
        };

        match (classification.direction, classification.kind) {
            (Direction::Outgoing, _) => Ok(Outcome::Skipped),
            (Direction::Incoming, _) => self.replace_local(
                path,
                expected_local(three_way),
                three_way.remote.after.as_ref(),
            ),
            (Direction::Conflicting, _) if ignore_local_changes => self.replace_local(
                path,
                expected_local(three_way),
                three_way.remote.after.as_ref(),
            ),
            (Direction::Conflicting, DiffKind::Remove) => {
                Ok(Outcome::Merged(self.mark_one(diff, false)?))
            }
            (Direction::Conflicting, _) => self.merge_content(path, three_way),
        }
    }

    /// Take the remote state unless local changed since the diff was computed
    fn replace_local(
        &self,
        path: &ResourcePath,
        expected: Option<&StateRef>,
        remote: Option<&StateRef>,
    ) -> Result<Outcome, SyncError> {
        let current = self.context.read_local(path)?;
        if current.as_deref().map(Blake3Hash::of) != expected.map(|s| s.digest) {
            return Ok(Outcome::Conflict(
                "local content changed since the last refresh".to_string(),
            ));
        }
        self.take_remote(path, remote)?;
        Ok(Outcome::Merged(None))
    }

    /// Replace (or delete) the local file with the remote state
    fn take_remote(&self, path: &ResourcePath, remote: Option<&StateRef>) -> Result<(), SyncError> {
        let content = self.context.resolve_state(path, remote)?;
        let store = self.context.store();
        let io_error = |source| SyncError::ContentIo {
            path: path.clone(),
            source,
        };
        match &content {
            Some(bytes) => store.write(path, bytes).map_err(io_error)?,
            None if store.exists(path) => store.delete(path).map_err(io_error)?,
            None => {}
        }
        if self.context.sync_type() == SyncType::ThreeWay {
            self.context.record_base(path, content);
        }
        Ok(())
    }

    fn merge_content(
        &self,
        path: &ResourcePath,
        diff: &ThreeWayDiff,
    ) -> Result<Outcome, SyncError> {
        let ancestor = self.context.resolve_state(path, ancestor_of(diff))?;
        let remote = self.context.resolve_state(path, diff.remote.after.as_ref())?;
        let local = self.context.read_local(path)?;

        let (Some(ancestor), Some(remote), Some(local)) = (ancestor, remote, local) else {
            return Ok(Outcome::Conflict(
                "ancestor, local and remote states are required for a content merge".to_string(),
            ));
        };

        match self.dispatcher.merge(path, Some(ancestor.as_slice()), &local, &remote) {
            MergeResult::Merged(bytes) => {
                self.context
                    .store()
                    .write(path, &bytes)
                    .map_err(|source| SyncError::ContentIo {
                        path: path.clone(),
                        source,
                    })?;
                self.context.record_base(path, Some(remote));
                Ok(Outcome::Merged(None))
            }
            MergeResult::Conflict => Ok(Outcome::Conflict("content merge conflict".to_string())),
            MergeResult::Error(reason) => Ok(Outcome::Conflict(reason)),
        }
    }

    /// New tree entry for `diff` once marked as merged, `None` to leave it
    fn mark_one(&self, diff: &Diff, in_sync_hint: bool) -> Result<Option<Diff>, SyncError> {
        let path = diff.path();
        let local = self.context.read_local(path)?;

        match diff {
            Diff::TwoWay { diff: two_way, .. } => {
                if in_sync_hint {
                    let remote = self.context.resolve_state(path, two_way.after.as_ref())?;
                    if remote.as_deref().map(Vec::as_slice) != local.as_deref() {
                        return Ok(None);
                    }
                }
                self.context.record_two_way_rejection(
                    path,
                    two_way.before.map(|s| s.digest),
                    two_way.after.map(|s| s.digest),
                );
                Ok(Some(Diff::TwoWay {
                    path: path.clone(),
                    diff: TwoWayDiff::no_change(),
                }))
            }
            Diff::ThreeWay { diff: three_way, .. } => {
                let remote_ref = if three_way.remote.is_no_change() {
                    ancestor_of(three_way)
                } else {
                    three_way.remote.after.as_ref()
                };
                let remote = self.context.resolve_state(path, remote_ref)?;

                if in_sync_hint && remote.as_deref().map(Vec::as_slice) != local.as_deref() {
                    debug!("{} differs from remote, leaving diff in place", path);
                    return Ok(None);
                }

                if let Some(bytes) = &remote {
                    self.context.cache().put_content(bytes);
                }
                let base = remote
                    .as_deref()
                    .map(|bytes| StateRef::new(StateSide::Ancestor, bytes));
                let current = local
                    .as_deref()
                    .map(|bytes| StateRef::new(StateSide::Local, bytes));
                self.context.record_base(path, remote);
                Ok(Some(Diff::ThreeWay {
                    path: path.clone(),
                    diff: ThreeWayDiff::new(
                        TwoWayDiff::between(base, current),
                        TwoWayDiff::no_change(),
                    ),
                }))
            }
        }
    }
}

fn ancestor_of(diff: &ThreeWayDiff) -> Option<&StateRef> {
    diff.local.before.as_ref().or(diff.remote.before.as_ref())
}

/// Local state the diff was computed against
fn expected_local(diff: &ThreeWayDiff) -> Option<&StateRef> {
    if diff.local.is_no_change() {
        diff.local.after.as_ref().or_else(|| ancestor_of(diff))
    } else {
        diff.local.after.as_ref()
    }
}
