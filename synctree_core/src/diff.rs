//! Diff node model.
//!
//! A [`TwoWayDiff`] records the change between two snapshots of one
//! resource. A [`ThreeWayDiff`] pairs the local change (ancestor to local)
//! with the remote change (ancestor to remote). Direction and kind of a
//! three-way diff are never stored; they are derived by [`classify`], which
//! is the only place that decides how a diff is routed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use synctree_common::{Blake3Hash, ResourcePath, StateSide, SyncError};

/// Kind of change between two snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffKind {
    NoChange,
    Add,
    Remove,
    Change,
}

impl DiffKind {
    fn precedence(self) -> u8 {
        match self {
            DiffKind::NoChange => 0,
            DiffKind::Add => 1,
            DiffKind::Change => 2,
            DiffKind::Remove => 3,
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChange => write!(f, "no-change"),
            Self::Add => write!(f, "add"),
            Self::Remove => write!(f, "remove"),
            Self::Change => write!(f, "change"),
        }
    }
}

/// Which side(s) changed relative to the common ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
    Conflicting,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incoming => write!(f, "incoming"),
            Self::Outgoing => write!(f, "outgoing"),
            Self::Conflicting => write!(f, "conflicting"),
        }
    }
}

/// Extra detail attached to a two-way diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiffFlags(u32);

impl DiffFlags {
    pub const NONE: DiffFlags = DiffFlags(0);
    /// Content differs
    pub const CONTENT: DiffFlags = DiffFlags(1);
    /// Resource was replaced rather than edited
    pub const REPLACE: DiffFlags = DiffFlags(1 << 1);
    /// Resource was moved away from this path
    pub const MOVE_FROM: DiffFlags = DiffFlags(1 << 2);
    /// Resource was moved to this path
    pub const MOVE_TO: DiffFlags = DiffFlags(1 << 3);

    pub fn contains(self, other: DiffFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for DiffFlags {
    type Output = DiffFlags;

    fn bitor(self, rhs: DiffFlags) -> DiffFlags {
        DiffFlags(self.0 | rhs.0)
    }
}

/// Opaque handle to one snapshot of a resource's content
///
/// The engine only looks at whether a handle is present. The digest is what
/// the context uses to decide whether two snapshots hold the same bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub side: StateSide,
    pub digest: Blake3Hash,
}

impl StateRef {
    pub fn new(side: StateSide, content: &[u8]) -> Self {
        Self {
            side,
            digest: Blake3Hash::of(content),
        }
    }
}

/// Change between two snapshots of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoWayDiff {
    pub kind: DiffKind,
    pub flags: DiffFlags,
    pub before: Option<StateRef>,
    pub after: Option<StateRef>,
}

impl TwoWayDiff {
    pub fn no_change() -> Self {
        Self {
            kind: DiffKind::NoChange,
            flags: DiffFlags::NONE,
            before: None,
            after: None,
        }
    }

    /// Derive the change from `before` to `after` by presence and content digest
    pub fn between(before: Option<StateRef>, after: Option<StateRef>) -> Self {
        let (kind, flags) = match (&before, &after) {
            (None, None) => (DiffKind::NoChange, DiffFlags::NONE),
            (None, Some(_)) => (DiffKind::Add, DiffFlags::NONE),
            (Some(_), None) => (DiffKind::Remove, DiffFlags::NONE),
            (Some(b), Some(a)) if b.digest == a.digest => (DiffKind::NoChange, DiffFlags::NONE),
            (Some(_), Some(_)) => (DiffKind::Change, DiffFlags::CONTENT),
        };
        Self {
            kind,
            flags,
            before,
            after,
        }
    }

    pub fn is_no_change(&self) -> bool {
        self.kind == DiffKind::NoChange
    }
}

/// Local and remote changes relative to a common ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreeWayDiff {
    pub local: TwoWayDiff,
    pub remote: TwoWayDiff,
}

impl ThreeWayDiff {
    pub fn new(local: TwoWayDiff, remote: TwoWayDiff) -> Self {
        Self { local, remote }
    }
}

/// An entry of the diff tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diff {
    /// Local compared directly with remote; `before` is local, `after` remote
    TwoWay { path: ResourcePath, diff: TwoWayDiff },
    ThreeWay { path: ResourcePath, diff: ThreeWayDiff },
}

impl Diff {
    pub fn path(&self) -> &ResourcePath {
        match self {
            Diff::TwoWay { path, .. } | Diff::ThreeWay { path, .. } => path,
        }
    }

    /// Every snapshot handle the diff refers to
    pub fn state_refs(&self) -> Vec<StateRef> {
        let sides: Vec<&TwoWayDiff> = match self {
            Diff::TwoWay { diff, .. } => vec![diff],
            Diff::ThreeWay { diff, .. } => vec![&diff.local, &diff.remote],
        };
        sides
            .into_iter()
            .flat_map(|side| side.before.into_iter().chain(side.after))
            .collect()
    }

    /// True when the diff carries no change at all and must not be stored
    pub fn is_in_sync(&self) -> bool {
        match self {
            Diff::TwoWay { diff, .. } => diff.is_no_change(),
            Diff::ThreeWay { diff, .. } => diff.local.is_no_change() && diff.remote.is_no_change(),
        }
    }
}

/// Routing information derived from a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub direction: Direction,
    pub kind: DiffKind,
    pub conflict: bool,
}

/// Classify a local/remote pair
///
/// Returns `None` when neither side changed; such pairs are never stored.
pub fn classify(local: &TwoWayDiff, remote: &TwoWayDiff) -> Option<Classification> {
    match (local.is_no_change(), remote.is_no_change()) {
        (true, true) => None,
        (true, false) => Some(Classification {
            direction: Direction::Incoming,
            kind: remote.kind,
            conflict: false,
        }),
        (false, true) => Some(Classification {
            direction: Direction::Outgoing,
            kind: local.kind,
            conflict: false,
        }),
        (false, false) => {
            let kind = if local.kind.precedence() >= remote.kind.precedence() {
                local.kind
            } else {
                remote.kind
            };
            Some(Classification {
                direction: Direction::Conflicting,
                kind,
                conflict: true,
            })
        }
    }
}

/// Classify a stored diff
///
/// A two-way diff is the remote changeset to apply, so it is incoming.
/// A diff without any change is an inconsistent tree entry.
pub fn classify_diff(diff: &Diff) -> Result<Classification, SyncError> {
    let classification = match diff {
        Diff::TwoWay { diff: two_way, .. } => classify(&TwoWayDiff::no_change(), two_way),
        Diff::ThreeWay { diff: three_way, .. } => classify(&three_way.local, &three_way.remote),
    };
    classification.ok_or_else(|| SyncError::Classification {
        path: diff.path().clone(),
        reason: "entry records no change".to_string(),
    })
}

pub fn direction(diff: &Diff) -> Option<Direction> {
    classify_diff(diff).ok().map(|c| c.direction)
}

pub fn kind(diff: &Diff) -> DiffKind {
    classify_diff(diff).map_or(DiffKind::NoChange, |c| c.kind)
}

pub fn is_conflict(diff: &Diff) -> bool {
    classify_diff(diff).map_or(false, |c| c.conflict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(side: StateSide, content: &str) -> Option<StateRef> {
        Some(StateRef::new(side, content.as_bytes()))
    }

    fn two_way(kind: DiffKind) -> TwoWayDiff {
        match kind {
            DiffKind::NoChange => TwoWayDiff::no_change(),
            DiffKind::Add => TwoWayDiff::between(None, state(StateSide::Local, "new")),
            DiffKind::Remove => TwoWayDiff::between(state(StateSide::Ancestor, "old"), None),
            DiffKind::Change => TwoWayDiff::between(
                state(StateSide::Ancestor, "old"),
                state(StateSide::Local, "new"),
            ),
        }
    }

    const KINDS: [DiffKind; 4] = [
        DiffKind::NoChange,
        DiffKind::Add,
        DiffKind::Remove,
        DiffKind::Change,
    ];

    #[test]
    fn test_between_derives_kind() {
        assert_eq!(two_way(DiffKind::Add).kind, DiffKind::Add);
        assert_eq!(two_way(DiffKind::Remove).kind, DiffKind::Remove);
        assert_eq!(two_way(DiffKind::Change).kind, DiffKind::Change);
        assert!(two_way(DiffKind::Change).flags.contains(DiffFlags::CONTENT));

        let same = TwoWayDiff::between(
            state(StateSide::Ancestor, "same"),
            state(StateSide::Local, "same"),
        );
        assert_eq!(same.kind, DiffKind::NoChange);
    }

    #[test]
    fn test_classification_is_total() {
        for local in KINDS {
            for remote in KINDS {
                let result = classify(&two_way(local), &two_way(remote));
                let both_unchanged = local == DiffKind::NoChange && remote == DiffKind::NoChange;
                assert_eq!(result.is_none(), both_unchanged, "{local} / {remote}");
            }
        }
    }

    #[test]
    fn test_incoming_and_outgoing() {
        let incoming = classify(&two_way(DiffKind::NoChange), &two_way(DiffKind::Remove)).unwrap();
        assert_eq!(incoming.direction, Direction::Incoming);
        assert_eq!(incoming.kind, DiffKind::Remove);
        assert!(!incoming.conflict);

        let outgoing = classify(&two_way(DiffKind::Add), &two_way(DiffKind::NoChange)).unwrap();
        assert_eq!(outgoing.direction, Direction::Outgoing);
        assert_eq!(outgoing.kind, DiffKind::Add);
        assert!(!outgoing.conflict);
    }

    #[test]
    fn test_conflict_kind_precedence() {
        let cases = [
            (DiffKind::Add, DiffKind::Remove, DiffKind::Remove),
            (DiffKind::Remove, DiffKind::Change, DiffKind::Remove),
            (DiffKind::Add, DiffKind::Change, DiffKind::Change),
            (DiffKind::Change, DiffKind::Add, DiffKind::Change),
            (DiffKind::Add, DiffKind::Add, DiffKind::Add),
        ];
        for (local, remote, expected) in cases {
            let c = classify(&two_way(local), &two_way(remote)).unwrap();
            assert_eq!(c.direction, Direction::Conflicting);
            assert!(c.conflict);
            assert_eq!(c.kind, expected, "{local} / {remote}");
        }
    }

    #[test]
    fn test_two_way_entries_are_incoming() {
        let diff = Diff::TwoWay {
            path: ResourcePath::parse("a.txt").unwrap(),
            diff: two_way(DiffKind::Change),
        };
        assert_eq!(direction(&diff), Some(Direction::Incoming));
        assert_eq!(kind(&diff), DiffKind::Change);
        assert!(!is_conflict(&diff));
    }

    #[test]
    fn test_unchanged_entry_is_classification_error() {
        let diff = Diff::ThreeWay {
            path: ResourcePath::parse("a.txt").unwrap(),
            diff: ThreeWayDiff::new(TwoWayDiff::no_change(), TwoWayDiff::no_change()),
        };
        assert!(diff.is_in_sync());
        assert!(matches!(
            classify_diff(&diff),
            Err(SyncError::Classification { .. })
        ));
    }
}
