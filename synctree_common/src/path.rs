use crate::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized, `/`-separated path of a resource relative to the workspace root
///
/// Paths order segment by segment, so a parent always sorts directly before
/// its descendants. The diff tree depends on this for subtree range scans.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The workspace root (no segments)
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a path such as `src/lib.rs` or `/src/lib.rs`
    ///
    /// Backslashes are treated as separators; see [`ResourcePath::from_segments`]
    /// for how segments are normalized.
    pub fn parse(raw: &str) -> Result<Self, SyncError> {
        Self::from_segments(raw.split(['/', '\\'])).map_err(|_| {
            SyncError::Path(format!("parent segments are not allowed: {}", raw))
        })
    }

    /// Build a path from individual segments
    ///
    /// Empty and `.` segments are dropped and `..` is rejected.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut normalized = Vec::new();
        for segment in segments {
            let segment: String = segment.into();
            match segment.as_str() {
                "" | "." => continue,
                ".." => {
                    return Err(SyncError::Path(
                        "parent segments are not allowed".to_string(),
                    ))
                }
                _ => normalized.push(segment),
            }
        }
        Ok(Self {
            segments: normalized,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn join(&self, name: &str) -> Result<Self, SyncError> {
        let tail = Self::parse(name)?;
        let mut segments = self.segments.clone();
        segments.extend(tail.segments);
        Ok(Self { segments })
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment, or `None` for the root
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Lower-cased file extension of the last segment
    pub fn extension(&self) -> Option<String> {
        let name = self.name()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// True when `self` is `other` or one of its ancestors
    pub fn is_prefix_of(&self, other: &ResourcePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a == b)
    }

    /// Number of segments `other` lies below `self`, if it is a descendant
    pub fn depth_below(&self, other: &ResourcePath) -> Option<usize> {
        if self.is_prefix_of(other) {
            Some(other.segments.len() - self.segments.len())
        } else {
            None
        }
    }

    /// Deepest path that is a prefix of both
    pub fn common_ancestor(&self, other: &ResourcePath) -> ResourcePath {
        let segments = self
            .segments
            .iter()
            .zip(&other.segments)
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.clone())
            .collect();
        Self { segments }
    }

    /// Path of the direct child of `self` on the way to `descendant`
    pub fn child_towards(&self, descendant: &ResourcePath) -> Option<ResourcePath> {
        match self.depth_below(descendant) {
            Some(depth) if depth > 0 => Some(Self {
                segments: descendant.segments[..self.segments.len() + 1].to_vec(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

/// How far below its root a traversal reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    /// The root resource only
    Zero,
    /// The root and its direct children
    One,
    /// The whole subtree
    Infinite,
}

impl Depth {
    fn reaches(self, levels: usize) -> bool {
        match self {
            Depth::Zero => levels == 0,
            Depth::One => levels <= 1,
            Depth::Infinite => true,
        }
    }
}

/// A root path plus a recursion depth describing scope coverage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceTraversal {
    pub root: ResourcePath,
    pub depth: Depth,
}

impl ResourceTraversal {
    pub fn new(root: ResourcePath, depth: Depth) -> Self {
        Self { root, depth }
    }

    pub fn infinite(root: ResourcePath) -> Self {
        Self::new(root, Depth::Infinite)
    }

    pub fn covers(&self, path: &ResourcePath) -> bool {
        self.root
            .depth_below(path)
            .map_or(false, |levels| self.depth.reaches(levels))
    }

    /// True when every path covered by `other` is covered by `self`
    pub fn contains(&self, other: &ResourceTraversal) -> bool {
        let Some(levels) = self.root.depth_below(&other.root) else {
            return false;
        };
        match (self.depth, other.depth) {
            (Depth::Infinite, _) => true,
            (_, Depth::Infinite) => false,
            (Depth::One, Depth::Zero) => levels <= 1,
            (Depth::One, Depth::One) => levels == 0,
            (Depth::Zero, Depth::Zero) => levels == 0,
            (Depth::Zero, Depth::One) => false,
        }
    }
}

/// True when any traversal in the list covers `path`
pub fn covered_by_any(traversals: &[ResourceTraversal], path: &ResourcePath) -> bool {
    traversals.iter().any(|t| t.covers(path))
}

/// Drop traversals already covered by another one in the list
///
/// Survivors keep their original order. Of two identical traversals only the
/// first is kept.
pub fn compact_traversals(traversals: &[ResourceTraversal]) -> Vec<ResourceTraversal> {
    let mut result: Vec<ResourceTraversal> = Vec::new();
    for (index, candidate) in traversals.iter().enumerate() {
        let redundant = traversals.iter().enumerate().any(|(other_index, other)| {
            other_index != index
                && other.contains(candidate)
                && (other != candidate || other_index < index)
        });
        if !redundant {
            result.push(candidate.clone());
        }
    }
    result
}

/// A model object's projection onto resources
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceMapping {
    /// Identifier of the model element (e.g. `java:com.example.Foo`)
    pub model_id: String,
    pub traversals: Vec<ResourceTraversal>,
}

impl ResourceMapping {
    pub fn new(model_id: impl Into<String>, traversals: Vec<ResourceTraversal>) -> Self {
        Self {
            model_id: model_id.into(),
            traversals,
        }
    }

    /// Mapping that covers a single resource subtree
    pub fn for_resource(root: ResourcePath) -> Self {
        Self::new(
            format!("resource:{}", root),
            vec![ResourceTraversal::infinite(root)],
        )
    }
}
