use crate::{ContentTypeId, ResourcePath, StoreError};

/// Storage for the local working copy
///
/// The core never assumes a particular filesystem: anything that can read,
/// write, delete and enumerate files by [`ResourcePath`] will do.
pub trait ContentStore: Send + Sync {
    /// Uniquely identifies the store instance (e.g. "local:/home/me/project")
    fn instance_id(&self) -> &str;

    /// Reads the full content of a file
    fn read(&self, path: &ResourcePath) -> Result<Vec<u8>, StoreError>;

    /// Replaces (or creates) a file
    fn write(&self, path: &ResourcePath, content: &[u8]) -> Result<(), StoreError>;

    /// Deletes a file
    fn delete(&self, path: &ResourcePath) -> Result<(), StoreError>;

    /// Checks if a file exists
    fn exists(&self, path: &ResourcePath) -> bool;

    /// Lists every file at or below `root`
    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError>;

    /// Reads a file, mapping "not found" to `None`
    fn read_optional(&self, path: &ResourcePath) -> Result<Option<Vec<u8>>, StoreError> {
        if !self.exists(path) {
            return Ok(None);
        }
        self.read(path).map(Some)
    }
}

/// Ancestor and remote content of one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteState {
    pub ancestor: Option<Vec<u8>>,
    pub remote: Option<Vec<u8>>,
}

impl RemoteState {
    pub fn new(ancestor: Option<Vec<u8>>, remote: Option<Vec<u8>>) -> Self {
        Self { ancestor, remote }
    }
}

/// Source of the common-ancestor and remote states
///
/// Implementations may be slow or network bound. Retry policy belongs here,
/// the core never retries.
pub trait RemoteStateProvider: Send + Sync {
    fn fetch(&self, path: &ResourcePath) -> Result<RemoteState, StoreError>;

    /// Lists every path at or below `root` that has an ancestor or remote state
    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError>;
}

/// Content type detection
pub trait ContentClassifier: Send + Sync {
    fn classify(&self, content: &[u8], file_name: &str) -> ContentTypeId;

    /// Whether the content type can be merged line by line
    fn is_text(&self, content_type: &ContentTypeId) -> bool;
}
