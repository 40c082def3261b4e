use jwalk::WalkDir;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use synctree_common::{ContentStore, RemoteState, RemoteStateProvider, ResourcePath, StoreError};
use tracing::debug;

/// Content store over a local directory
pub struct LocalStore {
    instance_id: String,
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        let instance_id = format!("local:{}", root.display());
        Self { instance_id, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &ResourcePath) -> PathBuf {
        let mut full = self.root.clone();
        for segment in path.segments() {
            full.push(segment);
        }
        full
    }

    fn to_resource(&self, full: &Path) -> Option<ResourcePath> {
        let relative = full.strip_prefix(&self.root).ok()?;
        let segments: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        ResourcePath::from_segments(segments?).ok()
    }
}

fn map_io(path: &Path, err: std::io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => StoreError::PermissionDenied(path.display().to_string()),
        _ => StoreError::Io(err),
    }
}

impl ContentStore for LocalStore {
    fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn read(&self, path: &ResourcePath) -> Result<Vec<u8>, StoreError> {
        let full_path = self.full_path(path);
        fs::read(&full_path).map_err(|e| map_io(&full_path, e))
    }

    fn write(&self, path: &ResourcePath, content: &[u8]) -> Result<(), StoreError> {
        let full_path = self.full_path(path);

        // Ensure parent directory exists
        if let Some(parent) = full_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| map_io(parent, e))?;
            }
        }

        fs::write(&full_path, content).map_err(|e| map_io(&full_path, e))
    }

    fn delete(&self, path: &ResourcePath) -> Result<(), StoreError> {
        let full_path = self.full_path(path);
        fs::remove_file(&full_path).map_err(|e| map_io(&full_path, e))
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        self.full_path(path).is_file()
    }

    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError> {
        let full_root = self.full_path(root);
        if full_root.is_file() {
            return Ok(vec![root.clone()]);
        }
        if !full_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&full_root).skip_hidden(false).sort(true) {
            let entry = entry.map_err(|e| StoreError::Other(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            match self.to_resource(&entry.path()) {
                Some(path) => files.push(path),
                None => debug!("Skipping non UTF-8 path {}", entry.path().display()),
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Remote state backed by two directories
///
/// `ancestor_root` holds the last synchronized state and `remote_root` the
/// current remote one. Without an ancestor directory every remote file looks
/// newly added.
pub struct DirectoryRemoteProvider {
    ancestor: Option<LocalStore>,
    remote: LocalStore,
}

impl DirectoryRemoteProvider {
    pub fn new(ancestor_root: Option<PathBuf>, remote_root: PathBuf) -> Self {
        Self {
            ancestor: ancestor_root.map(LocalStore::new),
            remote: LocalStore::new(remote_root),
        }
    }
}

impl RemoteStateProvider for DirectoryRemoteProvider {
    fn fetch(&self, path: &ResourcePath) -> Result<RemoteState, StoreError> {
        let ancestor = match &self.ancestor {
            Some(store) => store.read_optional(path)?,
            None => None,
        };
        let remote = self.remote.read_optional(path)?;
        Ok(RemoteState::new(ancestor, remote))
    }

    fn files_under(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>, StoreError> {
        let mut files = self.remote.files_under(root)?;
        if let Some(ancestor) = &self.ancestor {
            files.extend(ancestor.files_under(root)?);
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}
