use crate::store::{DirectoryRemoteProvider, LocalStore};
use std::fs;
use synctree_common::{ContentStore, RemoteStateProvider, ResourcePath, StoreError};
use tempfile::TempDir;

fn p(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

#[test]
fn test_local_store_instance_id() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::new(temp_dir.path().to_path_buf());
    assert!(store.instance_id().starts_with("local:"));
}

#[test]
fn test_local_store_write_creates_parents() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::new(temp_dir.path().to_path_buf());

    store.write(&p("sub/deep/file.txt"), b"nested").unwrap();

    let content = fs::read_to_string(temp_dir.path().join("sub/deep/file.txt")).unwrap();
    assert_eq!(content, "nested");
    assert!(store.exists(&p("sub/deep/file.txt")));
    assert_eq!(store.read(&p("sub/deep/file.txt")).unwrap(), b"nested");
}

#[test]
fn test_local_store_missing_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::new(temp_dir.path().to_path_buf());

    assert!(matches!(
        store.read(&p("missing.txt")),
        Err(StoreError::NotFound(_))
    ));
    assert_eq!(store.read_optional(&p("missing.txt")).unwrap(), None);
    assert!(store.delete(&p("missing.txt")).is_err());
}

#[test]
fn test_local_store_files_under() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::create_dir_all(temp_dir.path().join("a/b")).unwrap();
    fs::write(temp_dir.path().join("a/x.txt"), b"x").unwrap();
    fs::write(temp_dir.path().join("a/b/y.txt"), b"y").unwrap();
    fs::write(temp_dir.path().join("top.txt"), b"t").unwrap();
    let store = LocalStore::new(temp_dir.path().to_path_buf());

    assert_eq!(
        store.files_under(&p("a")).unwrap(),
        vec![p("a/b/y.txt"), p("a/x.txt")]
    );
    assert_eq!(store.files_under(&ResourcePath::root()).unwrap().len(), 3);
    assert_eq!(store.files_under(&p("top.txt")).unwrap(), vec![p("top.txt")]);
    assert!(store.files_under(&p("nowhere")).unwrap().is_empty());
}

#[test]
fn test_local_store_delete() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = LocalStore::new(temp_dir.path().to_path_buf());
    store.write(&p("gone.txt"), b"bye").unwrap();

    store.delete(&p("gone.txt")).unwrap();
    assert!(!temp_dir.path().join("gone.txt").exists());
}

#[test]
fn test_directory_remote_provider() {
    let ancestor = TempDir::new().expect("Failed to create temp dir");
    let remote = TempDir::new().expect("Failed to create temp dir");
    fs::write(ancestor.path().join("a.txt"), b"base").unwrap();
    fs::write(ancestor.path().join("removed.txt"), b"old").unwrap();
    fs::write(remote.path().join("a.txt"), b"changed").unwrap();
    fs::write(remote.path().join("added.txt"), b"new").unwrap();

    let provider = DirectoryRemoteProvider::new(
        Some(ancestor.path().to_path_buf()),
        remote.path().to_path_buf(),
    );

    let state = provider.fetch(&p("a.txt")).unwrap();
    assert_eq!(state.ancestor.as_deref(), Some(&b"base"[..]));
    assert_eq!(state.remote.as_deref(), Some(&b"changed"[..]));

    let state = provider.fetch(&p("removed.txt")).unwrap();
    assert!(state.remote.is_none());

    assert_eq!(
        provider.files_under(&ResourcePath::root()).unwrap(),
        vec![p("a.txt"), p("added.txt"), p("removed.txt")]
    );
}

#[test]
fn test_directory_remote_provider_without_ancestor() {
    let remote = TempDir::new().expect("Failed to create temp dir");
    fs::write(remote.path().join("a.txt"), b"x").unwrap();
    let provider = DirectoryRemoteProvider::new(None, remote.path().to_path_buf());

    let state = provider.fetch(&p("a.txt")).unwrap();
    assert!(state.ancestor.is_none());
    assert_eq!(state.remote.as_deref(), Some(&b"x"[..]));
}
