use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use synctree_common::{ResourceMapping, ResourcePath, ResourceTraversal, SyncConfig, SyncType};
use synctree_core::{
    classify_diff, DiffKind, Direction, DirectoryRemoteProvider, LocalStore, MergeEngine,
    StorageMergerDispatcher, SynchronizationContext, SynchronizationScope,
};
use tempfile::TempDir;

struct Workspace {
    _temp: TempDir,
    local: PathBuf,
    ancestor: PathBuf,
    remote: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let local = temp.path().join("local");
        let ancestor = temp.path().join("ancestor");
        let remote = temp.path().join("remote");
        for dir in [&local, &ancestor, &remote] {
            fs::create_dir_all(dir).unwrap();
        }
        Self {
            _temp: temp,
            local,
            ancestor,
            remote,
        }
    }

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    fn states(
        &self,
        path: &str,
        ancestor: Option<&str>,
        local: Option<&str>,
        remote: Option<&str>,
    ) {
        for (root, content) in [
            (&self.ancestor, ancestor),
            (&self.local, local),
            (&self.remote, remote),
        ] {
            if let Some(content) = content {
                Self::write(root, path, content);
            }
        }
    }

    fn context(&self, roots: &[&str]) -> Arc<SynchronizationContext> {
        let roots = roots
            .iter()
            .map(|r| ResourcePath::parse(r).unwrap())
            .collect();
        Arc::new(
            SynchronizationContext::new(
                SynchronizationScope::for_roots(roots),
                SyncType::ThreeWay,
                Arc::new(LocalStore::new(self.local.clone())),
                Arc::new(DirectoryRemoteProvider::new(
                    Some(self.ancestor.clone()),
                    self.remote.clone(),
                )),
            )
            .with_config(SyncConfig {
                refresh_batch_size: 4,
                ..Default::default()
            }),
        )
    }
}

fn p(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

#[test]
fn test_full_session_over_directories() {
    let ws = Workspace::new();
    ws.states("src/main.txt", Some("a\nb\nc\n"), Some("A\nb\nc\n"), Some("a\nb\nC\n"));
    ws.states("src/lib.txt", Some("x"), Some("x"), Some("y"));
    ws.states("src/old.txt", Some("x"), Some("x"), None);
    ws.states("docs/notes.txt", Some("n"), Some("mine"), Some("n"));
    ws.states("assets/logo.bin", Some("\0a"), Some("\0b"), Some("\0c"));

    let context = ws.context(&[""]);
    context.refresh_all(None).unwrap();
    assert_eq!(context.diff_tree().len(), 5);
    assert_eq!(context.diff_tree().count_for(Some(Direction::Conflicting), None), 2);
    assert_eq!(
        context.diff_tree().members(&ResourcePath::root()),
        vec![p("assets"), p("docs"), p("src")]
    );

    let engine = MergeEngine::new(
        Arc::clone(&context),
        StorageMergerDispatcher::from_config(&SyncConfig::default()).unwrap(),
    );
    let status = engine
        .merge_all(&[ResourceTraversal::infinite(ResourcePath::root())], false)
        .unwrap();

    assert!(!status.ok);
    assert_eq!(status.conflicting_paths, vec![p("assets/logo.bin")]);
    assert_eq!(
        status.merged_paths,
        vec![p("src/lib.txt"), p("src/main.txt"), p("src/old.txt")]
    );
    assert_eq!(
        fs::read_to_string(ws.local.join("src/main.txt")).unwrap(),
        "A\nb\nC\n"
    );
    assert_eq!(fs::read_to_string(ws.local.join("src/lib.txt")).unwrap(), "y");
    assert!(!ws.local.join("src/old.txt").exists());

    context.refresh_all(None).unwrap();
    let main = context.get_diff(&p("src/main.txt")).unwrap();
    let classification = classify_diff(&main).unwrap();
    assert_eq!(classification.direction, Direction::Outgoing);
    assert_eq!(classification.kind, DiffKind::Change);
    assert!(context.get_diff(&p("src/lib.txt")).is_none());
    assert!(context.get_diff(&p("src/old.txt")).is_none());
    assert!(context.get_diff(&p("docs/notes.txt")).is_some());
    assert!(context.get_diff(&p("assets/logo.bin")).is_some());

    context.dispose();
}

#[test]
fn test_background_refresh_and_scope_growth() {
    let ws = Workspace::new();
    ws.states("a/one.txt", Some("1"), Some("1"), Some("2"));
    ws.states("b/two.txt", None, Some("new"), None);

    let context = ws.context(&["a"]);
    let events = context.subscribe();
    let result = context.refresh_in_background(
        vec![ResourceTraversal::infinite(p("a"))],
        Arc::new(AtomicBool::new(false)),
    );
    let delta = result
        .recv_timeout(Duration::from_secs(10))
        .unwrap()
        .unwrap();
    assert_eq!(delta.added, vec![p("a/one.txt")]);
    assert!(!context.has_outstanding_work());
    assert_eq!(events.recv_timeout(Duration::from_secs(1)).unwrap(), delta);

    // Not in scope yet
    assert!(context.get_diff(&p("b/two.txt")).is_none());

    let grown = context
        .extend_scope(vec![ResourceMapping::for_resource(p("b"))])
        .unwrap();
    assert_eq!(grown.added, vec![p("b/two.txt")]);
    let added = classify_diff(&context.get_diff(&p("b/two.txt")).unwrap()).unwrap();
    assert_eq!((added.direction, added.kind), (Direction::Outgoing, DiffKind::Add));
}

#[test]
fn test_reject_survives_refresh_until_remote_changes() {
    let ws = Workspace::new();
    ws.states("cfg.txt", Some("v1"), Some("v1"), Some("v2"));
    let context = ws.context(&[""]);
    context.refresh_all(None).unwrap();

    let engine = MergeEngine::new(
        Arc::clone(&context),
        StorageMergerDispatcher::from_config(&SyncConfig::default()).unwrap(),
    );
    engine.reject(&[p("cfg.txt")]).unwrap();
    context.refresh_all(None).unwrap();
    assert!(context.diff_tree().is_empty());

    Workspace::write(&ws.remote, "cfg.txt", "v3");
    context.refresh_all(None).unwrap();
    let diff = context.get_diff(&p("cfg.txt")).unwrap();
    assert_eq!(classify_diff(&diff).unwrap().direction, Direction::Incoming);
}
