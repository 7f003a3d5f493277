//! Filesystem change watcher.
//!
//! Every directory in the model gets its own non-recursive watch; when a
//! create event introduces a new directory, the watcher subscribes to it
//! so later events inside it are delivered. A single consumer thread
//! applies events to the tree, which makes it the only structural writer
//! once the initial build has finished.
//!
//! Platform event labels are normalized through notify's [`EventKind`]:
//! creates and rename-targets become [`Change::Created`], removes and
//! rename-sources become [`Change::Removed`]. Data/metadata modifications
//! and access events are dropped.

use crate::is_ignored;
use crate::node::{Node, NodeKind, NodeMeta};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Normalized event kinds the tree reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// A new path appeared under a watched directory
    Created,
    /// A watched path disappeared
    Removed,
    /// A path moved; the event carries source and target
    Renamed,
}

/// Map a platform event kind onto a tree change.
///
/// Kept in one place so per-OS differences stay test-driven rather than
/// scattered through the event loop.
fn classify(kind: &EventKind) -> Option<Change> {
    match kind {
        EventKind::Create(_) => Some(Change::Created),
        EventKind::Remove(_) => Some(Change::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(Change::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(Change::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(Change::Renamed),
        _ => None,
    }
}

/// Handle to the running watcher.
///
/// Dropping the handle stops the consumer thread and releases the OS
/// watches.
pub struct TreeWatcher {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    watched: Arc<Mutex<HashSet<PathBuf>>>,
}

impl TreeWatcher {
    /// Watch every directory currently in the tree and start the consumer
    /// loop. Must be called strictly after the initial build.
    ///
    /// # Errors
    ///
    /// Fails when the OS watch interface cannot be created or an initial
    /// directory cannot be subscribed.
    pub fn start(root: Arc<Node>, ignore: Vec<String>) -> notify::Result<Self> {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx)?;

        let mut initial = HashSet::new();
        for dir in root.all_dirs() {
            if is_ignored(&dir, &ignore) {
                continue;
            }
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
            initial.insert(dir);
        }
        tracing::info!(dirs = initial.len(), "watching directories");

        let watched = Arc::new(Mutex::new(initial));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let watched = Arc::clone(&watched);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("tree-watch".to_string())
                .spawn(move || event_loop(watcher, rx, &root, &ignore, &watched, &stop))
                .map_err(notify::Error::io)?
        };

        Ok(Self {
            stop,
            thread: Some(thread),
            watched,
        })
    }

    /// Snapshot of the currently watched directory set
    #[must_use]
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .watched
            .lock()
            .expect("watch set lock poisoned")
            .iter()
            .cloned()
            .collect();
        dirs.sort();
        dirs
    }
}

impl Drop for TreeWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn event_loop(
    mut watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    root: &Arc<Node>,
    ignore: &[String],
    watched: &Mutex<HashSet<PathBuf>>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(event)) => apply_event(&mut watcher, root, ignore, watched, &event),
            Ok(Err(err)) => tracing::warn!(%err, "watch backend error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn apply_event(
    watcher: &mut RecommendedWatcher,
    root: &Arc<Node>,
    ignore: &[String],
    watched: &Mutex<HashSet<PathBuf>>,
    event: &Event,
) {
    let Some(change) = classify(&event.kind) else {
        return;
    };

    match change {
        Change::Created => {
            for path in &event.paths {
                apply_create(watcher, root, ignore, watched, path);
            }
        }
        Change::Removed => {
            for path in &event.paths {
                apply_remove(root, ignore, watched, path);
            }
        }
        // A merged rename carries [source, target]
        Change::Renamed => {
            if let Some(from) = event.paths.first() {
                apply_remove(root, ignore, watched, from);
            }
            if let Some(to) = event.paths.get(1) {
                apply_create(watcher, root, ignore, watched, to);
            }
        }
    }
}

fn apply_create(
    watcher: &mut RecommendedWatcher,
    root: &Arc<Node>,
    ignore: &[String],
    watched: &Mutex<HashSet<PathBuf>>,
    path: &Path,
) {
    if is_ignored(path, ignore) {
        return;
    }
    let Some(parent) = lookup_parent(root, path) else {
        return;
    };

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            // Already gone again; nothing to attach
            tracing::debug!(path = %path.display(), %err, "create event for vanished path");
            return;
        }
    };

    let kind = if meta.is_dir() {
        NodeKind::Dir
    } else {
        NodeKind::File
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let node = Node::new(name, path, kind, NodeMeta::from_fs(&meta));
    parent.add_child(node);
    tracing::debug!(path = %path.display(), kind = kind.as_str(), "attached");

    if kind == NodeKind::Dir {
        match watcher.watch(path, RecursiveMode::NonRecursive) {
            Ok(()) => {
                watched
                    .lock()
                    .expect("watch set lock poisoned")
                    .insert(path.to_path_buf());
                tracing::debug!(path = %path.display(), "watching new directory");
            }
            Err(err) => tracing::warn!(path = %path.display(), %err, "cannot watch new directory"),
        }
    }
}

fn apply_remove(
    root: &Arc<Node>,
    ignore: &[String],
    watched: &Mutex<HashSet<PathBuf>>,
    path: &Path,
) {
    if is_ignored(path, ignore) {
        return;
    }
    let Some(parent) = lookup_parent(root, path) else {
        return;
    };

    parent.remove_child(path);
    // The OS drops watches on removed directories on its own
    watched.lock().expect("watch set lock poisoned").remove(path);
    tracing::debug!(path = %path.display(), "detached");
}

/// Locate the tree node for the event path's parent directory.
///
/// Events under unmanaged directories resolve to nothing and are dropped.
fn lookup_parent(root: &Arc<Node>, path: &Path) -> Option<Arc<Node>> {
    let parent_dir = path.parent()?;
    root.find(parent_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::build_tree;
    use crate::default_ignore;
    use notify::event::{CreateKind, MetadataKind, RemoveKind};
    use std::time::Instant;

    /// Poll until `cond` holds or the deadline passes.
    fn wait_for(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_classify_mapping() {
        assert_eq!(
            classify(&EventKind::Create(CreateKind::File)),
            Some(Change::Created)
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::Folder)),
            Some(Change::Removed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::To))),
            Some(Change::Created)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::From))),
            Some(Change::Removed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both))),
            Some(Change::Renamed)
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any))),
            None
        );
        assert_eq!(classify(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[test]
    fn test_file_create_and_remove() {
        let tmp = tempfile::tempdir().unwrap();
        let root_path = tmp.path().to_path_buf();
        let tree = build_tree(&root_path, &default_ignore()).unwrap();
        let _watcher = TreeWatcher::start(Arc::clone(&tree), default_ignore()).unwrap();

        let file = root_path.join("fresh.bin");
        std::fs::write(&file, b"fresh").unwrap();
        assert!(
            wait_for(|| tree.find(&file).is_some()),
            "create event never reached the tree"
        );
        let node = tree.find(&file).unwrap();
        assert_eq!(node.kind(), NodeKind::File);
        assert_eq!(node.meta().size, 5);

        std::fs::remove_file(&file).unwrap();
        assert!(
            wait_for(|| tree.find(&file).is_none()),
            "remove event never reached the tree"
        );
    }

    #[test]
    fn test_new_directory_extends_watch_set() {
        let tmp = tempfile::tempdir().unwrap();
        let root_path = tmp.path().to_path_buf();
        let tree = build_tree(&root_path, &default_ignore()).unwrap();
        let watcher = TreeWatcher::start(Arc::clone(&tree), default_ignore()).unwrap();

        let sub = root_path.join("sub");
        std::fs::create_dir(&sub).unwrap();
        assert!(wait_for(|| tree.find(&sub).is_some()));
        assert!(wait_for(|| watcher.watched_dirs().contains(&sub)));

        // Events inside the new directory must now be delivered
        let nested = sub.join("inner.bin");
        std::fs::write(&nested, b"inner").unwrap();
        assert!(
            wait_for(|| tree.find(&nested).is_some()),
            "event inside freshly created directory was lost"
        );
    }

    #[test]
    fn test_ignored_paths_never_attach() {
        let tmp = tempfile::tempdir().unwrap();
        let root_path = tmp.path().to_path_buf();
        let tree = build_tree(&root_path, &default_ignore()).unwrap();
        let _watcher = TreeWatcher::start(Arc::clone(&tree), default_ignore()).unwrap();

        std::fs::write(root_path.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(root_path.join("kept.bin"), b"kept").unwrap();

        assert!(wait_for(|| tree.find(&root_path.join("kept.bin")).is_some()));
        assert!(tree.find(&root_path.join(".DS_Store")).is_none());
    }

    #[test]
    fn test_replayed_create_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let root_path = tmp.path().to_path_buf();
        let tree = build_tree(&root_path, &default_ignore()).unwrap();

        let file = root_path.join("dup.bin");
        std::fs::write(&file, b"dup").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx).unwrap();
        drop(rx);
        let watched = Mutex::new(HashSet::new());

        // Same create applied twice must not duplicate the child
        apply_create(&mut watcher, &tree, &default_ignore(), &watched, &file);
        apply_create(&mut watcher, &tree, &default_ignore(), &watched, &file);

        assert_eq!(tree.child_count(), 1);
    }

    #[test]
    fn test_event_outside_managed_tree_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let root_path = tmp.path().join("managed");
        std::fs::create_dir(&root_path).unwrap();
        let tree = build_tree(&root_path, &default_ignore()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(tx).unwrap();
        drop(rx);
        let watched = Mutex::new(HashSet::new());

        let stray = tmp.path().join("elsewhere/file.bin");
        apply_create(&mut watcher, &tree, &default_ignore(), &watched, &stray);

        assert_eq!(tree.child_count(), 0);
    }
}
