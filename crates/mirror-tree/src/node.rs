//! Tree nodes with per-node locking.
//!
//! Downward edges own their children (`Arc`), upward edges are weak
//! back-references used for navigation only, so no ownership cycle can
//! form. Every node carries its own mutex guarding the child list,
//! the parent handle and the metadata. No method holds two node locks at
//! the same time; traversals clone the child list under the lock and
//! recurse after releasing it.

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::SystemTime;

/// What a node represents on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A directory
    Dir,
    /// A regular file
    File,
}

impl NodeKind {
    /// Wire/export label for the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Dir => "dir",
            NodeKind::File => "file",
        }
    }
}

/// Stat-derived node metadata
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeMeta {
    /// Size in bytes (0 for directories on some platforms)
    pub size: u64,
    /// Unix permission bits
    pub mode: u32,
    /// Modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl NodeMeta {
    /// Extract metadata from a stat result
    #[must_use]
    pub fn from_fs(meta: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            meta.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = 0;

        Self {
            size: meta.len(),
            mode,
            modified: meta.modified().ok(),
        }
    }
}

struct Inner {
    parent: Weak<Node>,
    children: Vec<Arc<Node>>,
    meta: NodeMeta,
}

/// One element of the filesystem tree model
pub struct Node {
    name: String,
    path: PathBuf,
    kind: NodeKind,
    inner: Mutex<Inner>,
}

impl Node {
    /// Create a detached node
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, kind: NodeKind, meta: NodeMeta) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            path: path.into(),
            kind,
            inner: Mutex::new(Inner {
                parent: Weak::new(),
                children: Vec::new(),
                meta,
            }),
        })
    }

    /// Node name (final path component)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path of the node
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Node kind
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for directory nodes
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Dir
    }

    /// Snapshot of the node's metadata
    #[must_use]
    pub fn meta(&self) -> NodeMeta {
        self.inner.lock().expect("node lock poisoned").meta
    }

    /// Replace the node's metadata
    pub fn set_meta(&self, meta: NodeMeta) {
        self.inner.lock().expect("node lock poisoned").meta = meta;
    }

    /// Upgraded parent handle, if the node is attached
    #[must_use]
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.inner.lock().expect("node lock poisoned").parent.upgrade()
    }

    /// Snapshot of the child list
    #[must_use]
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.inner.lock().expect("node lock poisoned").children.clone()
    }

    /// Number of direct children
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.lock().expect("node lock poisoned").children.len()
    }

    /// Attach `child` under this node, setting its parent back-reference.
    ///
    /// Idempotent by path: an existing child with the same path is
    /// replaced, so a replayed create event never produces a duplicate.
    /// The child's path must extend this node's path.
    pub fn add_child(self: &Arc<Self>, child: Arc<Node>) {
        debug_assert!(
            child.path.starts_with(&self.path),
            "child path {:?} does not extend parent path {:?}",
            child.path,
            self.path
        );

        {
            let mut inner = self.inner.lock().expect("node lock poisoned");
            inner.children.retain(|c| c.path != child.path);
            inner.children.push(Arc::clone(&child));
        }
        // Parent lock released before the child's lock is taken
        child.inner.lock().expect("node lock poisoned").parent = Arc::downgrade(self);
    }

    /// Detach the child whose path equals `path`; no-op when absent
    pub fn remove_child(&self, path: &Path) {
        let mut inner = self.inner.lock().expect("node lock poisoned");
        inner.children.retain(|c| c.path != path);
    }

    /// Pre-order search for the node whose path equals `path`
    #[must_use]
    pub fn find(self: &Arc<Self>, path: &Path) -> Option<Arc<Node>> {
        if self.path == path {
            return Some(Arc::clone(self));
        }
        for child in self.children() {
            if let Some(found) = child.find(path) {
                return Some(found);
            }
        }
        None
    }

    /// Pre-order list of every directory path reachable from this node
    #[must_use]
    pub fn all_dirs(self: &Arc<Self>) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        self.collect_dirs(&mut dirs);
        dirs
    }

    fn collect_dirs(self: &Arc<Self>, out: &mut Vec<PathBuf>) {
        if self.is_dir() {
            out.push(self.path.clone());
            for child in self.children() {
                child.collect_dirs(out);
            }
        }
    }

    /// Pre-order list of every path in the tree (directories and files)
    #[must_use]
    pub fn all_paths(self: &Arc<Self>) -> Vec<PathBuf> {
        let mut paths = vec![self.path.clone()];
        for child in self.children() {
            paths.extend(child.all_paths());
        }
        paths
    }

    /// Serialize name/path/kind/children recursively.
    ///
    /// Metadata is intentionally omitted to keep the format stable.
    #[must_use]
    pub fn to_json(self: &Arc<Self>) -> Value {
        let children: Vec<Value> = self.children().iter().map(Node::to_json).collect();
        json!({
            "name": self.name,
            "path": self.path,
            "kind": self.kind.as_str(),
            "children": children,
        })
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("children", &self.child_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(path: &str) -> Arc<Node> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Node::new(name, path, NodeKind::Dir, NodeMeta::default())
    }

    fn file(path: &str) -> Arc<Node> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());
        Node::new(name, path, NodeKind::File, NodeMeta::default())
    }

    #[test]
    fn test_add_and_find() {
        let root = dir("/data");
        let sub = dir("/data/sub");
        let leaf = file("/data/sub/a.bin");

        root.add_child(Arc::clone(&sub));
        sub.add_child(Arc::clone(&leaf));

        let found = root.find(Path::new("/data/sub/a.bin")).unwrap();
        assert_eq!(found.path(), Path::new("/data/sub/a.bin"));
        assert_eq!(found.kind(), NodeKind::File);
        assert!(root.find(Path::new("/data/other")).is_none());
    }

    #[test]
    fn test_parent_back_reference() {
        let root = dir("/data");
        let child = file("/data/a.bin");
        root.add_child(Arc::clone(&child));

        let parent = child.parent().unwrap();
        assert_eq!(parent.path(), Path::new("/data"));

        // Back-reference is weak: dropping the tree drops the child's parent
        drop(root);
        drop(parent);
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_add_child_is_idempotent_by_path() {
        let root = dir("/data");
        root.add_child(file("/data/a.bin"));
        root.add_child(file("/data/a.bin"));

        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn test_remove_child() {
        let root = dir("/data");
        root.add_child(file("/data/a.bin"));
        root.add_child(file("/data/b.bin"));

        root.remove_child(Path::new("/data/a.bin"));
        assert_eq!(root.child_count(), 1);
        assert!(root.find(Path::new("/data/a.bin")).is_none());

        // Removing an absent path is a silent no-op
        root.remove_child(Path::new("/data/a.bin"));
        assert_eq!(root.child_count(), 1);
    }

    #[test]
    fn test_all_dirs_preorder() {
        let root = dir("/data");
        let a = dir("/data/a");
        let b = dir("/data/a/b");
        root.add_child(Arc::clone(&a));
        a.add_child(Arc::clone(&b));
        root.add_child(file("/data/f.bin"));
        root.add_child(dir("/data/z"));

        let dirs = root.all_dirs();
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/data"),
                PathBuf::from("/data/a"),
                PathBuf::from("/data/a/b"),
                PathBuf::from("/data/z"),
            ]
        );
    }

    #[test]
    fn test_to_json_shape() {
        let root = dir("/data");
        root.add_child(file("/data/a.bin"));

        let value = root.to_json();
        assert_eq!(value["kind"], "dir");
        assert_eq!(value["name"], "data");
        assert_eq!(value["children"][0]["kind"], "file");
        assert_eq!(value["children"][0]["name"], "a.bin");
        // Metadata stays out of the export
        assert!(value.get("size").is_none());
    }

    #[test]
    fn test_set_meta() {
        let node = file("/data/a.bin");
        node.set_meta(NodeMeta {
            size: 1024,
            mode: 0o644,
            modified: None,
        });
        assert_eq!(node.meta().size, 1024);
        assert_eq!(node.meta().mode, 0o644);
    }
}
