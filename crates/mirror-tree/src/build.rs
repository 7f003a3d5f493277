//! Initial tree construction from disk.
//!
//! One recursive walk populates the model before the watcher takes over.
//! Stat failures on individual entries skip that entry; directory listing
//! failures leave the directory empty. Entry order is whatever the OS
//! readdir yields.

use crate::is_ignored;
use crate::node::{Node, NodeKind, NodeMeta};
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Build the tree rooted at `root`, skipping ignore-listed paths.
///
/// # Errors
///
/// Fails only when the root itself cannot be stat'd; failures below the
/// root skip the affected entry and continue.
pub fn build_tree(root: &Path, ignore: &[String]) -> io::Result<Arc<Node>> {
    let node = stat_node(root)?;
    if node.is_dir() {
        build_children(&node, root, ignore);
    }
    Ok(node)
}

fn stat_node(path: &Path) -> io::Result<Arc<Node>> {
    let meta = std::fs::metadata(path)?;
    let kind = if meta.is_dir() {
        NodeKind::Dir
    } else {
        NodeKind::File
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());

    Ok(Node::new(name, path, kind, NodeMeta::from_fs(&meta)))
}

fn build_children(parent: &Arc<Node>, dir: &Path, ignore: &[String]) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(path = %dir.display(), %err, "cannot list directory, leaving it empty");
            return;
        }
    };

    for entry in entries {
        let Ok(entry) = entry else { continue };
        let child_path = entry.path();

        if is_ignored(&child_path, ignore) {
            continue;
        }

        let child = match stat_node(&child_path) {
            Ok(child) => child,
            Err(err) => {
                tracing::debug!(path = %child_path.display(), %err, "stat failed, skipping entry");
                continue;
            }
        };

        parent.add_child(Arc::clone(&child));
        if child.is_dir() {
            build_children(&child, &child_path, ignore);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::default_ignore;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn fs_paths(root: &Path, ignore: &[String]) -> BTreeSet<PathBuf> {
        let mut out = BTreeSet::new();
        out.insert(root.to_path_buf());
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if is_ignored(&path, ignore) {
                    continue;
                }
                out.insert(path.clone());
                if path.is_dir() {
                    stack.push(path);
                }
            }
        }
        out
    }

    #[test]
    fn test_tree_matches_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::create_dir(root.join("c")).unwrap();
        std::fs::write(root.join("top.bin"), b"x").unwrap();
        std::fs::write(root.join("a/one.txt"), b"one").unwrap();
        std::fs::write(root.join("a/b/two.txt"), b"two").unwrap();

        let ignore = default_ignore();
        let tree = build_tree(root, &ignore).unwrap();

        let tree_paths: BTreeSet<PathBuf> = tree.all_paths().into_iter().collect();
        assert_eq!(tree_paths, fs_paths(root, &ignore));
    }

    #[test]
    fn test_ignored_paths_excluded() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();

        std::fs::create_dir(root.join(".mirror")).unwrap();
        std::fs::write(root.join(".mirror/state"), b"s").unwrap();
        std::fs::write(root.join(".DS_Store"), b"junk").unwrap();
        std::fs::write(root.join("kept.bin"), b"k").unwrap();

        let tree = build_tree(root, &default_ignore()).unwrap();

        assert!(tree.find(&root.join("kept.bin")).is_some());
        assert!(tree.find(&root.join(".mirror")).is_none());
        assert!(tree.find(&root.join(".DS_Store")).is_none());
    }

    #[test]
    fn test_file_root() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("single.bin");
        std::fs::write(&path, b"data").unwrap();

        let tree = build_tree(&path, &default_ignore()).unwrap();
        assert_eq!(tree.kind(), NodeKind::File);
        assert_eq!(tree.child_count(), 0);
        assert_eq!(tree.meta().size, 4);
    }

    #[test]
    fn test_missing_root_fails() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(build_tree(&tmp.path().join("nope"), &default_ignore()).is_err());
    }

    #[test]
    fn test_metadata_captured() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.bin");
        std::fs::write(&path, vec![0u8; 2048]).unwrap();

        let tree = build_tree(tmp.path(), &default_ignore()).unwrap();
        let node = tree.find(&path).unwrap();
        assert_eq!(node.meta().size, 2048);
        assert!(node.meta().modified.is_some());
    }
}
