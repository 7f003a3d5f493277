//! # mirror-tree
//!
//! In-memory model of a filesystem subtree, kept current while the
//! process runs.
//!
//! This crate provides:
//! - **Tree model**: per-node-locked nodes with owned children and weak
//!   parent back-references
//! - **Builder**: the initial recursive walk that populates the tree from
//!   disk
//! - **Watcher**: OS change notifications translated into tree mutations,
//!   with the watch set extended as new directories appear
//!
//! The builder runs to completion before the watcher starts; after that
//! the watcher's consumer loop is the only structural writer.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod build;
pub mod node;
pub mod watch;

pub use build::build_tree;
pub use node::{Node, NodeKind, NodeMeta};
pub use watch::TreeWatcher;

/// Path substrings skipped by both the builder and the watcher
pub const DEFAULT_IGNORE: &[&str] = &[".DS_Store", ".mirror"];

/// True when any ignore substring occurs in the path
#[must_use]
pub fn is_ignored(path: &std::path::Path, ignore: &[String]) -> bool {
    let text = path.to_string_lossy();
    ignore.iter().any(|pat| text.contains(pat.as_str()))
}

/// Owned copy of [`DEFAULT_IGNORE`]
#[must_use]
pub fn default_ignore() -> Vec<String> {
    DEFAULT_IGNORE.iter().map(|s| (*s).to_string()).collect()
}
