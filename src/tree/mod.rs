//! Virtual trees
//!
//! A local directory, the downloaded remote archive and in-memory snapshots
//! are all exposed through [`VirtualNode`], so flattening and diffing never
//! care where content comes from.

pub mod archive;
pub mod hasher;
pub mod local;
pub mod memory;
pub mod walk;

use crate::error::SyncError;
use async_trait::async_trait;

pub use archive::{ArchiveOptions, ArchiveTree};
pub use local::LocalTree;
pub use memory::MemoryTree;
pub use walk::{walk_files, WalkEntry};

/// Boxed node handed out by trees.
pub type NodeRef = Box<dyn VirtualNode>;

/// One entry of a virtual tree.
///
/// Paths are relative to the tree root and use `/`. The root itself has the
/// empty path. Content is produced on every call and may be rewritten by the
/// tree (for instance to inject a codebase digest).
#[async_trait]
pub trait VirtualNode: Send + Sync {
    fn path(&self) -> &str;

    fn is_directory(&self) -> bool;

    /// Direct children. Files have none.
    async fn children(&self) -> Result<Vec<NodeRef>, SyncError>;

    /// Text content of a file.
    async fn content(&self) -> Result<String, SyncError>;
}

/// Join a directory path and a child name.
pub(crate) fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}
