//! In-memory tree over a `path -> content` map.
//!
//! Backs the materialized state of previous runs and test fixtures.

use super::{join, NodeRef, VirtualNode};
use crate::error::SyncError;
use crate::types::FlatTree;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: Arc<FlatTree>,
}

impl MemoryTree {
    pub fn new(files: FlatTree) -> Self {
        MemoryTree {
            files: Arc::new(files),
        }
    }

    pub fn root(&self) -> NodeRef {
        self.directory("")
    }

    /// Directory node at `path`; it has no children when no key lives
    /// below it.
    pub fn directory(&self, path: &str) -> NodeRef {
        Box::new(MemoryNode {
            files: Arc::clone(&self.files),
            path: path.trim_end_matches('/').to_string(),
            is_directory: true,
        })
    }

    /// Children of the directory at `path`.
    pub fn children_of(&self, path: &str) -> Vec<NodeRef> {
        list(&self.files, path.trim_end_matches('/'))
    }
}

/// Files directly under `dir` first, then its subdirectories.
fn list(files: &Arc<FlatTree>, dir: &str) -> Vec<NodeRef> {
    let prefix = if dir.is_empty() {
        String::new()
    } else {
        format!("{}/", dir)
    };
    let mut dirs = BTreeSet::new();
    let mut out: Vec<NodeRef> = Vec::new();
    for key in files.range(prefix.clone()..).map(|(k, _)| k) {
        let Some(rest) = key.strip_prefix(&prefix) else {
            break;
        };
        match rest.split_once('/') {
            Some((sub, _)) => {
                dirs.insert(sub.to_string());
            }
            None => out.push(Box::new(MemoryNode {
                files: Arc::clone(files),
                path: key.clone(),
                is_directory: false,
            })),
        }
    }
    for sub in dirs {
        out.push(Box::new(MemoryNode {
            files: Arc::clone(files),
            path: join(dir, &sub),
            is_directory: true,
        }));
    }
    out
}

struct MemoryNode {
    files: Arc<FlatTree>,
    path: String,
    is_directory: bool,
}

#[async_trait]
impl VirtualNode for MemoryNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        self.is_directory
    }

    async fn children(&self) -> Result<Vec<NodeRef>, SyncError> {
        if !self.is_directory {
            return Ok(Vec::new());
        }
        Ok(list(&self.files, &self.path))
    }

    async fn content(&self) -> Result<String, SyncError> {
        self.files
            .get(&self.path)
            .cloned()
            .ok_or_else(|| SyncError::parse(self.path.clone(), "not a file"))
    }
}
