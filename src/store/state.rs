//! Materialized state of the last pull, kept under `.wmill/`.

use crate::error::SyncError;
use crate::tree::{LocalTree, NodeRef};
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".wmill";

/// Mirror of the remote as last applied locally.
#[derive(Debug, Clone)]
pub struct StateDir {
    dir: PathBuf,
}

impl StateDir {
    pub fn new(root: &Path) -> Self {
        StateDir {
            dir: root.join(STATE_DIR_NAME),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    /// The state as a virtual tree, `None` before the first stateful run.
    pub async fn tree(&self) -> Result<Option<NodeRef>, SyncError> {
        if !self.exists() {
            return Ok(None);
        }
        Ok(Some(LocalTree::plain(&self.dir).root()))
    }

    pub async fn read(&self, path: &str) -> Option<String> {
        tokio::fs::read_to_string(self.dir.join(path)).await.ok()
    }

    pub async fn write(&self, path: &str, content: &str) -> Result<(), SyncError> {
        write_file(&self.dir.join(path), content).await
    }

    pub async fn remove(&self, path: &str) -> Result<(), SyncError> {
        remove_file(&self.dir.join(path)).await
    }
}

/// Write a file, creating parent directories.
pub async fn write_file(path: &Path, content: &str) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// Remove a file. A file that is already gone counts as removed.
pub async fn remove_file(path: &Path) -> Result<(), SyncError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_read_remove() {
        let root = TempDir::new().unwrap();
        let state = StateDir::new(root.path());
        assert!(state.tree().await.unwrap().is_none());

        state.write("f/a.variable.yaml", "value: 1\n").await.unwrap();
        assert_eq!(state.read("f/a.variable.yaml").await.as_deref(), Some("value: 1\n"));
        assert!(state.tree().await.unwrap().is_some());

        state.remove("f/a.variable.yaml").await.unwrap();
        state.remove("f/a.variable.yaml").await.unwrap();
        assert!(state.read("f/a.variable.yaml").await.is_none());
    }
}
