//! Tree backed by a local directory.

use super::{join, NodeRef, VirtualNode};
use crate::artifact::document::{parse_document, render_yaml};
use crate::codebase::Codebases;
use crate::error::SyncError;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
struct LocalSource {
    dir: PathBuf,
    codebases: Arc<Codebases>,
    ignore_codebase_changes: bool,
}

/// A directory exposed as a virtual tree.
#[derive(Debug, Clone)]
pub struct LocalTree {
    source: Arc<LocalSource>,
}

impl LocalTree {
    pub fn new(dir: impl Into<PathBuf>, codebases: Arc<Codebases>, ignore_codebase_changes: bool) -> Self {
        LocalTree {
            source: Arc::new(LocalSource {
                dir: dir.into(),
                codebases,
                ignore_codebase_changes,
            }),
        }
    }

    /// A plain directory tree without codebase handling.
    pub fn plain(dir: impl Into<PathBuf>) -> Self {
        Self::new(dir, Arc::new(Codebases::default()), false)
    }

    pub fn dir(&self) -> &Path {
        &self.source.dir
    }

    pub fn root(&self) -> NodeRef {
        Box::new(LocalNode {
            source: Arc::clone(&self.source),
            path: String::new(),
            is_directory: true,
        })
    }
}

struct LocalNode {
    source: Arc<LocalSource>,
    path: String,
    is_directory: bool,
}

impl LocalNode {
    fn absolute(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            self.source.dir.clone()
        } else {
            self.source.dir.join(relative)
        }
    }

    /// Codebase-bound script descriptors carry the bundle digest and no lock.
    async fn with_codebase_digest(&self, content: String) -> Result<String, SyncError> {
        let Some(stem) = self.path.strip_suffix(".script.yaml") else {
            return Ok(content);
        };
        let ts_path = format!("{}.ts", stem);
        if self.source.codebases.is_empty() || !self.source.codebases.is_bound(&ts_path) {
            return Ok(content);
        }
        if tokio::fs::metadata(self.absolute(&ts_path)).await.is_err() {
            return Ok(content);
        }
        let mut doc = parse_document(&self.path, &content)?;
        let Some(map) = doc.as_object_mut() else {
            return Err(SyncError::parse(
                self.path.clone(),
                "expected a mapping in a script descriptor",
            ));
        };
        if self.source.ignore_codebase_changes {
            map.remove("codebase");
        } else if let Some(digest) = self.source.codebases.digest_for(&ts_path)? {
            map.insert("codebase".to_string(), Value::String(digest));
        }
        map.insert("lock".to_string(), Value::String(String::new()));
        render_yaml(&doc)
    }
}

#[async_trait]
impl VirtualNode for LocalNode {
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
        let dir = self.absolute(&self.path);
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| SyncError::io(&dir, e))?;
        let mut out: Vec<NodeRef> = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| SyncError::io(&dir, e))? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_directory = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta.is_dir(),
                Err(e) => {
                    tracing::debug!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            out.push(Box::new(LocalNode {
                source: Arc::clone(&self.source),
                path: join(&self.path, &name),
                is_directory,
            }));
        }
        out.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(out)
    }

    async fn content(&self) -> Result<String, SyncError> {
        let file = self.absolute(&self.path);
        let content = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| SyncError::io(&file, e))?;
        self.with_codebase_digest(content).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CodebaseConfig;
    use crate::tree::walk_files;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_walks_relative_forward_slash_paths() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "f/team/a.variable.yaml", "value: 1\n");
        write(dir.path(), "f/x.flow/flow.yaml", "summary: x\n");

        let tree = LocalTree::plain(dir.path());
        let mut paths: Vec<String> = walk_files(tree.root(), |_, _| false)
            .await
            .iter()
            .map(|e| e.path().to_string())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["f/team/a.variable.yaml", "f/x.flow/flow.yaml"]);
    }

    #[tokio::test]
    async fn test_codebase_digest_injected_into_descriptor() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "f/bundle.script.yaml", "summary: s\nlock: old\n");
        write(dir.path(), "f/bundle.ts", "export async function main() {}");
        write(dir.path(), "f/plain.script.yaml", "summary: p\nlock: keep\n");
        write(dir.path(), "f/plain.py", "def main(): pass");

        let codebases = Codebases::compile(
            dir.path(),
            &[CodebaseConfig {
                relative_path: "f".into(),
                includes: vec!["f/bundle.ts".into()],
                excludes: vec![],
            }],
        )
        .unwrap();
        let tree = LocalTree::new(dir.path(), Arc::new(codebases), false);
        let entries = walk_files(tree.root(), |_, _| false).await;

        let bundle = entries.iter().find(|e| e.path() == "f/bundle.script.yaml").unwrap();
        let doc = parse_document("x.yaml", &bundle.node.content().await.unwrap()).unwrap();
        assert_eq!(doc["lock"], Value::String(String::new()));
        assert_eq!(doc["codebase"].as_str().map(str::len), Some(64));

        let plain = entries.iter().find(|e| e.path() == "f/plain.script.yaml").unwrap();
        assert_eq!(plain.node.content().await.unwrap(), "summary: p\nlock: keep\n");
    }
}
