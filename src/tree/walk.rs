//! Depth-first traversal with ignore propagation.

use super::{NodeRef, VirtualNode};

/// A non-ignored file found while walking.
pub struct WalkEntry {
    pub node: NodeRef,
}

impl WalkEntry {
    pub fn path(&self) -> &str {
        self.node.path()
    }
}

fn is_pruned_directory(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    name == "node_modules" || name.starts_with('.')
}

/// Collect every file under `root` that `ignore` does not exclude.
///
/// Ignoring a directory ignores everything below it, so ignored directories
/// are not descended. `node_modules` and dot directories are never entered.
/// A failing child enumeration is logged and that subtree is skipped.
pub async fn walk_files<F>(root: NodeRef, ignore: F) -> Vec<WalkEntry>
where
    F: Fn(&str, bool) -> bool,
{
    let mut files = Vec::new();
    if ignore(root.path(), root.is_directory()) {
        return files;
    }
    if !root.is_directory() {
        files.push(WalkEntry { node: root });
        return files;
    }

    let mut stack: Vec<NodeRef> = vec![root];
    while let Some(dir) = stack.pop() {
        let children = match dir.children().await {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!(path = %dir.path(), error = %e, "Failed to list directory, skipping");
                continue;
            }
        };
        for child in children {
            let is_dir = child.is_directory();
            if is_dir && is_pruned_directory(child.path()) {
                continue;
            }
            if ignore(child.path(), is_dir) {
                continue;
            }
            if is_dir {
                stack.push(child);
            } else {
                files.push(WalkEntry { node: child });
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MemoryTree;
    use std::collections::BTreeMap;

    fn tree(paths: &[&str]) -> NodeRef {
        let files: BTreeMap<String, String> = paths
            .iter()
            .map(|p| (p.to_string(), String::new()))
            .collect();
        MemoryTree::new(files).root()
    }

    #[tokio::test]
    async fn test_walk_skips_pruned_and_ignored_directories() {
        let root = tree(&[
            "f/a.variable.yaml",
            "f/node_modules/x.ts",
            "f/.hidden/y.ts",
            "u/admin/b.ts",
            "tmp/c.ts",
        ]);
        let mut paths: Vec<String> = walk_files(root, |p, is_dir| is_dir && p == "tmp")
            .await
            .into_iter()
            .map(|e| e.path().to_string())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["f/a.variable.yaml", "u/admin/b.ts"]);
    }

    #[tokio::test]
    async fn test_walk_applies_file_predicate() {
        let root = tree(&["f/a.ts", "f/b.ts"]);
        let entries = walk_files(root, |p, _| p == "f/b.ts").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path(), "f/a.ts");
    }
}
