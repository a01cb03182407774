//! Flattening a virtual tree into a `base path -> content` map.

use crate::artifact::branch::{from_branch_specific_path, is_branch_specific_file, is_current_branch_file};
use crate::artifact::document::parse_document;
use crate::artifact::kind::{classify, is_resource_file, is_workspace_dependency, ArtifactKind};
use crate::artifact::{DocumentFormat, IgnoreRules, Skips, SpecificItems};
use crate::context::SyncContext;
use crate::tree::{walk_files, NodeRef};
use crate::types::FlatTree;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};

/// File extensions that can hold artifact content.
const CONTENT_EXTENSIONS: &[&str] = &[
    "json", "yaml", "go", "sh", "ts", "py", "sql", "gql", "ps1", "php", "js", "lock", "rs", "cs",
    "yml", "nu", "java",
];

/// Flattening parameters, borrowed from a [`SyncContext`].
#[derive(Debug, Clone, Copy)]
pub struct Flattener<'a> {
    pub ignore: &'a IgnoreRules,
    pub skips: &'a Skips,
    pub format: DocumentFormat,
    pub specific_items: Option<&'a SpecificItems>,
    pub branch: Option<&'a str>,
}

impl<'a> Flattener<'a> {
    pub fn new(ctx: &'a SyncContext) -> Self {
        Flattener {
            ignore: &ctx.ignore,
            skips: &ctx.skips,
            format: ctx.format,
            specific_items: ctx.specific_items.as_ref(),
            branch: ctx.active_branch(),
        }
    }

    /// Whether the path survives format, category and extension filters.
    fn accepts(&self, path: &str) -> bool {
        if is_workspace_dependency(path) {
            return true;
        }
        let resource_file = is_resource_file(path);
        if !resource_file {
            let foreign = match self.format {
                DocumentFormat::Json => ".yaml",
                DocumentFormat::Yaml => ".json",
            };
            if path.ends_with(foreign) {
                return false;
            }
        }
        if self.skips.skips(path) {
            return false;
        }
        let ext = path.rsplit('.').next().unwrap_or_default();
        resource_file || CONTENT_EXTENSIONS.contains(&ext)
    }

    fn is_secret_variable(&self, path: &str, content: &str) -> bool {
        if !self.skips.skip_secrets || !matches!(classify(path), Ok(ArtifactKind::Variable)) {
            return false;
        }
        match parse_document(path, content) {
            Ok(doc) => doc.get("is_secret").and_then(Value::as_bool).unwrap_or(false),
            Err(e) => {
                warn!(%path, error = %e, "Error reading variable to check for secrets");
                false
            }
        }
    }

    /// Walk `root` into a flat map keyed by base paths.
    ///
    /// Local snapshots (`is_remote == false`) resolve branch overrides: the
    /// active branch's file for a specific item is recorded under the base
    /// path, the base file itself and other branches' files are dropped.
    /// Remote snapshots only hold base files.
    pub async fn flatten(&self, root: NodeRef, is_remote: bool) -> FlatTree {
        let ignore = self.ignore;
        let entries = walk_files(root, |path, is_dir| ignore.is_ignored(path, is_dir)).await;

        let mut map = FlatTree::new();
        let mut overridden: HashSet<String> = HashSet::new();
        for entry in entries {
            let path = entry.path().to_string();
            if !self.accepts(&path) {
                continue;
            }

            let branch_items = if is_remote { None } else { self.specific_items };
            let target = match branch_items {
                Some(items) if is_branch_specific_file(&path) && items.is_item_type_configured(&path) => {
                    let Some(branch) = self.branch.filter(|b| is_current_branch_file(&path, b)) else {
                        debug!(%path, "Skipping branch-specific file of another branch");
                        continue;
                    };
                    let base = from_branch_specific_path(&path, branch);
                    if !items.is_specific_item(&base) {
                        debug!(%path, "Skipping branch-specific file not configured as a specific item");
                        continue;
                    }
                    overridden.insert(base.clone());
                    base
                }
                Some(items) if self.branch.is_some() && items.is_specific_item(&path) => {
                    debug!(%path, "Skipping base file superseded by branch-specific item");
                    continue;
                }
                _ => {
                    if overridden.contains(&path) {
                        continue;
                    }
                    path.clone()
                }
            };

            let content = match entry.node.content().await {
                Ok(content) => content,
                Err(e) => {
                    warn!(%path, error = %e, "Failed to read file, skipping");
                    continue;
                }
            };
            if self.is_secret_variable(&path, &content) {
                continue;
            }
            map.insert(target, content);
        }
        map
    }
}
