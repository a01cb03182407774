//! Tree over the downloaded workspace archive.
//!
//! The archive stores every artifact as one JSON document. The tree exposes
//! them in the local layout: descriptors rendered in the configured format,
//! locks and resource files split into siblings, and flows, apps and raw
//! apps exploded into directories. Expansion happens when a directory is
//! listed and is deterministic for a given archive.

use super::memory::MemoryTree;
use super::{join, NodeRef, VirtualNode};
use crate::artifact::document::{render, DocumentFormat};
use crate::artifact::inline::{inline_ref, PathAssigner};
use crate::artifact::kind::is_workspace_dependency;
use crate::artifact::{app, flow, InlineFile};
use crate::config::DefaultTs;
use crate::error::SyncError;
use crate::types::FlatTree;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::sync::Arc;

/// How archive documents are rendered.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub format: DocumentFormat,
    pub default_ts: DefaultTs,
    /// Resource type name to file extension, for resources stored as files.
    pub resource_type_extensions: HashMap<String, String>,
    pub ignore_codebase_changes: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            format: DocumentFormat::Yaml,
            default_ts: DefaultTs::default(),
            resource_type_extensions: HashMap::new(),
            ignore_codebase_changes: false,
        }
    }
}

#[derive(Debug)]
struct ArchiveSource {
    entries: FlatTree,
    options: ArchiveOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Flow,
    App,
    RawApp,
}

impl ContainerKind {
    /// Container kind of an archive entry, with the entry stem.
    fn of_entry(entry: &str) -> Option<(ContainerKind, &str)> {
        if let Some(stem) = entry.strip_suffix(".raw_app.json") {
            return Some((ContainerKind::RawApp, stem));
        }
        if let Some(stem) = entry.strip_suffix(".app.json") {
            return Some((ContainerKind::App, stem));
        }
        entry
            .strip_suffix(".flow.json")
            .map(|stem| (ContainerKind::Flow, stem))
    }

    fn dir_suffix(&self) -> &'static str {
        match self {
            ContainerKind::Flow => ".flow",
            ContainerKind::App => ".app",
            ContainerKind::RawApp => ".raw_app",
        }
    }

    fn descriptor_name(&self) -> &'static str {
        match self {
            ContainerKind::Flow => "flow",
            ContainerKind::App => "app",
            ContainerKind::RawApp => "raw_app",
        }
    }
}

/// The remote workspace as a virtual tree.
#[derive(Debug, Clone)]
pub struct ArchiveTree {
    source: Arc<ArchiveSource>,
}

impl ArchiveTree {
    /// Read a tar archive. Entries that are not UTF-8 text are skipped.
    pub fn from_tar(bytes: &[u8], options: ArchiveOptions) -> Result<Self, SyncError> {
        let mut archive = tar::Archive::new(std::io::Cursor::new(bytes));
        let mut entries = FlatTree::new();
        let iter = archive
            .entries()
            .map_err(|e| SyncError::ArchiveError(e.to_string()))?;
        for entry in iter {
            let mut entry = entry.map_err(|e| SyncError::ArchiveError(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| SyncError::ArchiveError(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            let path = path.trim_start_matches("./").to_string();
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| SyncError::ArchiveError(format!("{}: {}", path, e)))?;
            match String::from_utf8(bytes) {
                Ok(text) => {
                    entries.insert(path, text);
                }
                Err(_) => tracing::warn!(%path, "Skipping non-text archive entry"),
            }
        }
        tracing::debug!(entries = entries.len(), "Loaded workspace archive");
        Ok(Self::from_entries(entries, options))
    }

    pub fn from_entries(entries: FlatTree, options: ArchiveOptions) -> Self {
        ArchiveTree {
            source: Arc::new(ArchiveSource { entries, options }),
        }
    }

    pub fn root(&self) -> NodeRef {
        Box::new(ArchiveNode {
            source: Arc::clone(&self.source),
            path: String::new(),
            shape: Shape::Directory,
        })
    }
}

enum Shape {
    /// A directory present in the archive.
    Directory,
    /// A flow, app or raw app document exploded on listing.
    Container { entry: String, kind: ContainerKind },
    /// An archive file rendered on read.
    Entry { entry: String },
    /// Content computed while listing the parent.
    Synthesized(String),
}

struct ArchiveNode {
    source: Arc<ArchiveSource>,
    path: String,
    shape: Shape,
}

impl ArchiveNode {
    fn node(&self, path: String, shape: Shape) -> NodeRef {
        Box::new(ArchiveNode {
            source: Arc::clone(&self.source),
            path,
            shape,
        })
    }

    fn options(&self) -> &ArchiveOptions {
        &self.source.options
    }

    fn local_path(&self, entry: &str) -> String {
        if is_workspace_dependency(entry) {
            return entry.to_string();
        }
        match self.options().format {
            DocumentFormat::Yaml => match entry.strip_suffix(".json") {
                Some(stem) => format!("{}.yaml", stem),
                None => entry.to_string(),
            },
            DocumentFormat::Json => entry.to_string(),
        }
    }

    fn entry_text(&self, entry: &str) -> Result<&str, SyncError> {
        self.source
            .entries
            .get(entry)
            .map(String::as_str)
            .ok_or_else(|| SyncError::ArchiveError(format!("missing entry {}", entry)))
    }

    fn entry_json(&self, entry: &str) -> Result<Value, SyncError> {
        serde_json::from_str(self.entry_text(entry)?).map_err(|e| SyncError::parse(entry, e))
    }

    /// Nodes produced by one archive file.
    fn expand_file(&self, entry: &str) -> Result<Vec<NodeRef>, SyncError> {
        if let Some((kind, stem)) = ContainerKind::of_entry(entry) {
            let dir = format!("{}{}", stem, kind.dir_suffix());
            return Ok(vec![self.node(
                dir,
                Shape::Container {
                    entry: entry.to_string(),
                    kind,
                },
            )]);
        }
        if let Some(stem) = entry.strip_suffix(".script.json") {
            return self.expand_script(entry, stem);
        }
        if let Some(stem) = entry.strip_suffix(".resource.json") {
            return self.expand_resource(entry, stem);
        }
        Ok(vec![self.node(
            self.local_path(entry),
            Shape::Entry {
                entry: entry.to_string(),
            },
        )])
    }

    fn expand_script(&self, entry: &str, stem: &str) -> Result<Vec<NodeRef>, SyncError> {
        let mut doc = self.entry_json(entry)?;
        let mut out = Vec::new();
        if let Some(map) = doc.as_object_mut() {
            let lock = map.get("lock").and_then(Value::as_str).map(str::to_string);
            let has_codebase = map.get("codebase").map(|c| !c.is_null()).unwrap_or(false);
            let lock_path = format!("{}.script.lock", stem);
            match lock {
                Some(lock) if !lock.is_empty() && !has_codebase => {
                    map.insert("lock".to_string(), Value::String(inline_ref(&lock_path)));
                    out.push(self.node(lock_path, Shape::Synthesized(lock)));
                }
                Some(lock) if lock.is_empty() => {}
                _ => {
                    map.remove("lock");
                }
            }
            if self.options().ignore_codebase_changes && has_codebase {
                map.remove("codebase");
            }
        }
        let descriptor = render(&doc, self.options().format)?;
        out.insert(0, self.node(self.local_path(entry), Shape::Synthesized(descriptor)));
        Ok(out)
    }

    fn expand_resource(&self, entry: &str, stem: &str) -> Result<Vec<NodeRef>, SyncError> {
        let mut doc = self.entry_json(entry)?;
        let extension = doc
            .get("resource_type")
            .and_then(Value::as_str)
            .and_then(|rt| self.options().resource_type_extensions.get(rt))
            .cloned();
        let mut out = Vec::new();
        if let Some(ext) = extension {
            let file_path = format!("{}.resource.file.{}", stem, ext);
            let content = doc
                .get_mut("value")
                .and_then(Value::as_object_mut)
                .and_then(|value| {
                    let content = value.get("content").and_then(Value::as_str)?.to_string();
                    value.insert("content".to_string(), Value::String(inline_ref(&file_path)));
                    Some(content)
                });
            if let Some(content) = content {
                out.push(self.node(file_path, Shape::Synthesized(content)));
            }
        }
        let descriptor = render(&doc, self.options().format)?;
        out.insert(0, self.node(self.local_path(entry), Shape::Synthesized(descriptor)));
        Ok(out)
    }

    /// Explode a container document into its directory contents.
    fn explode(&self, entry: &str, kind: ContainerKind) -> Result<Vec<NodeRef>, SyncError> {
        let mut doc = self.entry_json(entry)?;
        let mut assigner = PathAssigner::new(self.options().default_ts);
        let files: Vec<InlineFile> = match kind {
            ContainerKind::Flow => flow::extract_inline_scripts(&mut doc, &mut assigner),
            ContainerKind::App => match doc.get_mut("value") {
                Some(value) => app::extract_inline_scripts(value, &mut assigner),
                None => Vec::new(),
            },
            ContainerKind::RawApp => app::explode_raw_app(&mut doc, &mut assigner),
        };

        let mut contents = FlatTree::new();
        for file in files {
            contents.insert(join(&self.path, &file.path), file.content);
        }
        let descriptor = format!(
            "{}.{}",
            kind.descriptor_name(),
            self.options().format.extension()
        );
        contents.insert(
            join(&self.path, &descriptor),
            render(&doc, self.options().format)?,
        );
        Ok(MemoryTree::new(contents).children_of(&self.path))
    }

    fn list_directory(&self) -> Vec<NodeRef> {
        let prefix = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path)
        };
        let mut dirs = BTreeSet::new();
        let mut out = Vec::new();
        for key in self.source.entries.range(prefix.clone()..).map(|(k, _)| k) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    dirs.insert(dir.to_string());
                }
                None => match self.expand_file(key) {
                    Ok(nodes) => out.extend(nodes),
                    Err(e) => tracing::warn!(entry = %key, error = %e, "Skipping unreadable archive entry"),
                },
            }
        }
        for dir in dirs {
            out.push(self.node(join(&self.path, &dir), Shape::Directory));
        }
        out
    }
}

#[async_trait]
impl VirtualNode for ArchiveNode {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        matches!(self.shape, Shape::Directory | Shape::Container { .. })
    }

    async fn children(&self) -> Result<Vec<NodeRef>, SyncError> {
        match &self.shape {
            Shape::Directory => Ok(self.list_directory()),
            Shape::Container { entry, kind } => self.explode(entry, *kind),
            Shape::Entry { .. } | Shape::Synthesized(_) => Ok(Vec::new()),
        }
    }

    async fn content(&self) -> Result<String, SyncError> {
        match &self.shape {
            Shape::Synthesized(content) => Ok(content.clone()),
            Shape::Entry { entry } => {
                let text = self.entry_text(entry)?;
                if self.options().format == DocumentFormat::Yaml
                    && entry.ends_with(".json")
                    && !is_workspace_dependency(entry)
                {
                    let doc: Value =
                        serde_json::from_str(text).map_err(|e| SyncError::parse(entry.clone(), e))?;
                    render(&doc, DocumentFormat::Yaml)
                } else {
                    Ok(text.to_string())
                }
            }
            Shape::Directory | Shape::Container { .. } => Err(SyncError::ArchiveError(format!(
                "{} is a directory",
                self.path
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::document::parse_document;
    use crate::tree::walk_files;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn archive(entries: &[(&str, Value)], options: ArchiveOptions) -> ArchiveTree {
        let entries = entries
            .iter()
            .map(|(p, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (p.to_string(), text)
            })
            .collect();
        ArchiveTree::from_entries(entries, options)
    }

    async fn materialize(tree: &ArchiveTree) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for entry in walk_files(tree.root(), |_, _| false).await {
            out.insert(entry.path().to_string(), entry.node.content().await.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_script_lock_moves_to_sibling_file() {
        let tree = archive(
            &[
                ("f/a.script.json", json!({"summary": "a", "lock": "requests==2"})),
                ("f/a.py", json!("print(1)")),
                ("f/b.script.json", json!({"summary": "b", "lock": ""})),
                ("f/c.script.json", json!({"summary": "c", "lock": "x", "codebase": "abc"})),
            ],
            ArchiveOptions::default(),
        );
        let files = materialize(&tree).await;
        assert_eq!(files["f/a.script.lock"], "requests==2");
        assert_eq!(files["f/a.py"], "print(1)");
        let a = parse_document("f/a.script.yaml", &files["f/a.script.yaml"]).unwrap();
        assert_eq!(a["lock"], json!("!inline f/a.script.lock"));
        let b = parse_document("f/b.script.yaml", &files["f/b.script.yaml"]).unwrap();
        assert_eq!(b["lock"], json!(""));
        let c = parse_document("f/c.script.yaml", &files["f/c.script.yaml"]).unwrap();
        assert!(c.get("lock").is_none());
        assert_eq!(c["codebase"], json!("abc"));
        assert!(!files.contains_key("f/c.script.lock"));
    }

    #[tokio::test]
    async fn test_ignore_codebase_changes_drops_field() {
        let options = ArchiveOptions {
            ignore_codebase_changes: true,
            ..ArchiveOptions::default()
        };
        let tree = archive(&[("f/c.script.json", json!({"summary": "c", "codebase": "abc"}))], options);
        let files = materialize(&tree).await;
        let c = parse_document("f/c.script.yaml", &files["f/c.script.yaml"]).unwrap();
        assert!(c.get("codebase").is_none());
    }

    #[tokio::test]
    async fn test_resource_file_extracted_when_type_has_extension() {
        let mut extensions = HashMap::new();
        extensions.insert("ini_config".to_string(), "ini".to_string());
        let options = ArchiveOptions {
            resource_type_extensions: extensions,
            ..ArchiveOptions::default()
        };
        let tree = archive(
            &[
                ("f/cfg.resource.json", json!({"resource_type": "ini_config", "value": {"content": "[a]\nb=1"}})),
                ("f/db.resource.json", json!({"resource_type": "postgresql", "value": {"host": "h"}})),
            ],
            options,
        );
        let files = materialize(&tree).await;
        assert_eq!(files["f/cfg.resource.file.ini"], "[a]\nb=1");
        let cfg = parse_document("f/cfg.resource.yaml", &files["f/cfg.resource.yaml"]).unwrap();
        assert_eq!(cfg["value"]["content"], json!("!inline f/cfg.resource.file.ini"));
        assert!(files.contains_key("f/db.resource.yaml"));
        assert_eq!(files.len(), 3);
    }

    #[tokio::test]
    async fn test_flow_explodes_into_directory() {
        let tree = archive(
            &[(
                "f/etl.flow.json",
                json!({"summary": "etl", "value": {"modules": [
                    {"id": "a", "summary": "Extract", "value": {"type": "rawscript", "language": "python3", "content": "x = 1"}}
                ]}}),
            )],
            ArchiveOptions::default(),
        );
        let files = materialize(&tree).await;
        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["f/etl.flow/extract.inline_script.py", "f/etl.flow/flow.yaml"]);
        let flow = parse_document("f/etl.flow/flow.yaml", &files["f/etl.flow/flow.yaml"]).unwrap();
        assert_eq!(
            flow["value"]["modules"][0]["value"]["content"],
            json!("!inline extract.inline_script.py")
        );
    }

    #[tokio::test]
    async fn test_raw_app_nested_files_and_json_mode() {
        let options = ArchiveOptions {
            format: DocumentFormat::Json,
            ..ArchiveOptions::default()
        };
        let tree = archive(
            &[
                ("f/ui.raw_app.json", json!({"summary": "ui", "value": {"files": {"/src/index.tsx": "render()"}}})),
                ("f/v.variable.json", json!({"value": "1", "is_secret": false})),
            ],
            options,
        );
        let files = materialize(&tree).await;
        assert_eq!(files["f/ui.raw_app/src/index.tsx"], "render()");
        assert!(files.contains_key("f/ui.raw_app/raw_app.json"));
        assert!(files.contains_key("f/v.variable.json"));
    }

    #[tokio::test]
    async fn test_dependency_files_are_kept_verbatim() {
        let tree = archive(
            &[
                ("dependencies/package.json", json!("{\"dependencies\":{}}")),
                ("dependencies/requirements.in", json!("requests\n")),
            ],
            ArchiveOptions::default(),
        );
        let files = materialize(&tree).await;
        assert_eq!(files["dependencies/package.json"], "{\"dependencies\":{}}");
        assert_eq!(files["dependencies/requirements.in"], "requests\n");
        assert!(!files.contains_key("dependencies/package.yaml"));
    }

    #[tokio::test]
    async fn test_synthesis_is_deterministic() {
        let entries = [(
            "f/app.app.json",
            json!({"value": {"grid": [
                {"data": {"name": "q", "inlineScript": {"language": "bun", "content": "1"}}},
                {"data": {"name": "q", "inlineScript": {"language": "bun", "content": "2"}}}
            ]}}),
        )];
        let first = materialize(&archive(&entries, ArchiveOptions::default())).await;
        let second = materialize(&archive(&entries, ArchiveOptions::default())).await;
        assert_eq!(first, second);
        assert!(first.contains_key("f/app.app/q.inline_script.ts"));
        assert!(first.contains_key("f/app.app/q_1.inline_script.ts"));
    }

    #[test]
    fn test_reads_tar_bytes() {
        let mut builder = tar::Builder::new(Vec::new());
        let data = b"{\"value\": \"x\"}";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "f/v.variable.json", &data[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        let tree = ArchiveTree::from_tar(&bytes, ArchiveOptions::default()).unwrap();
        assert_eq!(tree.source.entries["f/v.variable.json"], "{\"value\": \"x\"}");
    }
}
