//! In-process remote workspace.
//!
//! Holds the workspace as archive entries (`f/x.script.json`, `f/x.py`,
//! `f/y.flow.json`, ...) and serves them back as a tar archive. Used for
//! offline runs and by the integration tests.

use super::{ArchiveRequest, RemoteWorkspace};
use crate::artifact::document::parse_document;
use crate::artifact::inline::language_extension;
use crate::artifact::kind::{is_script_content, remove_script_extension};
use crate::artifact::{classify, ArtifactKind};
use crate::config::DefaultTs;
use crate::error::SyncError;
use crate::types::FlatTree;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryRemote {
    workspace: String,
    default_ts: DefaultTs,
    entries: Mutex<FlatTree>,
    extensions: HashMap<String, String>,
    operations: Mutex<Vec<String>>,
    failing: HashSet<String>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryRemote {
    pub fn new(workspace: &str) -> Self {
        MemoryRemote {
            workspace: workspace.to_string(),
            ..Default::default()
        }
    }

    pub fn with_entries(mut self, entries: FlatTree) -> Self {
        self.entries = Mutex::new(entries);
        self
    }

    pub fn with_entry(self, path: &str, content: &str) -> Self {
        self.entries.lock().insert(path.to_string(), content.to_string());
        self
    }

    pub fn with_resource_type_extension(mut self, resource_type: &str, ext: &str) -> Self {
        self.extensions.insert(resource_type.to_string(), ext.to_string());
        self
    }

    /// Make every mutation of `path` fail.
    pub fn failing_on(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Delay every mutation, to observe concurrency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn entries(&self) -> FlatTree {
        self.entries.lock().clone()
    }

    /// Mutations in completion order, as `"<verb> <kind> <path>"`.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn entry_name(&self, kind: ArtifactKind, path: &str) -> String {
        match kind {
            ArtifactKind::Folder => format!("f/{}/folder.meta.json", path),
            ArtifactKind::User => format!("users/{}.user.json", path),
            ArtifactKind::Group => format!("groups/{}.group.json", path),
            ArtifactKind::Settings => "settings.json".to_string(),
            ArtifactKind::EncryptionKey => "encryption_key.json".to_string(),
            ArtifactKind::WorkspaceDependencies => path.to_string(),
            other => format!("{}.{}.json", path, other.label()),
        }
    }

    fn exists(&self, kind: ArtifactKind, path: &str) -> bool {
        self.entries.lock().contains_key(&self.entry_name(kind, path))
    }

    fn store(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError> {
        let mut entries = self.entries.lock();
        match kind {
            ArtifactKind::Script => {
                let mut meta = body.clone();
                let (content, language) = match meta.as_object_mut() {
                    Some(map) => (
                        map.remove("content").and_then(|v| v.as_str().map(str::to_string)),
                        map.remove("language").and_then(|v| v.as_str().map(str::to_string)),
                    ),
                    None => (None, None),
                };
                let content = content.ok_or_else(|| SyncError::remote(path, "script without content"))?;
                let ext = language_extension(language.as_deref().unwrap_or_default(), self.default_ts);
                entries.retain(|k, _| !is_script_entry(k, path));
                entries.insert(format!("{}.{}", path, ext), content);
                entries.insert(self.entry_name(kind, path), to_json(&meta)?);
            }
            ArtifactKind::WorkspaceDependencies => {
                let content = body
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                entries.insert(path.to_string(), content);
            }
            _ => {
                entries.insert(self.entry_name(kind, path), to_json(body)?);
            }
        }
        Ok(())
    }

    async fn mutate<F>(&self, verb: &str, kind: ArtifactKind, path: &str, f: F) -> Result<(), SyncError>
    where
        F: FnOnce() -> Result<(), SyncError>,
    {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let result = if self.failing.contains(path) {
            Err(SyncError::remote(path, "rejected by remote"))
        } else {
            f()
        };
        if result.is_ok() {
            self.operations.lock().push(format!("{} {} {}", verb, kind, path));
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn included(&self, entry: &str, content: &str, request: &ArchiveRequest) -> bool {
        let Ok(kind) = classify(entry) else {
            return true;
        };
        match kind {
            ArtifactKind::Variable if request.skip_variables => false,
            ArtifactKind::Variable if request.skip_secrets => !parse_document(entry, content)
                .ok()
                .and_then(|doc| doc.get("is_secret").and_then(Value::as_bool))
                .unwrap_or(false),
            ArtifactKind::Resource => !request.skip_resources,
            ArtifactKind::ResourceType => !request.skip_resource_types,
            ArtifactKind::Schedule => request.include_schedules,
            ArtifactKind::Trigger(_) => request.include_triggers,
            ArtifactKind::User => request.include_users,
            ArtifactKind::Group => request.include_groups,
            ArtifactKind::Settings => request.include_settings,
            ArtifactKind::EncryptionKey => request.include_key,
            _ => true,
        }
    }
}

/// Descriptor or content entry of the script at `path`.
fn is_script_entry(entry: &str, path: &str) -> bool {
    entry == format!("{}.script.json", path)
        || (is_script_content(entry) && remove_script_extension(entry) == path)
}

fn to_json(value: &Value) -> Result<String, SyncError> {
    serde_json::to_string_pretty(value).map_err(|e| SyncError::parse("<body>", e))
}

#[async_trait]
impl RemoteWorkspace for MemoryRemote {
    fn workspace_id(&self) -> &str {
        &self.workspace
    }

    async fn download_archive(&self, request: &ArchiveRequest) -> Result<Vec<u8>, SyncError> {
        let entries = self.entries();
        let mut builder = tar::Builder::new(Vec::new());
        for (path, content) in &entries {
            if !self.included(path, content, request) {
                continue;
            }
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            builder
                .append_data(&mut header, path, content.as_bytes())
                .map_err(|e| SyncError::ArchiveError(e.to_string()))?;
        }
        builder
            .into_inner()
            .map_err(|e| SyncError::ArchiveError(e.to_string()))
    }

    async fn resource_type_extensions(&self) -> Result<HashMap<String, String>, SyncError> {
        Ok(self.extensions.clone())
    }

    async fn create(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError> {
        self.mutate("create", kind, path, || {
            if self.exists(kind, path) {
                return Err(SyncError::remote(path, "already exists"));
            }
            self.store(kind, path, body)
        })
        .await
    }

    async fn update(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError> {
        self.mutate("update", kind, path, || self.store(kind, path, body))
            .await
    }

    async fn delete(&self, kind: ArtifactKind, path: &str) -> Result<(), SyncError> {
        self.mutate("delete", kind, path, || {
            self.entries.lock().remove(&self.entry_name(kind, path));
            Ok(())
        })
        .await
    }

    async fn archive_script(&self, path: &str) -> Result<(), SyncError> {
        self.mutate("archive", ArtifactKind::Script, path, || {
            self.entries.lock().retain(|k, _| !is_script_entry(k, path));
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{ArchiveOptions, ArchiveTree};
    use serde_json::json;

    #[tokio::test]
    async fn test_script_is_stored_as_descriptor_and_content() {
        let remote = MemoryRemote::new("demo");
        let body = json!({"path": "f/x", "summary": "", "language": "python3", "content": "print(1)"});
        remote.create(ArtifactKind::Script, "f/x", &body).await.unwrap();
        let entries = remote.entries();
        assert_eq!(entries.get("f/x.py").map(String::as_str), Some("print(1)"));
        assert!(entries.contains_key("f/x.script.json"));
        assert!(remote.create(ArtifactKind::Script, "f/x", &body).await.is_err());

        remote.archive_script("f/x").await.unwrap();
        assert!(remote.entries().is_empty());
        assert_eq!(remote.operations(), vec!["create script f/x", "archive script f/x"]);
    }

    #[tokio::test]
    async fn test_archive_honours_request_filters() {
        let remote = MemoryRemote::new("demo")
            .with_entry("f/a.variable.json", r#"{"value": "x", "is_secret": true}"#)
            .with_entry("f/b.variable.json", r#"{"value": "y", "is_secret": false}"#)
            .with_entry("f/c.schedule.json", r#"{"schedule": "* * * * *"}"#);
        let request = ArchiveRequest {
            skip_secrets: true,
            ..Default::default()
        };
        let tar = remote.download_archive(&request).await.unwrap();
        let tree = ArchiveTree::from_tar(&tar, ArchiveOptions::default()).unwrap();
        let root = tree.root();
        let f = root.children().await.unwrap().remove(0);
        let names: Vec<String> = f
            .children()
            .await
            .unwrap()
            .iter()
            .map(|n| n.path().to_string())
            .collect();
        assert_eq!(names, vec!["f/b.variable.yaml"]);
    }

    #[tokio::test]
    async fn test_failing_path_is_rejected() {
        let remote = MemoryRemote::new("demo").failing_on("f/v");
        let err = remote
            .update(ArtifactKind::Variable, "f/v", &json!({"value": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
        assert!(remote.operations().is_empty());
    }
}
