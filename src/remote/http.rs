//! HTTP client for a Windmill-compatible API.

use super::{ArchiveRequest, RemoteWorkspace};
use crate::artifact::{ArtifactKind, TriggerKind};
use crate::error::SyncError;
use crate::regeneration::{scan_entrypoints, InferredSchema, MetadataGenerator};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Remote workspace reached over HTTP with a bearer token.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    workspace: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct LockResponse {
    lock: String,
}

impl HttpRemote {
    /// `base_url` is the instance root, e.g. `https://app.windmill.dev`.
    pub fn new(base_url: &str, workspace: &str, token: &str) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SyncError::remote(base_url, e))?;
        Ok(HttpRemote {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            workspace: workspace.to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}/api/w/{}/{}", self.base_url, self.workspace, route)
    }

    async fn send(
        &self,
        method: Method,
        route: &str,
        body: Option<&Value>,
        path: &str,
    ) -> Result<reqwest::Response, SyncError> {
        let url = self.url(route);
        debug!(%method, %url, "Remote request");
        let mut request = self.client.request(method, &url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| SyncError::remote(path, e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(SyncError::remote(path, format!("{}: {}", status, text.trim())))
    }
}

/// Route prefix of an artifact kind.
fn collection(kind: ArtifactKind) -> Result<String, SyncError> {
    let route = match kind {
        ArtifactKind::Script => "scripts",
        ArtifactKind::Flow => "flows",
        ArtifactKind::App => "apps",
        ArtifactKind::RawApp => "apps_raw",
        ArtifactKind::Resource => "resources",
        ArtifactKind::ResourceType => "resources/type",
        ArtifactKind::Variable => "variables",
        ArtifactKind::Folder => "folders",
        ArtifactKind::Schedule => "schedules",
        ArtifactKind::User => "users",
        ArtifactKind::Group => "groups",
        ArtifactKind::WorkspaceDependencies => "workspace_dependencies",
        ArtifactKind::Trigger(trigger) => return Ok(trigger_route(trigger)),
        ArtifactKind::Settings | ArtifactKind::EncryptionKey => {
            return Err(SyncError::remote(
                kind.label(),
                "workspace-level documents have no collection",
            ))
        }
    };
    Ok(route.to_string())
}

/// Bodies of path-addressed artifacts carry their path.
fn with_path(kind: ArtifactKind, path: &str, body: &Value) -> Value {
    let mut body = body.clone();
    let addressed = !matches!(
        kind,
        ArtifactKind::Settings | ArtifactKind::EncryptionKey | ArtifactKind::User | ArtifactKind::Group
    );
    if let (true, Some(map)) = (addressed, body.as_object_mut()) {
        let key = if kind == ArtifactKind::Folder { "name" } else { "path" };
        map.entry(key).or_insert_with(|| Value::String(path.to_string()));
    }
    body
}

fn trigger_route(trigger: TriggerKind) -> String {
    format!("{}s", trigger.token())
}

#[async_trait]
impl RemoteWorkspace for HttpRemote {
    fn workspace_id(&self) -> &str {
        &self.workspace
    }

    async fn download_archive(&self, request: &ArchiveRequest) -> Result<Vec<u8>, SyncError> {
        let url = self.url("workspaces/tarball");
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("archive_type", "tar".to_string()),
                ("plain_secret", request.plain_secrets.to_string()),
                ("skip_variables", request.skip_variables.to_string()),
                ("skip_resources", request.skip_resources.to_string()),
                ("skip_resource_types", request.skip_resource_types.to_string()),
                ("skip_secrets", request.skip_secrets.to_string()),
                ("include_schedules", request.include_schedules.to_string()),
                ("include_triggers", request.include_triggers.to_string()),
                ("include_users", request.include_users.to_string()),
                ("include_groups", request.include_groups.to_string()),
                ("include_settings", request.include_settings.to_string()),
                ("include_key", request.include_key.to_string()),
                ("default_ts", request.default_ts.language().to_string()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::ArchiveError(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::ArchiveError(format!(
                "download failed with status {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::ArchiveError(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn resource_type_extensions(&self) -> Result<HashMap<String, String>, SyncError> {
        let response = self
            .send(
                Method::GET,
                "resources/file_resource_type_to_file_ext_map",
                None,
                "resource types",
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| SyncError::remote("resource types", e))
    }

    async fn create(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError> {
        let route = match kind {
            ArtifactKind::Settings => "workspaces/edit_settings".to_string(),
            ArtifactKind::EncryptionKey => "workspaces/encryption_key".to_string(),
            ArtifactKind::User => "users/add".to_string(),
            _ => format!("{}/create", collection(kind)?),
        };
        self.send(Method::POST, &route, Some(&with_path(kind, path, body)), path)
            .await?;
        Ok(())
    }

    async fn update(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError> {
        let route = match kind {
            // New script versions are created on top of the previous one.
            ArtifactKind::Script => "scripts/create".to_string(),
            ArtifactKind::Settings => "workspaces/edit_settings".to_string(),
            ArtifactKind::EncryptionKey => "workspaces/encryption_key".to_string(),
            _ => format!("{}/update/{}", collection(kind)?, path),
        };
        self.send(Method::POST, &route, Some(&with_path(kind, path, body)), path)
            .await?;
        Ok(())
    }

    async fn delete(&self, kind: ArtifactKind, path: &str) -> Result<(), SyncError> {
        let route = format!("{}/delete/{}", collection(kind)?, path);
        match self.send(Method::DELETE, &route, None, path).await {
            Err(SyncError::Remote { message, .. }) if message.starts_with(StatusCode::NOT_FOUND.as_str()) => {
                debug!(%path, "Already deleted on remote");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn archive_script(&self, path: &str) -> Result<(), SyncError> {
        let route = format!("scripts/archive/p/{}", path);
        self.send(Method::POST, &route, Some(&json!({})), path).await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataGenerator for HttpRemote {
    async fn infer_schema(
        &self,
        content: &str,
        language: &str,
        current: Option<&Value>,
    ) -> Result<InferredSchema, SyncError> {
        Ok(scan_entrypoints(content, language, current))
    }

    async fn resolve_lock(
        &self,
        path: &str,
        content: &str,
        language: &str,
        dependencies: &str,
    ) -> Result<String, SyncError> {
        let body = json!({
            "raw_scripts": [{"raw_code": content, "path": path, "language": language}],
            "entrypoint": path,
            "raw_deps": dependencies,
        });
        let response = self
            .send(Method::POST, "jobs/run_wait_result/dependencies", Some(&body), path)
            .await?;
        let parsed: LockResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Regeneration {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        Ok(parsed.lock)
    }
}
