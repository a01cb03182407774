//! Remote workspace collaborator
//!
//! The engine only talks to the remote through [`RemoteWorkspace`]: one bulk
//! archive download for the compare phase, then per-artifact create, update
//! and delete calls during apply.

pub mod http;
pub mod memory;

use crate::artifact::ArtifactKind;
use crate::config::{DefaultTs, SyncOptions};
use crate::error::SyncError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// What the workspace archive should contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveRequest {
    pub plain_secrets: bool,
    pub skip_variables: bool,
    pub skip_resources: bool,
    pub skip_resource_types: bool,
    pub skip_secrets: bool,
    pub include_schedules: bool,
    pub include_triggers: bool,
    pub include_users: bool,
    pub include_groups: bool,
    pub include_settings: bool,
    pub include_key: bool,
    pub default_ts: DefaultTs,
}

impl From<&SyncOptions> for ArchiveRequest {
    fn from(options: &SyncOptions) -> Self {
        ArchiveRequest {
            plain_secrets: options.plain_secrets,
            skip_variables: options.skip_variables,
            skip_resources: options.skip_resources,
            skip_resource_types: options.skip_resource_types,
            skip_secrets: options.skip_secrets,
            include_schedules: options.include_schedules,
            include_triggers: options.include_triggers,
            include_users: options.include_users,
            include_groups: options.include_groups,
            include_settings: options.include_settings,
            include_key: options.include_key,
            default_ts: options.default_ts,
        }
    }
}

/// CRUD access to one remote workspace.
///
/// `path` is always the artifact's remote path (`f/x`, a folder name, a user
/// email), never a local file path.
#[async_trait]
pub trait RemoteWorkspace: Send + Sync {
    fn workspace_id(&self) -> &str;

    /// The current workspace as a tar archive of JSON documents.
    async fn download_archive(&self, request: &ArchiveRequest) -> Result<Vec<u8>, SyncError>;

    /// Resource types whose resources are stored as files, mapped to the
    /// file extension.
    async fn resource_type_extensions(&self) -> Result<HashMap<String, String>, SyncError>;

    async fn create(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError>;

    async fn update(&self, kind: ArtifactKind, path: &str, body: &Value) -> Result<(), SyncError>;

    /// Hard deletion.
    async fn delete(&self, kind: ArtifactKind, path: &str) -> Result<(), SyncError>;

    /// Scripts are versioned and archived rather than deleted.
    async fn archive_script(&self, path: &str) -> Result<(), SyncError>;
}
