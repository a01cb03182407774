//! MergeService: orchestrates sources, applies merge policy, deserializes to WorkspaceConfig.

use crate::config::sources::{environment, workspace_file};
use crate::config::WorkspaceConfig;
use crate::error::SyncError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Result of loading: the document location (if any) and the merged config.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub file: Option<PathBuf>,
    pub config: WorkspaceConfig,
}

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Load config starting discovery at `start`.
    /// Precedence: defaults (lowest) -> workspace document -> environment (highest).
    pub fn load(start: &Path) -> Result<LoadedConfig, SyncError> {
        let file = workspace_file::discover(start);
        let root = file
            .as_ref()
            .and_then(|f| f.parent())
            .unwrap_or(start);
        workspace_file::reject_legacy_ignore(root)?;

        let document = match &file {
            Some(path) => {
                debug!(path = %path.display(), "Loading workspace configuration");
                Some(workspace_file::load(path)?)
            }
            None => None,
        };
        let config = Self::compose(document)?;
        Ok(LoadedConfig { file, config })
    }

    /// Load config from a specific file with environment overlay.
    pub fn load_from_file(path: &Path) -> Result<LoadedConfig, SyncError> {
        let document = workspace_file::load(path)?;
        let config = Self::compose(Some(document))?;
        Ok(LoadedConfig {
            file: Some(path.to_path_buf()),
            config,
        })
    }

    fn compose(document: Option<Value>) -> Result<WorkspaceConfig, SyncError> {
        let defaults = serde_json::to_value(WorkspaceConfig::default())
            .map_err(|e| SyncError::ConfigError(e.to_string()))?;
        let known_keys: Vec<String> = match &defaults {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };

        let mut merged = defaults;
        if let Some(document) = document {
            merge_values(&mut merged, document);
        }
        environment::overlay(&mut merged, &known_keys)?;

        serde_json::from_value(merged)
            .map_err(|e| SyncError::ConfigError(format!("Invalid workspace configuration: {}", e)))
    }
}

/// Deep merge: objects merge key by key, anything else is replaced.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
