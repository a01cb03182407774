//! ConfigLoader facade delegating to merge service.

use super::merge::service::{LoadedConfig, MergeService};
use super::WorkspaceConfig;
use crate::error::SyncError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration discovered from `start` plus the environment.
    pub fn load(start: &Path) -> Result<LoadedConfig, SyncError> {
        MergeService::load(start)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> Result<LoadedConfig, SyncError> {
        MergeService::load_from_file(path)
    }

    /// Create default configuration.
    pub fn default() -> WorkspaceConfig {
        WorkspaceConfig::default()
    }
}
