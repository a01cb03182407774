//! Branch resolution of options and specific items.

use super::{GitBranches, SpecificItemsConfig, SyncOptions, WorkspaceConfig};
use crate::error::SyncError;
use tracing::{debug, info};

/// Options in effect for `branch`: top-level options with the branch
/// `overrides` merged over them.
pub fn effective_options(
    config: &WorkspaceConfig,
    branch: Option<&str>,
) -> Result<SyncOptions, SyncError> {
    let Some(branch) = branch else {
        debug!("No active branch, using top-level settings");
        return Ok(config.options.clone());
    };
    let overrides = config
        .git_branches
        .branches
        .get(branch)
        .and_then(|b| b.overrides.as_ref());
    let Some(overrides) = overrides else {
        debug!(branch, "No branch overrides found, using top-level settings");
        return Ok(config.options.clone());
    };

    let mut merged = serde_json::to_value(&config.options)
        .map_err(|e| SyncError::ConfigError(e.to_string()))?;
    if let serde_json::Value::Object(map) = &mut merged {
        for (key, value) in overrides {
            map.insert(key.clone(), value.clone());
        }
    }
    let options: SyncOptions = serde_json::from_value(merged).map_err(|e| {
        SyncError::ConfigError(format!("Invalid overrides for branch '{}': {}", branch, e))
    })?;
    info!(branch, "Applied settings for git branch");
    Ok(options)
}

/// Specific items for `branch`, merging `commonSpecificItems` first. `None`
/// when the branch is not configured.
pub fn specific_items_for_branch(
    git_branches: &GitBranches,
    branch: &str,
) -> Option<SpecificItemsConfig> {
    let branch_config = git_branches.branches.get(branch)?;
    let common = git_branches.common_specific_items.clone().unwrap_or_default();
    let own = branch_config.specific_items.clone().unwrap_or_default();

    Some(SpecificItemsConfig {
        variables: concat(common.variables, own.variables),
        resources: concat(common.resources, own.resources),
        triggers: concat(common.triggers, own.triggers),
        folders: concat(common.folders, own.folders),
        settings: match (common.settings, own.settings) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
        },
    })
}

fn concat(common: Option<Vec<String>>, own: Option<Vec<String>>) -> Option<Vec<String>> {
    match (common, own) {
        (None, None) => None,
        (a, b) => {
            let mut out = a.unwrap_or_default();
            out.extend(b.unwrap_or_default());
            Some(out)
        }
    }
}
