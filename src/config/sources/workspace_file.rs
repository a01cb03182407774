//! Workspace document source: discovery, parsing and format migrations.

use crate::config::{CONFIG_FILE_NAME, LEGACY_IGNORE_FILE};
use crate::error::SyncError;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Find `wmill.yaml` walking up from `start`, stopping at the git root.
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if current.join(".git").exists() {
            return None;
        }
        dir = current.parent();
    }
    None
}

/// Fail on the obsolete ignore file.
pub fn reject_legacy_ignore(root: &Path) -> Result<(), SyncError> {
    if root.join(LEGACY_IGNORE_FILE).exists() {
        return Err(SyncError::ConfigError(format!(
            "{} is not supported anymore, switch to {}",
            LEGACY_IGNORE_FILE, CONFIG_FILE_NAME
        )));
    }
    Ok(())
}

/// Read and migrate the document at `path`. Migrated documents are written
/// back in their new shape.
pub fn load(path: &Path) -> Result<Value, SyncError> {
    let text = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let mut doc = parse(&text).map_err(|e| SyncError::ConfigError(format!("{}: {}", path.display(), e)))?;

    if migrate(&mut doc)? {
        let rendered = serde_yaml::to_string(&doc)
            .map_err(|e| SyncError::ConfigError(e.to_string()))?;
        std::fs::write(path, rendered).map_err(|e| SyncError::io(path, e))?;
        info!(path = %path.display(), "Migrated workspace configuration");
    }
    Ok(doc)
}

fn parse(text: &str) -> Result<Value, serde_yaml::Error> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    let value: Value = serde_yaml::from_str(text)?;
    Ok(match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    })
}

/// Apply legacy format migrations. Returns whether the document changed.
pub fn migrate(doc: &mut Value) -> Result<bool, SyncError> {
    let Value::Object(map) = doc else {
        return Err(SyncError::ConfigError(
            "workspace configuration must be a mapping".to_string(),
        ));
    };
    let mut changed = false;

    if let Some(overrides) = map.get("overrides") {
        let empty = match overrides {
            Value::Null => true,
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if !empty {
            return Err(SyncError::ConfigError(
                "the top-level 'overrides' format is obsolete; move branch settings under \
                 gitBranches.<branch>.overrides"
                    .to_string(),
            ));
        }
        info!("Removing empty obsolete 'overrides' section");
        map.remove("overrides");
        changed = true;
    }

    if let Some(legacy) = map.remove("git_branches") {
        if map.contains_key("gitBranches") {
            warn!("Both 'git_branches' and 'gitBranches' found, ignoring 'git_branches'");
        } else {
            warn!("Migrating 'git_branches' to 'gitBranches', the snake_case key is deprecated");
            map.insert("gitBranches".to_string(), legacy);
        }
        changed = true;
    }

    Ok(changed)
}
