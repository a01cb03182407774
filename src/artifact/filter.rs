//! Path participation rules.
//!
//! `IgnoreRules` decides which paths are considered at all (roots, globs and
//! force-include toggles). `Skips` holds the category toggles applied while
//! flattening.

use super::kind::{classify, is_workspace_dependency, ArtifactKind};
use crate::config::SyncOptions;
use crate::error::SyncError;
use crate::glob::GlobList;

/// Roots under which artifacts live.
const ARTIFACT_ROOTS: &[&str] = &["u/", "f/", "g/", "users/", "groups/", "dependencies/"];

/// Paths never ignored on their own.
pub fn is_whitelisted(path: &str) -> bool {
    matches!(
        path,
        "" | "./" | "." | "u" | "f" | "g" | "users" | "groups" | "dependencies"
    )
}

fn under_artifact_root(path: &str) -> bool {
    ARTIFACT_ROOTS.iter().any(|root| path.starts_with(root))
}

/// Whether the path cannot be an artifact: outside the artifact roots, or
/// unclassifiable. Resource types, settings and the encryption key are only
/// valid at the top level.
pub fn is_not_artifact_file(path: &str, is_directory: bool) -> bool {
    if path.ends_with('/') {
        return false;
    }
    if is_directory {
        return !under_artifact_root(path);
    }
    match classify(path) {
        Ok(ArtifactKind::ResourceType | ArtifactKind::Settings | ArtifactKind::EncryptionKey) => {
            path.contains('/')
        }
        Ok(_) => !under_artifact_root(path),
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Default)]
struct Whitelist {
    includes: GlobList,
    excludes: GlobList,
    extra_includes: GlobList,
}

impl Whitelist {
    fn approve(&self, path: &str) -> bool {
        (self.includes.is_empty() || self.includes.matches_any(path))
            && !self.excludes.matches_any(path)
            && (self.extra_includes.is_empty() || self.extra_includes.matches_any(path))
    }
}

/// Compiled ignore predicate.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    whitelist: Option<Whitelist>,
    json: bool,
    skip_resource_types: bool,
    skip_workspace_dependencies: bool,
    include_users: bool,
    include_groups: bool,
    include_settings: bool,
    include_key: bool,
}

impl IgnoreRules {
    pub fn new(options: &SyncOptions) -> Result<Self, SyncError> {
        let whitelist = if !options.includes.is_empty() || !options.excludes.is_empty() {
            Some(Whitelist {
                includes: GlobList::compile(&options.includes)?,
                excludes: GlobList::compile(&options.excludes)?,
                extra_includes: GlobList::compile(&options.extra_includes)?,
            })
        } else {
            None
        };
        Ok(IgnoreRules {
            whitelist,
            json: options.json,
            skip_resource_types: options.skip_resource_types,
            skip_workspace_dependencies: options.skip_workspace_dependencies,
            include_users: options.include_users,
            include_groups: options.include_groups,
            include_settings: options.include_settings,
            include_key: options.include_key,
        })
    }

    /// Whether `path` is excluded from synchronization.
    pub fn is_ignored(&self, path: &str, is_directory: bool) -> bool {
        if !is_directory {
            let ext = if self.json { ".json" } else { ".yaml" };
            if path.ends_with(&format!(".resource-type{}", ext)) {
                return self.skip_resource_types;
            }
            if is_workspace_dependency(path) {
                return self.skip_workspace_dependencies;
            }
            match classify(path) {
                Ok(ArtifactKind::User) if self.include_users => return false,
                Ok(ArtifactKind::Group) if self.include_groups => return false,
                Ok(ArtifactKind::Settings) if self.include_settings => return false,
                Ok(ArtifactKind::EncryptionKey) if self.include_key => return false,
                _ => {}
            }
        }

        !is_whitelisted(path)
            && (is_not_artifact_file(path, is_directory)
                || (!is_directory
                    && self
                        .whitelist
                        .as_ref()
                        .map(|w| !w.approve(path))
                        .unwrap_or(false)))
    }
}

/// Category toggles applied while flattening.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Skips {
    pub skip_variables: bool,
    pub skip_resources: bool,
    pub skip_resource_types: bool,
    pub skip_secrets: bool,
    pub skip_scripts: bool,
    pub skip_flows: bool,
    pub skip_apps: bool,
    pub skip_folders: bool,
    pub skip_scripts_metadata: bool,
    pub include_schedules: bool,
    pub include_triggers: bool,
    pub include_users: bool,
    pub include_groups: bool,
    pub include_settings: bool,
    pub include_key: bool,
}

impl From<&SyncOptions> for Skips {
    fn from(o: &SyncOptions) -> Self {
        Skips {
            skip_variables: o.skip_variables,
            skip_resources: o.skip_resources,
            skip_resource_types: o.skip_resource_types,
            skip_secrets: o.skip_secrets,
            skip_scripts: o.skip_scripts,
            skip_flows: o.skip_flows,
            skip_apps: o.skip_apps,
            skip_folders: o.skip_folders,
            skip_scripts_metadata: o.skip_scripts_metadata,
            include_schedules: o.include_schedules,
            include_triggers: o.include_triggers,
            include_users: o.include_users,
            include_groups: o.include_groups,
            include_settings: o.include_settings,
            include_key: o.include_key,
        }
    }
}

impl Skips {
    /// Whether a category toggle drops the path.
    pub fn skips(&self, path: &str) -> bool {
        let Ok(kind) = classify(path) else {
            return false;
        };
        match kind {
            ArtifactKind::Schedule => !self.include_schedules,
            ArtifactKind::Trigger(_) => !self.include_triggers,
            ArtifactKind::User => !self.include_users,
            ArtifactKind::Group => !self.include_groups,
            ArtifactKind::Settings => !self.include_settings,
            ArtifactKind::EncryptionKey => !self.include_key,
            ArtifactKind::Resource => self.skip_resources,
            ArtifactKind::ResourceType => self.skip_resource_types,
            ArtifactKind::Variable => self.skip_variables,
            ArtifactKind::Script => self.skip_scripts,
            ArtifactKind::Flow => self.skip_flows,
            ArtifactKind::App | ArtifactKind::RawApp => self.skip_apps,
            ArtifactKind::Folder => self.skip_folders,
            ArtifactKind::WorkspaceDependencies => false,
        }
    }
}
