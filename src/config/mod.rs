//! Workspace configuration.
//!
//! The workspace document (`wmill.yaml`) is layered under built-in defaults and
//! `WMSYNC__*` environment overrides, then resolved per active branch.

pub mod branches;
pub mod facade;
pub mod merge;
pub mod sources;

pub use branches::{effective_options, specific_items_for_branch};
pub use facade::ConfigLoader;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of the workspace configuration document.
pub const CONFIG_FILE_NAME: &str = "wmill.yaml";

/// Obsolete ignore file; its presence is a configuration error.
pub const LEGACY_IGNORE_FILE: &str = ".wmillignore";

fn default_includes() -> Vec<String> {
    vec!["f/**".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_parallel() -> usize {
    1
}

/// Runtime used for plain `.ts` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultTs {
    #[default]
    Bun,
    Deno,
}

impl DefaultTs {
    pub fn language(&self) -> &'static str {
        match self {
            DefaultTs::Bun => "bun",
            DefaultTs::Deno => "deno",
        }
    }
}

/// A bundled group of TypeScript scripts identified by a content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CodebaseConfig {
    /// Directory holding the bundle sources, relative to the workspace root.
    pub relative_path: String,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

/// Per-branch item overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SpecificItemsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Vec<String>>,
    /// Matched against folder directory paths such as `f/env_staging`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folders: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<bool>,
}

/// Configuration of one git branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BranchConfig {
    /// Partial options merged over the top-level ones for this branch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specific_items: Option<SpecificItemsConfig>,
}

/// The `gitBranches` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GitBranches {
    #[serde(
        rename = "commonSpecificItems",
        skip_serializing_if = "Option::is_none"
    )]
    pub common_specific_items: Option<SpecificItemsConfig>,
    #[serde(flatten)]
    pub branches: BTreeMap<String, BranchConfig>,
}

impl GitBranches {
    pub fn is_empty(&self) -> bool {
        self.common_specific_items.is_none() && self.branches.is_empty()
    }
}

/// Sync toggles. Every field can be overridden per branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    #[serde(default = "default_includes")]
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub extra_includes: Vec<String>,
    pub skip_variables: bool,
    pub skip_resources: bool,
    pub skip_resource_types: bool,
    #[serde(default = "default_true")]
    pub skip_secrets: bool,
    pub skip_scripts: bool,
    pub skip_flows: bool,
    pub skip_apps: bool,
    pub skip_folders: bool,
    pub skip_workspace_dependencies: bool,
    pub skip_scripts_metadata: bool,
    pub include_schedules: bool,
    pub include_triggers: bool,
    pub include_users: bool,
    pub include_groups: bool,
    pub include_settings: bool,
    pub include_key: bool,
    pub default_ts: DefaultTs,
    pub codebases: Vec<CodebaseConfig>,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Keep descriptors as JSON instead of YAML.
    pub json: bool,
    pub plain_secrets: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub lint: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            includes: default_includes(),
            excludes: Vec::new(),
            extra_includes: Vec::new(),
            skip_variables: false,
            skip_resources: false,
            skip_resource_types: false,
            skip_secrets: default_true(),
            skip_scripts: false,
            skip_flows: false,
            skip_apps: false,
            skip_folders: false,
            skip_workspace_dependencies: false,
            skip_scripts_metadata: false,
            include_schedules: false,
            include_triggers: false,
            include_users: false,
            include_groups: false,
            include_settings: false,
            include_key: false,
            default_ts: DefaultTs::default(),
            codebases: Vec::new(),
            parallel: default_parallel(),
            json: false,
            plain_secrets: false,
            message: None,
            lint: false,
        }
    }
}

/// The full workspace configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(flatten)]
    pub options: SyncOptions,
    #[serde(rename = "gitBranches", skip_serializing_if = "GitBranches::is_empty")]
    pub git_branches: GitBranches,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.includes, vec!["f/**".to_string()]);
        assert!(options.skip_secrets);
        assert_eq!(options.parallel, 1);
        assert_eq!(options.default_ts, DefaultTs::Bun);
    }

    #[test]
    fn test_parse_workspace_document() {
        let yaml = r#"
includes:
  - f/**
  - g/**
skipSecrets: false
defaultTs: deno
gitBranches:
  commonSpecificItems:
    triggers: ["f/webhooks/**"]
  main:
    overrides:
      includeSchedules: true
    specificItems:
      variables: ["f/**"]
"#;
        let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.options.includes.len(), 2);
        assert!(!config.options.skip_secrets);
        assert_eq!(config.options.default_ts, DefaultTs::Deno);
        let main = config.git_branches.branches.get("main").unwrap();
        assert_eq!(
            main.specific_items.as_ref().unwrap().variables,
            Some(vec!["f/**".to_string()])
        );
        assert_eq!(
            config
                .git_branches
                .common_specific_items
                .as_ref()
                .unwrap()
                .triggers,
            Some(vec!["f/webhooks/**".to_string()])
        );
    }
}
