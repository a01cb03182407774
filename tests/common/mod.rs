//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::path::Path;
use tempfile::TempDir;
use wmsync::config::{SyncOptions, WorkspaceConfig};
use wmsync::context::{BranchInfo, SyncContext};
use wmsync::remote::MemoryRemote;

pub fn write(root: &Path, path: &str, content: &str) {
    let file = root.join(path);
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(file, content).unwrap();
}

pub fn read(root: &Path, path: &str) -> String {
    std::fs::read_to_string(root.join(path)).unwrap()
}

pub fn context(dir: &TempDir, options: SyncOptions) -> SyncContext {
    SyncContext::new(dir.path(), options, BranchInfo::default(), None).unwrap()
}

/// Context on `branch` inside a repository, configured by `yaml`.
pub fn branch_context(dir: &TempDir, yaml: &str, branch: &str) -> SyncContext {
    let config: WorkspaceConfig = serde_yaml::from_str(yaml).unwrap();
    let info = BranchInfo {
        name: Some(branch.to_string()),
        in_repository: true,
        overridden: false,
    };
    SyncContext::build(dir.path(), &config, info, |_| {}).unwrap()
}

/// A workspace with one of each common artifact shape.
pub fn demo_remote() -> MemoryRemote {
    MemoryRemote::new("demo")
        .with_entry("f/app/config.variable.json", r#"{"value": "one", "is_secret": false, "description": ""}"#)
        .with_entry("f/app/x.py", "def main():\n    return 1\n")
        .with_entry(
            "f/app/x.script.json",
            r#"{"summary": "x", "description": "", "schema": {}, "lock": "requests==2.31"}"#,
        )
        .with_entry(
            "f/app/etl.flow.json",
            r#"{"summary": "etl", "value": {"modules": [{"id": "a", "summary": "step", "value": {"type": "rawscript", "language": "python3", "content": "print(2)"}}]}}"#,
        )
}
