//! Artifacts touched by a change list whose derived state may need refreshing.

use super::diff::Change;
use crate::artifact::kind::{container_root, is_script_content, is_script_metadata, remove_script_extension};
use crate::types::FlatTree;

/// Scripts (by content file), flows, apps and raw apps (by container root,
/// e.g. `f/x.flow/`), each listed once in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    pub scripts: Vec<String>,
    pub flows: Vec<String>,
    pub apps: Vec<String>,
    pub raw_apps: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|existing| existing == item) {
        list.push(item.to_string());
    }
}

impl ChangeTracker {
    /// Track every added or edited path. `known` is the tree the changes
    /// were applied to; it resolves script descriptors to their content file.
    pub fn build(changes: &[Change], known: &FlatTree) -> Self {
        let mut tracker = ChangeTracker::default();
        for change in changes {
            if !change.is_deletion() {
                tracker.track(change.path(), known);
            }
        }
        tracker
    }

    pub fn track(&mut self, path: &str, known: &FlatTree) {
        if let Some(root) = container_root(path) {
            let list = if root.ends_with(".flow/") {
                &mut self.flows
            } else if root.ends_with(".raw_app/") {
                &mut self.raw_apps
            } else {
                &mut self.apps
            };
            push_unique(list, root);
            return;
        }
        if is_script_content(path) {
            push_unique(&mut self.scripts, path);
        } else if is_script_metadata(path) {
            let base = remove_script_extension(path);
            if let Some(content) = known
                .keys()
                .find(|k| is_script_content(k) && remove_script_extension(k) == base)
            {
                push_unique(&mut self.scripts, content);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty() && self.flows.is_empty() && self.apps.is_empty() && self.raw_apps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(path: &str) -> Change {
        Change::Added {
            path: path.to_string(),
            content: String::new(),
        }
    }

    #[test]
    fn test_tracks_each_artifact_once() {
        let mut known = FlatTree::new();
        known.insert("f/y.ts".to_string(), String::new());
        known.insert("f/y.script.yaml".to_string(), String::new());
        let changes = vec![
            added("f/x.py"),
            added("f/etl.flow/flow.yaml"),
            added("f/etl.flow/a.inline_script.py"),
            added("f/dash.raw_app/index.tsx"),
            added("f/board.app/app.yaml"),
            added("f/y.script.yaml"),
            added("f/y.ts"),
            Change::Deleted {
                path: "f/z.py".to_string(),
            },
            added("f/v.variable.yaml"),
        ];
        let tracker = ChangeTracker::build(&changes, &known);
        assert_eq!(tracker.scripts, vec!["f/x.py", "f/y.ts"]);
        assert_eq!(tracker.flows, vec!["f/etl.flow/"]);
        assert_eq!(tracker.raw_apps, vec!["f/dash.raw_app/"]);
        assert_eq!(tracker.apps, vec!["f/board.app/"]);
    }

    #[test]
    fn test_descriptor_without_content_is_ignored() {
        let tracker = ChangeTracker::build(&[added("f/q.script.yaml")], &FlatTree::new());
        assert!(tracker.is_empty());
    }
}
