//! Diff engine
//!
//! Compares two flattened snapshots into an ordered change list. Structured
//! documents are compared on their parsed form, after removing fields that
//! are produced by generation rather than edited by users.

use crate::artifact::document::{parse_document, render, DocumentFormat};
use crate::artifact::kind::{is_script_metadata, try_classify, UNCLASSIFIED_PRECEDENCE};
use crate::codebase::Codebases;
use crate::types::FlatTree;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// One difference between two snapshots, always keyed by base path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Change {
    Added {
        path: String,
        content: String,
    },
    Deleted {
        path: String,
    },
    Edited {
        path: String,
        before: String,
        after: String,
        /// New codebase digest when the script's bundle changed.
        #[serde(skip_serializing_if = "Option::is_none")]
        codebase: Option<String>,
    },
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Added { path, .. } | Change::Deleted { path } | Change::Edited { path, .. } => path,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Change::Added { .. } => "added",
            Change::Deleted { .. } => "deleted",
            Change::Edited { .. } => "edited",
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Change::Deleted { .. })
    }

    pub fn codebase(&self) -> Option<&str> {
        match self {
            Change::Edited { codebase, .. } => codebase.as_deref(),
            _ => None,
        }
    }

    /// Sort key: kind precedence, then path.
    fn order_key(&self) -> (u8, &str) {
        (precedence_of(self.path()), self.path())
    }
}

/// Precedence of a path in the change order; unclassifiable paths go last.
pub fn precedence_of(path: &str) -> u8 {
    try_classify(path)
        .map(|k| k.precedence())
        .unwrap_or(UNCLASSIFIED_PRECEDENCE)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Suppress additions and edits of script descriptors.
    pub skip_scripts_metadata: bool,
    /// Keep script descriptors missing from the new side instead of deleting
    /// them; codebase-bound ones are checked against the current digest.
    pub ignore_metadata_deletion: bool,
    pub ignore_codebase_changes: bool,
}

fn is_app_descriptor(path: &str) -> bool {
    path.ends_with(".app/app.yaml")
        || path.ends_with(".app/app.json")
        || path.ends_with(".app.yaml")
        || path.ends_with(".app.json")
}

/// Parse a structured document and strip generated fields.
fn normalized(path: &str, text: &str) -> Option<Value> {
    let mut doc = parse_document(path, text).ok()?;
    if is_script_metadata(path) {
        if let Some(map) = doc.as_object_mut() {
            map.remove("lock");
            map.remove("is_template");
        }
    } else if is_app_descriptor(path) {
        if let Some(policy) = doc.get_mut("policy").and_then(Value::as_object_mut) {
            policy.remove("on_behalf_of");
            policy.remove("on_behalf_of_email");
        }
    }
    Some(doc)
}

fn is_structured(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".json")
}

fn format_of(path: &str) -> DocumentFormat {
    DocumentFormat::from_json_flag(path.ends_with(".json"))
}

/// Outcome of comparing one path present on both sides.
enum Comparison {
    Same,
    Different {
        before: String,
        after: String,
        codebase: Option<String>,
    },
}

fn compare(path: &str, after: &str, before: &str, ignore_codebase_changes: bool) -> Comparison {
    if after == before {
        return Comparison::Same;
    }
    let different = || Comparison::Different {
        before: before.to_string(),
        after: after.to_string(),
        codebase: None,
    };
    if !is_structured(path) {
        return different();
    }
    let (Some(mut old), Some(mut new)) = (normalized(path, before), normalized(path, after)) else {
        return different();
    };
    if old == new {
        return Comparison::Same;
    }
    if ignore_codebase_changes {
        return different();
    }

    let old_codebase = take_codebase(&mut old);
    let new_codebase = take_codebase(&mut new);
    if old_codebase.is_none() && new_codebase.is_none() {
        return different();
    }
    let codebase = match (&old_codebase, &new_codebase) {
        (old, Some(new)) if old.as_ref() != Some(new) => Some(new.clone()),
        _ => None,
    };
    let format = format_of(path);
    let before = if old_codebase.is_some() {
        strip_codebase_raw(path, before, format)
    } else {
        before.to_string()
    };
    let after = if new_codebase.is_some() {
        strip_codebase_raw(path, after, format)
    } else {
        after.to_string()
    };
    Comparison::Different {
        before,
        after,
        codebase,
    }
}

fn take_codebase(doc: &mut Value) -> Option<String> {
    doc.as_object_mut()
        .and_then(|m| m.remove("codebase"))
        .and_then(|v| v.as_str().map(str::to_string))
}

/// Raw form of a document without its `codebase` field.
fn strip_codebase_raw(path: &str, text: &str, format: DocumentFormat) -> String {
    let Ok(mut doc) = parse_document(path, text) else {
        return text.to_string();
    };
    if let Some(map) = doc.as_object_mut() {
        map.remove("codebase");
    }
    render(&doc, format).unwrap_or_else(|_| text.to_string())
}

fn codebase_of_descriptor(path: &str, text: &str) -> Option<String> {
    parse_document(path, text)
        .ok()?
        .get("codebase")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Changes turning `old` into `new`, sorted by kind precedence then path.
pub fn diff(new: &FlatTree, old: &FlatTree, options: &DiffOptions, codebases: &Codebases) -> Vec<Change> {
    let mut changes = Vec::new();

    for (path, after) in new {
        let skip_metadata = options.skip_scripts_metadata && is_script_metadata(path);
        match old.get(path) {
            None => {
                if !skip_metadata {
                    changes.push(Change::Added {
                        path: path.clone(),
                        content: after.clone(),
                    });
                }
            }
            Some(before) => match compare(path, after, before, options.ignore_codebase_changes) {
                Comparison::Same => {}
                Comparison::Different { .. } if skip_metadata => {}
                Comparison::Different {
                    before,
                    after,
                    codebase,
                } => changes.push(Change::Edited {
                    path: path.clone(),
                    before,
                    after,
                    codebase,
                }),
            },
        }
    }

    let mut remembered: BTreeMap<String, String> = BTreeMap::new();
    for (path, before) in old {
        if new.contains_key(path) {
            continue;
        }
        if !options.ignore_metadata_deletion || !is_script_metadata(path) {
            changes.push(Change::Deleted { path: path.clone() });
        } else if let Some(digest) = codebase_of_descriptor(path, before) {
            remembered.insert(path.clone(), digest);
        }
    }

    if !options.ignore_codebase_changes {
        let pending: HashSet<String> = changes.iter().map(|c| c.path().to_string()).collect();
        for (descriptor, tracked) in remembered {
            let Some(stem) = descriptor
                .strip_suffix(".script.yaml")
                .or_else(|| descriptor.strip_suffix(".script.json"))
            else {
                continue;
            };
            let ts_path = format!("{}.ts", stem);
            if pending.contains(&ts_path) {
                continue;
            }
            let current = match codebases.digest_for(&ts_path) {
                Ok(current) => current,
                Err(e) => {
                    warn!(path = %ts_path, error = %e, "Failed to compute codebase digest");
                    None
                }
            };
            if let Some(current) = current {
                if current != tracked {
                    changes.push(Change::Edited {
                        before: old.get(&ts_path).cloned().unwrap_or_default(),
                        after: new.get(&ts_path).cloned().unwrap_or_default(),
                        path: ts_path,
                        codebase: Some(current),
                    });
                }
            }
        }
    }

    sort_changes(&mut changes);
    changes
}

/// Stable sort by kind precedence, then path.
pub fn sort_changes(changes: &mut [Change]) {
    changes.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}
