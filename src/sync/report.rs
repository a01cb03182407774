//! Change listings for the terminal and for `--json-output`.

use super::apply::ApplySummary;
use super::diff::Change;
use crate::artifact::kind::try_classify;
use crate::error::SyncError;
use crate::types::Direction;
use owo_colors::OwoColorize;
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

fn kind_label(path: &str) -> &'static str {
    try_classify(path).map(|k| k.label()).unwrap_or("file")
}

/// One line per change: `+ kind path`, `~ kind path`, `- kind path`.
/// Edits are followed by a line diff when `with_diff` is set.
pub fn format_changes(changes: &[Change], with_diff: bool) -> String {
    let mut out = String::new();
    for change in changes {
        let kind = kind_label(change.path());
        match change {
            Change::Added { path, .. } => {
                out.push_str(&format!("{}\n", format!("+ {} {}", kind, path).green()));
            }
            Change::Deleted { path } => {
                out.push_str(&format!("{}\n", format!("- {} {}", kind, path).red()));
            }
            Change::Edited {
                path,
                before,
                after,
                codebase,
            } => {
                let suffix = if codebase.is_some() { " (codebase changed)" } else { "" };
                out.push_str(&format!("{}\n", format!("~ {} {}{}", kind, path, suffix).yellow()));
                if with_diff && before != after {
                    out.push_str(&format_text_diff(before, after));
                }
            }
        }
    }
    out
}

/// Line diff of two texts, changed lines only.
pub fn format_text_diff(before: &str, after: &str) -> String {
    let mut out = String::new();
    for change in TextDiff::from_lines(before, after).iter_all_changes() {
        let line = change.value().trim_end_matches('\n');
        match change.tag() {
            ChangeTag::Delete => out.push_str(&format!("{}\n", format!("  - {}", line).red())),
            ChangeTag::Insert => out.push_str(&format!("{}\n", format!("  + {}", line).green())),
            ChangeTag::Equal => {}
        }
    }
    out
}

#[derive(Debug, Serialize)]
struct ChangeEntry<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    codebase_changed: Option<bool>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    changes: Vec<ChangeEntry<'a>>,
    total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a ApplySummary>,
}

/// The machine-readable report of a run.
pub fn json_report(changes: &[Change], message: Option<&str>, summary: Option<&ApplySummary>) -> String {
    let report = JsonReport {
        success: summary.map(ApplySummary::is_success).unwrap_or(true),
        message,
        changes: changes
            .iter()
            .map(|change| ChangeEntry {
                kind: change.label(),
                path: change.path(),
                codebase_changed: change.codebase().map(|_| true),
            })
            .collect(),
        total: changes.len(),
        duration_ms: summary.map(|s| s.duration_ms),
        summary: summary.filter(|s| !s.is_success()),
    };
    serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{\"success\": false}".to_string())
}

/// Outcome of one pull or push.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub direction: Direction,
    pub changes: Vec<Change>,
    /// Absent when nothing was applied: no changes, dry run or cancelled.
    pub summary: Option<ApplySummary>,
    pub message: Option<String>,
    /// Artifacts whose derived state is out of date.
    pub stale: Vec<String>,
}

impl SyncReport {
    pub fn unapplied(direction: Direction, changes: Vec<Change>, message: &str) -> Self {
        SyncReport {
            direction,
            changes,
            summary: None,
            message: Some(message.to_string()),
            stale: Vec::new(),
        }
    }

    pub fn check(&self) -> Result<(), SyncError> {
        self.summary.as_ref().map(ApplySummary::check).unwrap_or(Ok(()))
    }

    pub fn render(&self, json: bool, with_diff: bool) -> String {
        if json {
            return json_report(&self.changes, self.message.as_deref(), self.summary.as_ref());
        }
        let mut out = String::new();
        if !self.changes.is_empty() {
            out.push_str(&format_changes(&self.changes, with_diff));
        }
        out.push_str(&self.render_outcome());
        out
    }

    /// Everything but the change listing, for when it was already shown.
    pub fn render_outcome(&self) -> String {
        let mut out = String::new();
        if let Some(message) = &self.message {
            out.push_str(message);
            out.push('\n');
        }
        if !self.stale.is_empty() {
            out.push_str(&format!(
                "{}\n",
                format!("Stale derived state, run generate-metadata: {}", self.stale.join(", ")).yellow()
            ));
        }
        if let Some(summary) = &self.summary {
            out.push_str(&format!(
                "{}: applied {} of {} changes in {}ms\n",
                self.direction.as_str(),
                summary.applied.len(),
                self.changes.len(),
                summary.duration_ms
            ));
            for conflict in &summary.conflicts {
                out.push_str(&format!("{}\n", format!("! conflict {}", conflict.path).red()));
            }
            for failure in &summary.failures {
                out.push_str(&format!(
                    "{}\n",
                    format!("! failed {}: {}", failure.group, failure.error).red()
                ));
            }
        }
        out
    }
}
