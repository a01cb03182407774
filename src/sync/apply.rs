//! Apply orchestrator
//!
//! Changes are grouped per artifact and groups are applied through the
//! worker pool. Changes inside one group run in order; groups run
//! concurrently up to the configured parallelism. A failing group is recorded
//! and never stops the others.

use super::conflict::Conflict;
use super::diff::Change;
use crate::artifact::kind::{container_root, group_key};
use crate::concurrency::WorkerPool;
use crate::error::SyncError;
use crate::types::Direction;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, error, info};

/// Split changes into per-artifact groups, keeping first-appearance order.
///
/// A raw app is applied as one unit: its group is reduced to the deletion of
/// its descriptor when there is one, otherwise to its first change.
pub fn group_changes(changes: Vec<Change>) -> Vec<Vec<Change>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<Change>> = Vec::new();
    for change in changes {
        let key = group_key(change.path()).to_string();
        match index.get(&key) {
            Some(&idx) => groups[idx].push(change),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![change]);
            }
        }
    }
    groups.into_iter().map(reduce_raw_app_group).collect()
}

fn is_raw_app_path(path: &str) -> bool {
    container_root(path).map(|r| r.ends_with(".raw_app/")).unwrap_or(false)
}

fn is_raw_app_descriptor(path: &str) -> bool {
    path.ends_with(".raw_app/raw_app.yaml") || path.ends_with(".raw_app/raw_app.json")
}

fn reduce_raw_app_group(mut group: Vec<Change>) -> Vec<Change> {
    let touches_raw_app = group.first().map(|c| is_raw_app_path(c.path())).unwrap_or(false);
    if !touches_raw_app || group.len() == 1 {
        return group;
    }
    let deletion = group
        .iter()
        .position(|c| c.is_deletion() && is_raw_app_descriptor(c.path()));
    let keep = deletion.unwrap_or(0);
    vec![group.swap_remove(keep)]
}

/// Append-only record of what a run did, shared by all groups.
#[derive(Debug, Default)]
pub struct ApplyLog {
    applied: Mutex<Vec<String>>,
    conflicts: Mutex<Vec<Conflict>>,
}

impl ApplyLog {
    pub fn applied(&self, path: &str) {
        self.applied.lock().push(path.to_string());
    }

    pub fn conflict(&self, conflict: Conflict) {
        self.conflicts.lock().push(conflict);
    }
}

/// Applies one group of changes to the local tree or to the remote.
#[async_trait]
pub trait GroupApplier: Send + Sync {
    async fn apply_group(&self, group: &[Change], log: &ApplyLog) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplySummary {
    pub direction: &'static str,
    pub applied: Vec<String>,
    pub failures: Vec<GroupFailure>,
    pub conflicts: Vec<Conflict>,
    pub duration_ms: u64,
}

impl ApplySummary {
    fn empty(direction: Direction) -> Self {
        ApplySummary {
            direction: direction.as_str(),
            applied: Vec::new(),
            failures: Vec::new(),
            conflicts: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.conflicts.is_empty()
    }

    /// Turn recorded failures into the error the command exits with.
    pub fn check(&self) -> Result<(), SyncError> {
        if !self.conflicts.is_empty() {
            return Err(SyncError::Conflicts(self.conflicts.len()));
        }
        if !self.failures.is_empty() {
            return Err(SyncError::ApplyFailed(self.failures.len()));
        }
        Ok(())
    }
}

/// Apply `changes` with at most `parallel` groups in flight.
pub async fn apply(
    changes: Vec<Change>,
    direction: Direction,
    applier: &dyn GroupApplier,
    parallel: usize,
) -> ApplySummary {
    if changes.is_empty() {
        return ApplySummary::empty(direction);
    }
    let started = Instant::now();
    let groups = group_changes(changes);
    let pool = WorkerPool::new(parallel);
    info!(
        direction = direction.as_str(),
        groups = groups.len(),
        parallel = pool.limit(),
        "Applying changes"
    );

    let log = ApplyLog::default();
    let log_ref = &log;
    let failures: Vec<GroupFailure> = pool
        .run(groups, |group| async move {
            let key = group
                .first()
                .map(|c| group_key(c.path()).to_string())
                .unwrap_or_default();
            debug!(group = %key, changes = group.len(), "Applying group");
            match applier.apply_group(&group, log_ref).await {
                Ok(()) => None,
                Err(e) => {
                    error!(group = %key, error = %e, "Failed to apply group");
                    Some(GroupFailure {
                        group: key,
                        error: e.to_string(),
                    })
                }
            }
        })
        .await
        .into_iter()
        .flatten()
        .collect();

    let ApplyLog { applied, conflicts } = log;
    ApplySummary {
        direction: direction.as_str(),
        applied: applied.into_inner(),
        failures,
        conflicts: conflicts.into_inner(),
        duration_ms: started.elapsed().as_millis() as u64,
    }
}
