//! Pull: bring the remote workspace into the local tree.

use super::apply::{apply, ApplyLog, GroupApplier};
use super::conflict::{is_conflict, Conflict, ConflictPolicy, Prompter, Resolution};
use super::diff::{diff, sort_changes, Change, DiffOptions};
use super::report::SyncReport;
use super::tracker::ChangeTracker;
use super::{local_snapshot, remote_snapshot, state_snapshot};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::regeneration::{MetadataGenerator, RegenerationMode, Regenerator};
use crate::remote::RemoteWorkspace;
use crate::store::state::{remove_file, write_file};
use crate::store::{Lockfile, StateDir};
use crate::types::{Direction, FlatTree};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub fail_conflicts: bool,
    /// Compare against and mirror into the `.wmill/` state.
    pub stateful: bool,
}

/// Changes a pull would apply, with the remote snapshot they came from.
#[derive(Debug, Clone)]
pub struct PullPlan {
    pub changes: Vec<Change>,
    remote: FlatTree,
}

/// Download and diff. Nothing is written.
pub async fn plan(
    ctx: &SyncContext,
    remote: &dyn RemoteWorkspace,
    options: &PullOptions,
) -> Result<PullPlan, SyncError> {
    let remote_flat = remote_snapshot(ctx, remote, true).await?;
    let local_flat = if options.stateful {
        state_snapshot(ctx).await?
    } else {
        local_snapshot(ctx, true).await
    };
    let diff_options = DiffOptions {
        ignore_codebase_changes: true,
        ..DiffOptions::default()
    };
    let mut changes = diff(&remote_flat, &local_flat, &diff_options, &ctx.codebases);
    sort_changes(&mut changes);
    info!(
        workspace = remote.workspace_id(),
        changes = changes.len(),
        "remote -> local"
    );
    Ok(PullPlan {
        changes,
        remote: remote_flat,
    })
}

/// Plan, confirm and apply in one go.
pub async fn pull(
    ctx: &SyncContext,
    remote: &dyn RemoteWorkspace,
    options: &PullOptions,
    prompter: &dyn Prompter,
    generator: Option<&dyn MetadataGenerator>,
) -> Result<SyncReport, SyncError> {
    let plan = plan(ctx, remote, options).await?;
    if plan.changes.is_empty() {
        return Ok(SyncReport::unapplied(Direction::Pull, Vec::new(), "No changes to apply"));
    }
    if options.dry_run {
        return Ok(SyncReport::unapplied(
            Direction::Pull,
            plan.changes,
            "Dry run: no changes applied",
        ));
    }
    let question = format!(
        "Do you want to apply these {} changes to your local files?",
        plan.changes.len()
    );
    if !options.yes && !prompter.confirm(&question) {
        return Ok(SyncReport::unapplied(Direction::Pull, plan.changes, "Cancelled"));
    }
    apply_plan(ctx, plan, options, prompter, generator).await
}

/// Write the planned changes, then record or regenerate derived state of
/// everything that was written.
pub async fn apply_plan(
    ctx: &SyncContext,
    plan: PullPlan,
    options: &PullOptions,
    prompter: &dyn Prompter,
    generator: Option<&dyn MetadataGenerator>,
) -> Result<SyncReport, SyncError> {
    let applier = LocalApplier {
        ctx,
        state: options.stateful.then(|| StateDir::new(&ctx.root)),
        policy: ConflictPolicy {
            fail_conflicts: options.fail_conflicts,
            yes: options.yes,
        },
        prompter,
    };
    let summary = apply(plan.changes.clone(), Direction::Pull, &applier, ctx.options.parallel).await;

    let applied: HashSet<&str> = summary.applied.iter().map(String::as_str).collect();
    let written: Vec<Change> = plan
        .changes
        .iter()
        .filter(|c| applied.contains(c.path()))
        .cloned()
        .collect();
    let tracker = ChangeTracker::build(&written, &plan.remote);
    let mut stale = Vec::new();
    if !tracker.is_empty() {
        let mode = match generator {
            Some(_) => RegenerationMode::Regenerate,
            None => RegenerationMode::RecordOnly,
        };
        let mut lockfile = Lockfile::open(&ctx.root).await?;
        let regeneration = Regenerator::new(ctx, generator)
            .run(&tracker, &mut lockfile, mode)
            .await;
        lockfile.save().await?;
        debug!(
            recorded = regeneration.recorded.len(),
            regenerated = regeneration.regenerated.len(),
            "Updated lockfile after pull"
        );
        stale = regeneration.failed.into_iter().map(|(path, _)| path).collect();
    }

    if !summary.conflicts.is_empty() {
        warn!(conflicts = summary.conflicts.len(), "Pull finished with conflicts");
    }
    let message = if summary.is_success() {
        "All local changes pulled, now you can push to the remote"
    } else {
        "Pull finished with errors"
    };
    Ok(SyncReport {
        direction: Direction::Pull,
        changes: plan.changes,
        summary: Some(summary),
        message: Some(message.to_string()),
        stale,
    })
}

/// Applies changes to the working directory.
struct LocalApplier<'a> {
    ctx: &'a SyncContext,
    state: Option<StateDir>,
    policy: ConflictPolicy,
    prompter: &'a dyn Prompter,
}

impl LocalApplier<'_> {
    async fn mirror(&self, path: &str, content: Option<&str>) -> Result<(), SyncError> {
        match (&self.state, content) {
            (Some(state), Some(content)) => state.write(path, content).await,
            (Some(state), None) => state.remove(path).await,
            (None, _) => Ok(()),
        }
    }

    /// Whether an edit may overwrite the working file.
    async fn may_overwrite(
        &self,
        path: &str,
        target: &Path,
        before: &str,
        after: &str,
        log: &ApplyLog,
    ) -> bool {
        if self.state.is_none() {
            return true;
        }
        let Ok(local) = tokio::fs::read_to_string(target).await else {
            return true;
        };
        if !is_conflict(&local, before, after) {
            return true;
        }
        match self.policy.resolve(self.prompter, path, &local, after) {
            Resolution::Overwrite => true,
            Resolution::KeepLocal => {
                info!(%path, "Keeping local version");
                false
            }
            Resolution::Record => {
                log.conflict(Conflict {
                    path: path.to_string(),
                    local,
                    remote: after.to_string(),
                });
                false
            }
        }
    }
}

#[async_trait]
impl<'a> GroupApplier for LocalApplier<'a> {
    async fn apply_group(&self, group: &[Change], log: &ApplyLog) -> Result<(), SyncError> {
        for change in group {
            let path = change.path();
            let local_path = self.ctx.local_path(path);
            let target = self.ctx.root.join(&local_path);
            match change {
                Change::Added { content, .. } => {
                    debug!(%path, target = %local_path, "Adding local file");
                    write_file(&target, content).await?;
                    self.mirror(path, Some(content)).await?;
                }
                Change::Edited { before, after, .. } => {
                    if !self.may_overwrite(path, &target, before, after, log).await {
                        continue;
                    }
                    debug!(%path, target = %local_path, "Writing local file");
                    write_file(&target, after).await?;
                    self.mirror(path, Some(after)).await?;
                }
                Change::Deleted { .. } => {
                    debug!(%path, target = %local_path, "Deleting local file");
                    remove_file(&target).await?;
                    self.mirror(path, None).await?;
                }
            }
            log.applied(path);
        }
        Ok(())
    }
}
