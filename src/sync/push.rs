//! Push: send the local tree to the remote workspace.

use super::apply::{apply, ApplyLog, GroupApplier};
use super::conflict::Prompter;
use super::diff::{diff, sort_changes, Change, DiffOptions};
use super::pull::{self, PullOptions};
use super::report::SyncReport;
use super::tracker::ChangeTracker;
use super::{local_snapshot, remote_snapshot};
use crate::artifact::assemble::{owner_of, Assembled, Assembler, Owner};
use crate::artifact::kind::is_resource_file;
use crate::artifact::validate::{DocumentValidator, SchemaValidator, ValidationTarget};
use crate::artifact::ArtifactKind;
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::regeneration::{RegenerationMode, Regenerator};
use crate::remote::RemoteWorkspace;
use crate::store::{Lockfile, StateDir, LOCKFILE_NAME};
use crate::types::{Direction, FlatTree};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub dry_run: bool,
    pub yes: bool,
    pub fail_conflicts: bool,
    pub stateful: bool,
    /// Do not pull before pushing in stateful mode.
    pub skip_pull: bool,
}

/// Changes a push would apply, with both snapshots.
#[derive(Debug, Clone)]
pub struct PushPlan {
    pub changes: Vec<Change>,
    /// Artifacts whose derived state is older than their code.
    pub stale: Vec<String>,
    local: FlatTree,
    remote: FlatTree,
}

/// Snapshot both sides and diff them. Nothing is written.
pub async fn plan(ctx: &SyncContext, remote: &dyn RemoteWorkspace) -> Result<PushPlan, SyncError> {
    let remote_flat = remote_snapshot(ctx, remote, false).await?;
    let local_flat = local_snapshot(ctx, false).await;
    let diff_options = DiffOptions {
        skip_scripts_metadata: ctx.options.skip_scripts_metadata,
        ignore_metadata_deletion: true,
        ignore_codebase_changes: false,
    };
    let mut changes = diff(&local_flat, &remote_flat, &diff_options, &ctx.codebases);
    sort_changes(&mut changes);
    info!(
        workspace = remote.workspace_id(),
        changes = changes.len(),
        "local -> remote"
    );
    if ctx.options.lint {
        lint(&changes, &local_flat, &SchemaValidator)?;
    }

    let stale = stale_artifacts(ctx, &changes, &local_flat).await?;
    if !stale.is_empty() {
        warn!(
            stale = ?stale,
            "Derived state is out of date for some artifacts, run generate-metadata before pushing"
        );
    }
    Ok(PushPlan {
        changes,
        stale,
        local: local_flat,
        remote: remote_flat,
    })
}

/// Validate every added or edited descriptor before anything is sent.
pub fn lint(changes: &[Change], local: &FlatTree, validator: &dyn DocumentValidator) -> Result<(), SyncError> {
    let mut invalid = 0;
    for change in changes.iter().filter(|c| !c.is_deletion()) {
        let path = change.path();
        let (Some(target), Some(text)) = (ValidationTarget::from_filename(path), local.get(path)) else {
            continue;
        };
        let report = validator.validate(path, text, target);
        if report.is_valid() {
            continue;
        }
        invalid += 1;
        for diagnostic in &report.diagnostics {
            warn!(%path, %diagnostic, "Document does not parse");
        }
        for violation in &report.violations {
            warn!(%path, pointer = %violation.pointer, keyword = violation.keyword, "{}", violation.message);
        }
    }
    if invalid > 0 {
        return Err(SyncError::ValidationFailed(invalid));
    }
    Ok(())
}

async fn stale_artifacts(
    ctx: &SyncContext,
    changes: &[Change],
    local: &FlatTree,
) -> Result<Vec<String>, SyncError> {
    let tracker = ChangeTracker::build(changes, local);
    if tracker.is_empty() {
        return Ok(Vec::new());
    }
    let exists = tokio::fs::metadata(ctx.root.join(LOCKFILE_NAME))
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    let mut lockfile = if exists {
        Lockfile::open(&ctx.root).await?
    } else {
        Lockfile::in_memory(&ctx.root)
    };
    let report = Regenerator::new(ctx, None)
        .run(&tracker, &mut lockfile, RegenerationMode::CheckStale)
        .await;
    Ok(report.stale)
}

/// Pull first when stateful, then plan, confirm and apply.
pub async fn push(
    ctx: &SyncContext,
    remote: &dyn RemoteWorkspace,
    options: &PushOptions,
    prompter: &dyn Prompter,
) -> Result<SyncReport, SyncError> {
    if options.stateful && !options.skip_pull && !options.dry_run {
        info!("Pulling before pushing");
        let pull_options = PullOptions {
            dry_run: false,
            yes: options.yes,
            fail_conflicts: options.fail_conflicts,
            stateful: true,
        };
        pull::pull(ctx, remote, &pull_options, prompter, None)
            .await?
            .check()?;
    }

    let plan = plan(ctx, remote).await?;
    if plan.changes.is_empty() {
        return Ok(SyncReport::unapplied(Direction::Push, Vec::new(), "No changes to push"));
    }
    if options.dry_run {
        let mut report = SyncReport::unapplied(Direction::Push, plan.changes, "Dry run: no changes pushed");
        report.stale = plan.stale;
        return Ok(report);
    }
    let question = format!(
        "Do you want to apply these {} changes to the remote?",
        plan.changes.len()
    );
    if !options.yes && !prompter.confirm(&question) {
        return Ok(SyncReport::unapplied(Direction::Push, plan.changes, "Cancelled"));
    }
    apply_plan(ctx, remote, plan, options).await
}

/// Send the planned changes to the remote.
pub async fn apply_plan(
    ctx: &SyncContext,
    remote: &dyn RemoteWorkspace,
    plan: PushPlan,
    options: &PushOptions,
) -> Result<SyncReport, SyncError> {
    let applier = RemoteApplier {
        remote,
        local: Assembler::new(&plan.local, ctx.options.default_ts),
        existing: Assembler::new(&plan.remote, ctx.options.default_ts),
        state: options.stateful.then(|| StateDir::new(&ctx.root)),
    };
    let summary = apply(plan.changes.clone(), Direction::Push, &applier, ctx.options.parallel).await;
    let message = if summary.is_success() {
        "All changes pushed"
    } else {
        "Push finished with errors"
    };
    Ok(SyncReport {
        direction: Direction::Push,
        changes: plan.changes,
        summary: Some(summary),
        message: Some(message.to_string()),
        stale: plan.stale,
    })
}

/// Applies changes to the remote, one artifact at a time.
///
/// Files of one artifact fold into a single create or update of their
/// owner. Whether the owner is created or updated depends on the remote
/// snapshot holding its primary file.
struct RemoteApplier<'a> {
    remote: &'a dyn RemoteWorkspace,
    local: Assembler<'a>,
    existing: Assembler<'a>,
    state: Option<StateDir>,
}

impl RemoteApplier<'_> {
    async fn send(&self, owner: &Owner, path: &str, codebase: Option<&str>) -> Result<(), SyncError> {
        let mut assembled = self.local.assemble(path)?;
        if assembled.kind == ArtifactKind::Script {
            self.complete_script(&mut assembled, codebase)?;
        }
        if self.existing.has_owner(owner) {
            self.remote
                .update(assembled.kind, &assembled.path, &assembled.body)
                .await?;
            info!(kind = %assembled.kind, path = %assembled.path, "Updated");
        } else {
            self.remote
                .create(assembled.kind, &assembled.path, &assembled.body)
                .await?;
            info!(kind = %assembled.kind, path = %assembled.path, "Created");
        }
        Ok(())
    }

    /// Keep the remote descriptor of a script whose local descriptor is
    /// missing, and bind the body to the new codebase digest.
    fn complete_script(&self, assembled: &mut Assembled, codebase: Option<&str>) -> Result<(), SyncError> {
        let Some(body) = assembled.body.as_object_mut() else {
            return Ok(());
        };
        if self.local.script_metadata(&assembled.path)?.is_none() {
            if let Some(remote_meta) = self.existing.script_metadata(&assembled.path)? {
                debug!(path = %assembled.path, "Using remote descriptor for script without local metadata");
                for (key, value) in remote_meta {
                    body.entry(key).or_insert(value);
                }
            }
        }
        if let Some(digest) = codebase {
            body.insert("codebase".to_string(), Value::String(digest.to_string()));
        }
        Ok(())
    }

    /// Remove the owner of a deleted file, or resend it when it still exists
    /// locally and only one of its files went away.
    async fn remove(
        &self,
        owner: &Owner,
        path: &str,
        synced: &mut HashSet<Owner>,
    ) -> Result<(), SyncError> {
        if path.ends_with(".lock") {
            debug!(%path, "Lock deletion is carried by the script descriptor");
            return Ok(());
        }
        let folded = matches!(
            owner.kind,
            ArtifactKind::Script | ArtifactKind::Flow | ArtifactKind::App | ArtifactKind::RawApp
        ) || (owner.kind == ArtifactKind::Resource && is_resource_file(path));
        if !folded {
            let remote_path = owner.remote_path()?;
            self.remote.delete(owner.kind, &remote_path).await?;
            info!(kind = %owner.kind, path = %remote_path, "Deleted");
            return Ok(());
        }
        if !synced.insert(owner.clone()) {
            return Ok(());
        }
        if self.local.has_owner(owner) {
            return self
                .send(owner, path_of_primary(&self.local, owner)?.as_str(), None)
                .await;
        }
        let remote_path = owner.remote_path()?;
        match owner.kind {
            ArtifactKind::Script => {
                self.remote.archive_script(&remote_path).await?;
                info!(path = %remote_path, "Archived script");
            }
            ArtifactKind::Resource => debug!(%path, "Resource descriptor deletion removes the resource"),
            kind => {
                self.remote.delete(kind, &remote_path).await?;
                info!(kind = %kind, path = %remote_path, "Deleted");
            }
        }
        Ok(())
    }

    async fn mirror(&self, change: &Change) -> Result<(), SyncError> {
        let Some(state) = &self.state else {
            return Ok(());
        };
        match change {
            Change::Added { path, content } => state.write(path, content).await,
            Change::Edited { path, after, .. } => state.write(path, after).await,
            Change::Deleted { path } => state.remove(path).await,
        }
    }
}

/// Local primary file of `owner`, used to assemble it.
fn path_of_primary(local: &Assembler<'_>, owner: &Owner) -> Result<String, SyncError> {
    local
        .primary_path(owner)
        .ok_or_else(|| SyncError::parse(owner.key.as_str(), "artifact not found locally"))
}

#[async_trait]
impl<'a> GroupApplier for RemoteApplier<'a> {
    async fn apply_group(&self, group: &[Change], log: &ApplyLog) -> Result<(), SyncError> {
        let mut synced: HashSet<Owner> = HashSet::new();
        for change in group {
            let path = change.path();
            let owner = match owner_of(path) {
                Ok(owner) => owner,
                Err(e) => {
                    warn!(%path, error = %e, "Skipping file that is not an artifact");
                    continue;
                }
            };
            if change.is_deletion() {
                self.remove(&owner, path, &mut synced).await?;
            } else if synced.insert(owner.clone()) {
                self.send(&owner, path, change.codebase()).await?;
            } else {
                debug!(%path, "Already pushed with its artifact");
            }
            self.mirror(change).await?;
            log.applied(path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodebaseConfig, SyncOptions};
    use crate::context::BranchInfo;
    use crate::remote::MemoryRemote;
    use crate::sync::conflict::Unattended;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> SyncContext {
        SyncContext::new(dir.path(), SyncOptions::default(), BranchInfo::default(), None).unwrap()
    }

    fn write(dir: &TempDir, path: &str, content: &str) {
        let file = dir.path().join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, content).unwrap();
    }

    fn yes() -> PushOptions {
        PushOptions {
            yes: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_script_is_created_once() {
        let dir = TempDir::new().unwrap();
        write(&dir, "f/x.py", "def main():\n    return 1\n");
        write(&dir, "f/x.script.yaml", "summary: x\n");
        let remote = MemoryRemote::new("demo");
        let report = push(&context(&dir), &remote, &yes(), &Unattended).await.unwrap();
        assert!(report.check().is_ok());
        assert_eq!(remote.operations(), vec!["create script f/x"]);
        assert_eq!(
            remote.entries().get("f/x.py").map(String::as_str),
            Some("def main():\n    return 1\n")
        );
    }

    #[tokio::test]
    async fn test_edit_updates_and_deletion_archives() {
        let dir = TempDir::new().unwrap();
        write(&dir, "f/a.variable.yaml", "value: two\nis_secret: false\n");
        let remote = MemoryRemote::new("demo")
            .with_entry("f/a.variable.json", r#"{"value": "one", "is_secret": false}"#)
            .with_entry("f/old.py", "print(0)")
            .with_entry("f/old.script.json", r#"{"summary": "old"}"#);
        push(&context(&dir), &remote, &yes(), &Unattended).await.unwrap();
        let mut ops = remote.operations();
        ops.sort();
        assert_eq!(ops, vec!["archive script f/old", "update variable f/a"]);
        assert!(!remote.entries().contains_key("f/old.py"));
    }

    #[tokio::test]
    async fn test_flow_files_fold_into_one_create() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "f/etl.flow/flow.yaml",
            "summary: etl\nvalue:\n  modules:\n    - id: a\n      summary: a\n      value:\n        type: rawscript\n        language: python3\n        content: '!inline a.inline_script.py'\n",
        );
        write(&dir, "f/etl.flow/a.inline_script.py", "print(2)");
        let remote = MemoryRemote::new("demo");
        push(&context(&dir), &remote, &yes(), &Unattended).await.unwrap();
        assert_eq!(remote.operations(), vec!["create flow f/etl"]);
        let stored = remote.entries();
        let flow: serde_json::Value = serde_json::from_str(&stored["f/etl.flow.json"]).unwrap();
        assert_eq!(flow["value"]["modules"][0]["value"]["content"], "print(2)");
    }

    #[tokio::test]
    async fn test_codebase_digest_keeps_remote_descriptor() {
        let dir = TempDir::new().unwrap();
        write(&dir, "lib/util.ts", "export const x = 1;\n");
        write(&dir, "f/x.ts", "export async function main() {}\n");
        let options = SyncOptions {
            codebases: vec![CodebaseConfig {
                relative_path: "lib".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let ctx = SyncContext::new(dir.path(), options, BranchInfo::default(), None).unwrap();
        let remote = MemoryRemote::new("demo")
            .with_entry("f/x.ts", "export async function main() {}\n")
            .with_entry("f/x.script.json", r#"{"summary": "x", "codebase": "stale"}"#);
        let digest = ctx.codebases.digest_for("f/x.ts").unwrap().unwrap();

        let planned = plan(&ctx, &remote).await.unwrap();
        assert_eq!(planned.changes.len(), 1);
        assert_eq!(planned.changes[0].path(), "f/x.ts");
        assert_eq!(planned.changes[0].codebase(), Some(digest.as_str()));

        let report = push(&ctx, &remote, &yes(), &Unattended).await.unwrap();
        assert!(report.check().is_ok());
        assert_eq!(remote.operations(), vec!["update script f/x"]);
        let stored: Value = serde_json::from_str(&remote.entries()["f/x.script.json"]).unwrap();
        assert_eq!(stored["summary"], "x");
        assert_eq!(stored["codebase"], Value::String(digest));
    }

    #[tokio::test]
    async fn test_workspace_dependencies_are_pushed() {
        let dir = TempDir::new().unwrap();
        write(&dir, "dependencies/requirements.in", "requests\n");
        write(&dir, "dependencies/package.json", "{\"dependencies\": {}}");
        let remote = MemoryRemote::new("demo");
        let report = push(&context(&dir), &remote, &yes(), &Unattended).await.unwrap();
        assert!(report.check().is_ok());
        let mut ops = remote.operations();
        ops.sort();
        assert_eq!(
            ops,
            vec![
                "create workspace_dependencies dependencies/package.json",
                "create workspace_dependencies dependencies/requirements.in",
            ]
        );
        assert_eq!(remote.entries()["dependencies/requirements.in"], "requests\n");
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let dir = TempDir::new().unwrap();
        write(&dir, "f/a.variable.yaml", "value: 1\n");
        let remote = MemoryRemote::new("demo");
        let options = PushOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = push(&context(&dir), &remote, &options, &Unattended).await.unwrap();
        assert_eq!(report.changes.len(), 1);
        assert!(remote.operations().is_empty());
    }

    #[tokio::test]
    async fn test_lint_blocks_invalid_schedule() {
        let dir = TempDir::new().unwrap();
        write(&dir, "f/daily.schedule.yaml", "timezone: UTC\n");
        let options = SyncOptions {
            lint: true,
            include_schedules: true,
            ..Default::default()
        };
        let ctx = SyncContext::new(dir.path(), options, BranchInfo::default(), None).unwrap();
        let remote = MemoryRemote::new("demo");
        let err = push(&ctx, &remote, &yes(), &Unattended).await.unwrap_err();
        assert!(matches!(err, SyncError::ValidationFailed(1)));
        assert!(remote.operations().is_empty());
    }

    #[tokio::test]
    async fn test_remote_failure_is_reported_per_group() {
        let dir = TempDir::new().unwrap();
        write(&dir, "f/a.variable.yaml", "value: 1\n");
        write(&dir, "f/b.variable.yaml", "value: 2\n");
        let remote = MemoryRemote::new("demo").failing_on("f/a");
        let report = push(&context(&dir), &remote, &yes(), &Unattended).await.unwrap();
        assert_eq!(remote.operations(), vec!["create variable f/b"]);
        assert!(matches!(report.check(), Err(SyncError::ApplyFailed(1))));
    }
}
