//! The sync engine: snapshot, diff, apply.
//!
//! Both directions follow the same shape. Each side is flattened into a
//! `base path -> content` map, the maps are diffed into an ordered change
//! list, and the changes are applied per artifact group through the worker
//! pool. Derived state is refreshed afterwards.

pub mod apply;
pub mod conflict;
pub mod diff;
pub mod flatten;
pub mod pull;
pub mod push;
pub mod report;
pub mod tracker;

pub use apply::{apply, ApplySummary, GroupApplier};
pub use conflict::{ConflictPolicy, Prompter, Unattended};
pub use diff::{diff, Change, DiffOptions};
pub use flatten::Flattener;
pub use report::SyncReport;
pub use tracker::ChangeTracker;

use crate::context::SyncContext;
use crate::error::SyncError;
use crate::remote::{ArchiveRequest, RemoteWorkspace};
use crate::store::StateDir;
use crate::tree::{ArchiveOptions, ArchiveTree, LocalTree};
use crate::types::FlatTree;
use std::sync::Arc;
use tracing::{debug, info};

/// The remote workspace, flattened in the local layout.
pub async fn remote_snapshot(
    ctx: &SyncContext,
    remote: &dyn RemoteWorkspace,
    ignore_codebase_changes: bool,
) -> Result<FlatTree, SyncError> {
    let request = ArchiveRequest::from(&ctx.options);
    let bytes = remote.download_archive(&request).await?;
    let resource_type_extensions = remote.resource_type_extensions().await?;
    let archive = ArchiveTree::from_tar(
        &bytes,
        ArchiveOptions {
            format: ctx.format,
            default_ts: ctx.options.default_ts,
            resource_type_extensions,
            ignore_codebase_changes,
        },
    )?;
    let flat = Flattener::new(ctx).flatten(archive.root(), true).await;
    info!(
        workspace = remote.workspace_id(),
        files = flat.len(),
        "Loaded remote snapshot"
    );
    Ok(flat)
}

/// The working directory, with branch overrides resolved to base paths.
pub async fn local_snapshot(ctx: &SyncContext, ignore_codebase_changes: bool) -> FlatTree {
    let tree = LocalTree::new(&ctx.root, Arc::clone(&ctx.codebases), ignore_codebase_changes);
    let flat = Flattener::new(ctx).flatten(tree.root(), false).await;
    debug!(files = flat.len(), "Loaded local snapshot");
    flat
}

/// The state recorded by the last stateful run. Falls back to the working
/// directory when no state has been recorded yet.
pub async fn state_snapshot(ctx: &SyncContext) -> Result<FlatTree, SyncError> {
    let state = StateDir::new(&ctx.root);
    match state.tree().await? {
        Some(root) => Ok(Flattener::new(ctx).flatten(root, true).await),
        None => {
            info!("No recorded state yet, comparing against the working directory");
            Ok(local_snapshot(ctx, true).await)
        }
    }
}
