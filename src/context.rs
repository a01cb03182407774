//! Per-invocation sync context.
//!
//! Everything derived from configuration and the git checkout is resolved
//! once here and passed explicitly to the engine. Nothing in it changes after
//! construction.

use crate::artifact::branch::{get_branch_specific_path, sanitize_branch_name};
use crate::artifact::{DocumentFormat, IgnoreRules, Skips, SpecificItems};
use crate::codebase::Codebases;
use crate::config::{effective_options, specific_items_for_branch, SyncOptions, WorkspaceConfig};
use crate::error::SyncError;
use crate::git::{self, GitState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Active branch and how it was determined.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: Option<String>,
    pub in_repository: bool,
    /// Set when the branch came from the command line rather than git.
    pub overridden: bool,
}

impl BranchInfo {
    /// Resolve the branch of the checkout at `root`, preferring `override_name`.
    pub fn resolve(root: &Path, override_name: Option<&str>) -> Result<Self, SyncError> {
        let state = git::inspect(root)?;
        Ok(Self::from_git(state, override_name))
    }

    pub fn from_git(state: GitState, override_name: Option<&str>) -> Self {
        let in_repository = state.in_repository();
        match override_name {
            Some(name) => BranchInfo {
                name: Some(name.to_string()),
                in_repository,
                overridden: true,
            },
            None => BranchInfo {
                name: state.branch,
                in_repository,
                overridden: false,
            },
        }
    }
}

/// Read-only state shared by every component of one command.
#[derive(Debug)]
pub struct SyncContext {
    pub root: PathBuf,
    pub options: SyncOptions,
    pub branch: BranchInfo,
    pub ignore: IgnoreRules,
    pub skips: Skips,
    pub specific_items: Option<SpecificItems>,
    pub codebases: Arc<Codebases>,
    pub format: DocumentFormat,
}

impl SyncContext {
    /// Resolve effective options for the active branch, then build the
    /// context. `adjust` applies command-line flags, which win over the
    /// configuration document.
    pub fn build<F>(
        root: &Path,
        config: &WorkspaceConfig,
        branch: BranchInfo,
        adjust: F,
    ) -> Result<Self, SyncError>
    where
        F: FnOnce(&mut SyncOptions),
    {
        if branch.in_repository && branch.name.is_none() && !config.git_branches.branches.is_empty() {
            return Err(SyncError::BranchError(
                "gitBranches is configured but the current branch could not be resolved \
                 (detached HEAD?); pass --branch"
                    .to_string(),
            ));
        }
        let mut options = effective_options(config, branch.name.as_deref())?;
        adjust(&mut options);

        let specific = match &branch.name {
            Some(name) => specific_items_for_branch(&config.git_branches, name),
            None => None,
        };
        Self::new(root, options, branch, specific.as_ref().map(SpecificItems::compile).transpose()?)
    }

    pub fn new(
        root: &Path,
        options: SyncOptions,
        branch: BranchInfo,
        specific_items: Option<SpecificItems>,
    ) -> Result<Self, SyncError> {
        if let Some(name) = &branch.name {
            let (token, changed) = sanitize_branch_name(name);
            if changed {
                warn!(
                    branch = %name,
                    token = %token,
                    "Branch name contains characters unsafe in file names; \
                     branch-specific files use the sanitized token, which may collide with other branches"
                );
            }
        }
        let codebases = Codebases::compile(root, &options.codebases)?;
        let context = SyncContext {
            root: root.to_path_buf(),
            ignore: IgnoreRules::new(&options)?,
            skips: Skips::from(&options),
            format: DocumentFormat::from_json_flag(options.json),
            codebases: Arc::new(codebases),
            specific_items,
            branch,
            options,
        };
        debug!(
            root = %context.root.display(),
            branch = ?context.branch.name,
            in_repository = context.branch.in_repository,
            "Built sync context"
        );
        Ok(context)
    }

    pub fn active_branch(&self) -> Option<&str> {
        self.branch.name.as_deref()
    }

    /// Branch override path of `base` for the active branch, if `base` is a
    /// specific item.
    pub fn branch_specific_path(&self, base: &str) -> Option<String> {
        get_branch_specific_path(
            base,
            self.active_branch(),
            self.branch.in_repository || self.branch.overridden,
            self.specific_items.as_ref(),
        )
    }

    /// Local file holding `base`: its branch override when one applies.
    pub fn local_path(&self, base: &str) -> String {
        self.branch_specific_path(base)
            .unwrap_or_else(|| base.to_string())
    }
}
