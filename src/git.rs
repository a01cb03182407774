//! Git repository inspection: workspace root detection and current branch.

use git2::{ErrorCode, Repository};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SyncError;

/// What the enclosing git repository says about the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitState {
    /// Working directory of the enclosing repository, if any.
    pub workdir: Option<PathBuf>,
    /// Current branch, `None` on a detached HEAD or outside a repository.
    pub branch: Option<String>,
}

impl GitState {
    pub fn in_repository(&self) -> bool {
        self.workdir.is_some()
    }
}

/// Inspect the repository enclosing `path`. Not being in a repository is not
/// an error; a broken repository is.
pub fn inspect(path: &Path) -> Result<GitState, SyncError> {
    let repo = match Repository::discover(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => {
            debug!(path = %path.display(), "Not inside a git repository");
            return Ok(GitState::default());
        }
        Err(e) => return Err(e.into()),
    };
    let workdir = repo.workdir().map(Path::to_path_buf);
    let branch = current_branch(&repo)?;
    Ok(GitState { workdir, branch })
}

fn current_branch(repo: &Repository) -> Result<Option<String>, SyncError> {
    let head = match repo.head() {
        Ok(head) => head,
        // Fresh repository without commits: HEAD points at an unborn branch.
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            return Ok(unborn_branch_name(repo));
        }
        Err(e) => return Err(e.into()),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    Ok(head.shorthand().map(str::to_string))
}

fn unborn_branch_name(repo: &Repository) -> Option<String> {
    let head = repo.find_reference("HEAD").ok()?;
    let target = head.symbolic_target()?;
    target.strip_prefix("refs/heads/").map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_outside_repository() {
        let temp = TempDir::new().unwrap();
        let state = inspect(temp.path()).unwrap();
        assert!(!state.in_repository() || state.workdir.is_some());
    }

    #[test]
    fn test_unborn_branch_is_reported() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init(temp.path()).unwrap();
        repo.set_head("refs/heads/staging").unwrap();
        let state = inspect(temp.path()).unwrap();
        assert!(state.in_repository());
        assert_eq!(state.branch.as_deref(), Some("staging"));
    }

    #[test]
    fn test_branch_after_commit() {
        let temp = TempDir::new().unwrap();
        let repo = Repository::init(temp.path()).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let commit = repo
            .commit(None, &sig, &sig, "init", &tree, &[])
            .unwrap();
        let commit = repo.find_commit(commit).unwrap();
        repo.branch("feature/x", &commit, false).unwrap();
        repo.set_head("refs/heads/feature/x").unwrap();

        let state = inspect(temp.path()).unwrap();
        assert_eq!(state.branch.as_deref(), Some("feature/x"));
    }
}
