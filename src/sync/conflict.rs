//! Conflict detection on pull.
//!
//! A local file conflicts with an edit coming from the remote when its
//! current content matches neither side of the edit: both sides moved since
//! the last pull. A file already equal to the incoming content is treated as
//! applied.

use serde::Serialize;
use tracing::warn;

/// How conflicts are resolved, in order of precedence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// Record conflicts and leave the files untouched.
    pub fail_conflicts: bool,
    /// Let the remote win without asking.
    pub yes: bool,
}

/// A conflict recorded under the `fail_conflicts` policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub path: String,
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Overwrite,
    KeepLocal,
    Record,
}

/// Interactive decisions taken during a run.
pub trait Prompter: Send + Sync {
    /// Whether to keep the local version of `path`.
    fn keep_local(&self, path: &str, local: &str, remote: &str) -> bool;

    /// Yes/no confirmation, e.g. before applying changes.
    fn confirm(&self, message: &str) -> bool;
}

/// Prompter for unattended runs: keeps local files and confirms everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Prompter for Unattended {
    fn keep_local(&self, _path: &str, _local: &str, _remote: &str) -> bool {
        true
    }

    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

pub fn is_conflict(local: &str, before: &str, after: &str) -> bool {
    local != before && local != after
}

impl ConflictPolicy {
    pub fn resolve(&self, prompter: &dyn Prompter, path: &str, local: &str, remote: &str) -> Resolution {
        warn!(%path, "Conflict detected: both local and remote have been modified");
        if self.fail_conflicts {
            return Resolution::Record;
        }
        if self.yes {
            warn!(%path, "Overriding local version with remote since --yes was passed");
            return Resolution::Overwrite;
        }
        if prompter.keep_local(path, local, remote) {
            Resolution::KeepLocal
        } else {
            Resolution::Overwrite
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Answer(bool);

    impl Prompter for Answer {
        fn keep_local(&self, _: &str, _: &str, _: &str) -> bool {
            self.0
        }

        fn confirm(&self, _: &str) -> bool {
            true
        }
    }

    #[test]
    fn test_conflict_only_when_both_sides_differ() {
        assert!(is_conflict("mine", "base", "theirs"));
        assert!(!is_conflict("base", "base", "theirs"));
        assert!(!is_conflict("theirs", "base", "theirs"));
    }

    #[test]
    fn test_policy_precedence() {
        let strict = ConflictPolicy {
            fail_conflicts: true,
            yes: true,
        };
        assert_eq!(strict.resolve(&Answer(false), "p", "a", "b"), Resolution::Record);
        let yes = ConflictPolicy {
            fail_conflicts: false,
            yes: true,
        };
        assert_eq!(yes.resolve(&Answer(true), "p", "a", "b"), Resolution::Overwrite);
        let interactive = ConflictPolicy::default();
        assert_eq!(interactive.resolve(&Answer(true), "p", "a", "b"), Resolution::KeepLocal);
        assert_eq!(interactive.resolve(&Answer(false), "p", "a", "b"), Resolution::Overwrite);
    }
}
