//! Error types for the synchronization engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the sync engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Unparseable, obsolete or inconsistent configuration. Always fatal.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The active branch could not be resolved.
    #[error("Branch resolution failed: {0}")]
    BranchError(String),

    /// A path does not map to any known artifact kind.
    #[error("Could not infer artifact kind of path: {0}")]
    Unclassifiable(String),

    /// A structured document failed to parse.
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote workspace archive could not be read.
    #[error("Archive error: {0}")]
    ArchiveError(String),

    /// A remote operation failed for one artifact.
    #[error("Remote operation failed on {path}: {message}")]
    Remote { path: String, message: String },

    /// Conflicts were recorded and strict conflict mode is enabled.
    #[error("{0} conflict(s) found between local and remote")]
    Conflicts(usize),

    /// Derived state (schema, locks) could not be regenerated.
    #[error("Regeneration failed for {path}: {message}")]
    Regeneration { path: String, message: String },

    #[error("Lockfile error: {0}")]
    LockfileError(String),

    #[error("Invalid glob pattern {pattern:?}: {message}")]
    InvalidGlob { pattern: String, message: String },

    /// Linting found invalid descriptor documents.
    #[error("{0} document(s) failed validation")]
    ValidationFailed(usize),

    /// One or more artifact groups failed to apply.
    #[error("{0} artifact group(s) failed to apply")]
    ApplyFailed(usize),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Parse {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn remote(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Remote {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error must abort the command before any mutation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ConfigError(_) | SyncError::BranchError(_) | SyncError::InvalidGlob { .. }
        )
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}

impl From<git2::Error> for SyncError {
    fn from(err: git2::Error) -> Self {
        SyncError::BranchError(err.message().to_string())
    }
}
