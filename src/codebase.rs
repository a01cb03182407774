//! Codebases: TypeScript scripts bundled from a shared source directory.
//!
//! A script bound to a codebase is identified remotely by the digest of the
//! codebase sources rather than by its own lock.

use crate::config::CodebaseConfig;
use crate::error::SyncError;
use crate::glob::GlobList;
use crate::tree::hasher::digest_directory;
use crate::types::ContentHash;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
struct Codebase {
    dir: PathBuf,
    includes: Option<GlobList>,
    excludes: GlobList,
}

impl Codebase {
    fn contains(&self, path: &str) -> bool {
        let included = match &self.includes {
            Some(globs) => globs.matches_any(path),
            None => true,
        };
        included && !self.excludes.matches_any(path)
    }
}

/// Compiled codebases of a workspace with memoized digests.
#[derive(Debug, Default)]
pub struct Codebases {
    entries: Vec<Codebase>,
    digests: Mutex<HashMap<usize, ContentHash>>,
}

impl Codebases {
    pub fn compile(root: &Path, configs: &[CodebaseConfig]) -> Result<Self, SyncError> {
        let mut entries = Vec::with_capacity(configs.len());
        for config in configs {
            let includes = if config.includes.is_empty() {
                None
            } else {
                Some(GlobList::compile(&config.includes)?)
            };
            entries.push(Codebase {
                dir: root.join(&config.relative_path),
                includes,
                excludes: GlobList::compile(&config.excludes)?,
            });
        }
        Ok(Codebases {
            entries,
            digests: Mutex::new(HashMap::new()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&self, path: &str) -> Option<usize> {
        if !path.ends_with(".ts") {
            return None;
        }
        self.entries.iter().position(|c| c.contains(path))
    }

    /// Whether a `.ts` script path belongs to a codebase.
    pub fn is_bound(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Digest of the codebase owning `path`, computed at most once per
    /// codebase.
    pub fn digest_for(&self, path: &str) -> Result<Option<ContentHash>, SyncError> {
        let Some(idx) = self.find(path) else {
            return Ok(None);
        };
        if let Some(digest) = self.digests.lock().get(&idx) {
            return Ok(Some(digest.clone()));
        }
        let digest = digest_directory(&self.entries[idx].dir, |_| true)?;
        tracing::debug!(codebase = %self.entries[idx].dir.display(), %digest, "Computed codebase digest");
        self.digests.lock().insert(idx, digest.clone());
        Ok(Some(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(includes: &[&str], excludes: &[&str]) -> CodebaseConfig {
        CodebaseConfig {
            relative_path: "lib".to_string(),
            includes: includes.iter().map(|s| s.to_string()).collect(),
            excludes: excludes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_binding_requires_ts_and_globs() {
        let dir = TempDir::new().unwrap();
        let codebases = Codebases::compile(dir.path(), &[config(&["f/bundle/**"], &["f/bundle/skip.ts"])]).unwrap();
        assert!(codebases.is_bound("f/bundle/main.ts"));
        assert!(!codebases.is_bound("f/bundle/main.py"));
        assert!(!codebases.is_bound("f/bundle/skip.ts"));
        assert!(!codebases.is_bound("f/other/main.ts"));
    }

    #[test]
    fn test_digest_is_memoized_per_run() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("lib/util.ts"), "export {}").unwrap();
        let codebases = Codebases::compile(dir.path(), &[config(&[], &[])]).unwrap();

        let first = codebases.digest_for("f/a.ts").unwrap().unwrap();
        std::fs::write(dir.path().join("lib/util.ts"), "export const x = 1").unwrap();
        assert_eq!(codebases.digest_for("f/b.ts").unwrap().unwrap(), first);
        assert_eq!(codebases.digest_for("f/b.py").unwrap(), None);
    }
}
