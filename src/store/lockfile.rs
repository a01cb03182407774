//! Lockfile staleness tracker
//!
//! Maps an artifact path (optionally with a subpath) to the hash of the
//! inputs its derived state was last computed from. Version 2 documents key
//! entries as `path` or `path+subpath`. Legacy documents nest subpaths under
//! the path; they are read as is and migrated to v2 on the first write.

use crate::error::SyncError;
use crate::types::ContentHash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Lockfile location, relative to the workspace root.
pub const LOCKFILE_NAME: &str = "wmill-lock.yaml";

const V2: &str = "v2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
enum LockEntry {
    Hash(String),
    Nested(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
struct LockDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default)]
    locks: BTreeMap<String, LockEntry>,
}

impl LockDocument {
    fn fresh() -> Self {
        LockDocument {
            version: Some(V2.to_string()),
            locks: BTreeMap::new(),
        }
    }

    fn is_v2(&self) -> bool {
        self.version.as_deref() == Some(V2)
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

fn v2_key(path: &str, subpath: Option<&str>) -> String {
    match subpath {
        Some(sub) => format!("{}+{}", normalize(path), normalize(sub)),
        None => normalize(path),
    }
}

/// The lockfile, held in memory and rewritten wholesale on [`Lockfile::save`].
#[derive(Debug, Clone)]
pub struct Lockfile {
    file: PathBuf,
    doc: LockDocument,
}

impl Lockfile {
    /// Open the lockfile of `root`. A missing or invalid document is replaced
    /// by a fresh v2 one, written immediately.
    pub async fn open(root: &Path) -> Result<Self, SyncError> {
        let file = root.join(LOCKFILE_NAME);
        let parsed = tokio::fs::read_to_string(&file)
            .await
            .ok()
            .and_then(|text| match serde_yaml::from_str::<LockDocument>(&text) {
                Ok(doc) => Some(doc),
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "Invalid lockfile, recreating it");
                    None
                }
            });
        match parsed {
            Some(doc) => {
                debug!(file = %file.display(), entries = doc.locks.len(), "Loaded lockfile");
                Ok(Lockfile { file, doc })
            }
            None => {
                let lockfile = Lockfile {
                    file,
                    doc: LockDocument::fresh(),
                };
                lockfile.save().await?;
                info!("{} created", LOCKFILE_NAME);
                Ok(lockfile)
            }
        }
    }

    /// An unsaved v2 lockfile at `root`.
    pub fn in_memory(root: &Path) -> Self {
        Lockfile {
            file: root.join(LOCKFILE_NAME),
            doc: LockDocument::fresh(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    fn current(&self, path: &str, subpath: Option<&str>) -> Option<&str> {
        if self.doc.is_v2() {
            return match self.doc.locks.get(&v2_key(path, subpath)) {
                Some(LockEntry::Hash(hash)) => Some(hash),
                _ => None,
            };
        }
        match (self.doc.locks.get(&normalize(path)), subpath) {
            (Some(LockEntry::Nested(map)), Some(sub)) => map.get(&normalize(sub)).map(String::as_str),
            (Some(LockEntry::Hash(hash)), None) => Some(hash),
            _ => None,
        }
    }

    pub fn is_up_to_date(&self, path: &str, hash: &str, subpath: Option<&str>) -> bool {
        self.current(path, subpath) == Some(hash)
    }

    pub fn record(&mut self, path: &str, hash: ContentHash, subpath: Option<&str>) {
        if !self.doc.is_v2() {
            self.migrate();
        }
        self.doc.locks.insert(v2_key(path, subpath), LockEntry::Hash(hash));
    }

    /// Rewrite a legacy document as v2, flattening nested subpaths into
    /// `path+subpath` keys.
    fn migrate(&mut self) {
        let legacy = std::mem::take(&mut self.doc.locks);
        for (path, entry) in legacy {
            match entry {
                LockEntry::Hash(hash) => {
                    self.doc.locks.insert(v2_key(&path, None), LockEntry::Hash(hash));
                }
                LockEntry::Nested(map) => {
                    for (sub, hash) in map {
                        self.doc.locks.insert(v2_key(&path, Some(&sub)), LockEntry::Hash(hash));
                    }
                }
            }
        }
        self.doc.version = Some(V2.to_string());
        info!(file = %self.file.display(), "Migrated legacy lockfile to v2");
    }

    /// Remove every v2 entry whose key starts with `path`.
    pub fn clear(&mut self, path: &str) {
        if !self.doc.is_v2() {
            self.migrate();
        }
        let prefix = normalize(path);
        self.doc.locks.retain(|key, _| !key.starts_with(&prefix));
    }

    pub async fn save(&self) -> Result<(), SyncError> {
        let text = serde_yaml::to_string(&self.doc).map_err(|e| SyncError::LockfileError(e.to_string()))?;
        tokio::fs::write(&self.file, text)
            .await
            .map_err(|e| SyncError::io(&self.file, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_lockfile_is_created_as_v2() {
        let dir = TempDir::new().unwrap();
        let lockfile = Lockfile::open(dir.path()).await.unwrap();
        assert!(lockfile.doc.is_v2());
        let text = std::fs::read_to_string(dir.path().join(LOCKFILE_NAME)).unwrap();
        assert!(text.contains("version: v2"));
    }

    #[tokio::test]
    async fn test_invalid_lockfile_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCKFILE_NAME), "not a lockfile\n").unwrap();
        let lockfile = Lockfile::open(dir.path()).await.unwrap();
        assert!(lockfile.doc.is_v2());
        assert!(lockfile.doc.locks.is_empty());
    }

    #[tokio::test]
    async fn test_v2_record_check_and_persist() {
        let dir = TempDir::new().unwrap();
        let mut lockfile = Lockfile::open(dir.path()).await.unwrap();
        lockfile.record("f/x", "h1".into(), None);
        lockfile.record("f/etl.flow", "h2".into(), Some("a.inline_script.py"));
        lockfile.save().await.unwrap();

        let reopened = Lockfile::open(dir.path()).await.unwrap();
        assert!(reopened.is_up_to_date("f/x", "h1", None));
        assert!(reopened.is_up_to_date("f/etl.flow", "h2", Some("a.inline_script.py")));
        assert!(!reopened.is_up_to_date("f/etl.flow", "h2", None));
        assert!(!reopened.is_up_to_date("f/x", "other", None));
        let text = std::fs::read_to_string(dir.path().join(LOCKFILE_NAME)).unwrap();
        assert!(text.contains("f/etl.flow+a.inline_script.py"));
    }

    #[test]
    fn test_windows_separators_are_normalized() {
        let dir = TempDir::new().unwrap();
        let mut lockfile = Lockfile::in_memory(dir.path());
        lockfile.record("f\\x", "h".into(), Some("sub\\a.ts"));
        assert!(lockfile.is_up_to_date("f/x", "h", Some("sub/a.ts")));
    }

    #[test]
    fn test_clear_removes_prefixed_keys() {
        let dir = TempDir::new().unwrap();
        let mut lockfile = Lockfile::in_memory(dir.path());
        lockfile.record("f/etl.flow", "a".into(), Some("x.py"));
        lockfile.record("f/etl.flow", "b".into(), Some("__flow_hash"));
        lockfile.record("f/other", "c".into(), None);
        lockfile.clear("f/etl.flow");
        assert!(!lockfile.is_up_to_date("f/etl.flow", "a", Some("x.py")));
        assert!(!lockfile.is_up_to_date("f/etl.flow", "b", Some("__flow_hash")));
        assert!(lockfile.is_up_to_date("f/other", "c", None));
    }

    #[tokio::test]
    async fn test_legacy_document_is_read_then_migrated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(LOCKFILE_NAME),
            "locks:\n  f/x: h1\n  f/etl.flow:\n    a.py: h2\n",
        )
        .unwrap();
        let mut lockfile = Lockfile::open(dir.path()).await.unwrap();
        assert!(lockfile.is_up_to_date("f/x", "h1", None));
        assert!(lockfile.is_up_to_date("f/etl.flow", "h2", Some("a.py")));

        lockfile.record("f/etl.flow", "h3".into(), Some("b.py"));
        lockfile.save().await.unwrap();
        let text = std::fs::read_to_string(dir.path().join(LOCKFILE_NAME)).unwrap();
        assert!(text.contains("version: v2"));
        assert!(text.contains("f/etl.flow+a.py"));
        assert!(lockfile.is_up_to_date("f/x", "h1", None));
        assert!(lockfile.is_up_to_date("f/etl.flow", "h2", Some("a.py")));
        assert!(lockfile.is_up_to_date("f/etl.flow", "h3", Some("b.py")));
    }
}
