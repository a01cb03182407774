//! Hash computation for tree content and codebase directories

use crate::error::SyncError;
use crate::types::ContentHash;
use std::path::Path;
use walkdir::WalkDir;

/// Hash a sequence of parts with length framing, so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn hash_parts<I, S>(parts: I) -> ContentHash
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Hash a single string.
pub fn hash_str(content: &str) -> ContentHash {
    hash_parts([content])
}

/// Digest of every file below `dir` accepted by `accept`.
///
/// Files are visited in sorted order and hashed as `(relative path, bytes)`
/// pairs. Relative paths use `/` on every platform.
pub fn digest_directory<F>(dir: &Path, mut accept: F) -> Result<ContentHash, SyncError>
where
    F: FnMut(&str) -> bool,
{
    let mut hasher = blake3::Hasher::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            e.depth() == 0 || (name != "node_modules" && !name.starts_with('.'))
        });
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
            SyncError::io(path, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(dir) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if !accept(&relative) {
            continue;
        }
        let bytes = std::fs::read(entry.path()).map_err(|e| SyncError::io(entry.path(), e))?;
        hasher.update(&(relative.len() as u64).to_le_bytes());
        hasher.update(relative.as_bytes());
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}
