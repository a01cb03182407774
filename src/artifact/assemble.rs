//! Reassembling pushable artifacts from local files.
//!
//! The inverse of archive expansion: sibling files referenced with
//! `!inline` are folded back into their document, script code joins its
//! descriptor, and flow, app and raw app directories collapse into one body.

use super::document::parse_document;
use super::inline::{language_from_path, parse_inline_ref};
use super::kind::{
    classify, container_root, is_resource_file, is_script_content, remote_path, remove_script_extension,
    ArtifactKind,
};
use crate::config::DefaultTs;
use crate::error::SyncError;
use crate::types::FlatTree;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// One artifact ready to be sent to the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    pub kind: ArtifactKind,
    /// Remote path, e.g. `f/x`.
    pub path: String,
    pub body: Value,
}

/// Assembles artifacts out of a flattened local tree.
pub struct Assembler<'a> {
    files: &'a FlatTree,
    default_ts: DefaultTs,
}

/// Artifact owning `path`.
pub fn owner_of(path: &str) -> Result<Owner, SyncError> {
    let kind = classify(path)?;
    let owner = match kind {
        ArtifactKind::Flow | ArtifactKind::App | ArtifactKind::RawApp => {
            let root = container_root(path).unwrap_or(path);
            Owner {
                kind,
                key: root.to_string(),
            }
        }
        ArtifactKind::Script => Owner {
            kind,
            key: remote_path(path)?,
        },
        ArtifactKind::Resource => Owner {
            kind,
            key: remote_path(path)?,
        },
        _ => Owner {
            kind,
            key: path.to_string(),
        },
    };
    Ok(owner)
}

/// Identity of the artifact a file belongs to: the remote path of scripts
/// and resources, the container root of flows and apps, the file itself
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub kind: ArtifactKind,
    pub key: String,
}

impl Owner {
    /// Whether `path` is the file that holds this artifact's identity:
    /// script code, the resource descriptor, the container descriptor, or
    /// the document itself.
    pub fn is_primary(&self, path: &str) -> bool {
        match self.kind {
            ArtifactKind::Script => is_script_content(path),
            ArtifactKind::Resource => !is_resource_file(path),
            ArtifactKind::Flow | ArtifactKind::App | ArtifactKind::RawApp => path
                .strip_prefix(self.key.as_str())
                .map(is_container_descriptor)
                .unwrap_or(false),
            _ => path == self.key,
        }
    }

    /// Path of the artifact on the remote.
    pub fn remote_path(&self) -> Result<String, SyncError> {
        match self.kind {
            ArtifactKind::Script | ArtifactKind::Resource => Ok(self.key.clone()),
            ArtifactKind::Flow | ArtifactKind::App | ArtifactKind::RawApp => {
                let root = self.key.trim_end_matches('/');
                Ok(root
                    .rsplit_once('.')
                    .map(|(stem, _)| stem.to_string())
                    .unwrap_or_else(|| root.to_string()))
            }
            _ => remote_path(&self.key),
        }
    }
}

fn is_container_descriptor(name: &str) -> bool {
    matches!(
        name,
        "flow.yaml" | "flow.json" | "app.yaml" | "app.json" | "raw_app.yaml" | "raw_app.json"
    )
}

fn dir_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..=idx],
        None => "",
    }
}

impl<'a> Assembler<'a> {
    pub fn new(files: &'a FlatTree, default_ts: DefaultTs) -> Self {
        Assembler { files, default_ts }
    }

    /// Assemble the artifact owning `path`.
    pub fn assemble(&self, path: &str) -> Result<Assembled, SyncError> {
        let owner = owner_of(path)?;
        match owner.kind {
            ArtifactKind::Script => self.script(&owner.key),
            ArtifactKind::Flow | ArtifactKind::App => self.container(&owner),
            ArtifactKind::RawApp => self.raw_app(&owner),
            ArtifactKind::Resource => self.typed(ArtifactKind::Resource, &owner.key, "resource"),
            ArtifactKind::WorkspaceDependencies => {
                let content = self.file(path)?;
                Ok(Assembled {
                    kind: owner.kind,
                    path: path.to_string(),
                    body: serde_json::json!({ "content": content }),
                })
            }
            kind => {
                let mut doc = parse_document(path, self.file(path)?)?;
                self.resolve(&mut doc, dir_of(path), &mut BTreeSet::new())?;
                Ok(Assembled {
                    kind,
                    path: remote_path(path)?,
                    body: doc,
                })
            }
        }
    }

    /// Whether the tree holds the primary file of `owner`.
    pub fn has_owner(&self, owner: &Owner) -> bool {
        self.primary_path(owner).is_some()
    }

    /// The primary file of `owner` in the tree.
    pub fn primary_path(&self, owner: &Owner) -> Option<String> {
        let from = match owner.kind {
            ArtifactKind::Script | ArtifactKind::Resource => dir_of(&owner.key).to_string(),
            _ => owner.key.clone(),
        };
        self.files
            .range(from.clone()..)
            .take_while(|(k, _)| k.starts_with(from.as_str()))
            .map(|(k, _)| k)
            .find(|k| owner_of(k).map(|o| o == *owner).unwrap_or(false) && owner.is_primary(k))
            .cloned()
    }

    fn file(&self, path: &str) -> Result<&'a str, SyncError> {
        self.files
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| SyncError::parse(path, "file not found in local tree"))
    }

    fn descriptor(&self, candidates: [String; 2]) -> Option<(String, &'a str)> {
        candidates
            .into_iter()
            .find_map(|c| self.files.get(&c).map(|text| (c, text.as_str())))
    }

    /// Replace every `!inline` string under `value` with the referenced
    /// file, looked up next to the document first, then from the root.
    fn resolve(&self, value: &mut Value, base: &str, used: &mut BTreeSet<String>) -> Result<(), SyncError> {
        match value {
            Value::String(s) => {
                if let Some(target) = parse_inline_ref(s) {
                    let local = format!("{}{}", base, target);
                    let (key, content) = match self.files.get_key_value(&local) {
                        Some(found) => found,
                        None => self.files.get_key_value(target).ok_or_else(|| {
                            SyncError::parse(target, format!("unresolved inline reference from {}", base))
                        })?,
                    };
                    used.insert(key.clone());
                    *s = content.clone();
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.resolve(item, base, used)?;
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    self.resolve(item, base, used)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn script(&self, remote: &str) -> Result<Assembled, SyncError> {
        let (content_path, content) = self
            .files
            .iter()
            .find(|(k, _)| is_script_content(k) && remove_script_extension(k) == remote)
            .ok_or_else(|| SyncError::parse(remote, "script has no content file"))?;
        let language = language_from_path(content_path, self.default_ts)
            .ok_or_else(|| SyncError::parse(content_path.as_str(), "unknown script language"))?;

        let mut meta = self.script_metadata(remote)?.unwrap_or_default();
        meta.insert("content".to_string(), Value::String(content.clone()));
        meta.insert("language".to_string(), Value::String(language.to_string()));
        Ok(Assembled {
            kind: ArtifactKind::Script,
            path: remote.to_string(),
            body: Value::Object(meta),
        })
    }

    /// Descriptor of the script at `remote` with inline references resolved,
    /// `None` when the tree has no non-empty descriptor for it.
    pub fn script_metadata(&self, remote: &str) -> Result<Option<Map<String, Value>>, SyncError> {
        let Some((path, text)) = self.descriptor([
            format!("{}.script.yaml", remote),
            format!("{}.script.json", remote),
        ]) else {
            return Ok(None);
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        let mut doc = parse_document(&path, text)?;
        self.resolve(&mut doc, dir_of(&path), &mut BTreeSet::new())?;
        Ok(match doc {
            Value::Object(map) => Some(map),
            _ => Some(Map::new()),
        })
    }

    fn typed(&self, kind: ArtifactKind, remote: &str, token: &str) -> Result<Assembled, SyncError> {
        let (path, text) = self
            .descriptor([
                format!("{}.{}.yaml", remote, token),
                format!("{}.{}.json", remote, token),
            ])
            .ok_or_else(|| SyncError::parse(remote, format!("{} descriptor not found", token)))?;
        let mut doc = parse_document(&path, text)?;
        self.resolve(&mut doc, dir_of(&path), &mut BTreeSet::new())?;
        Ok(Assembled {
            kind,
            path: remote.to_string(),
            body: doc,
        })
    }

    fn container_descriptor(&self, owner: &Owner) -> Result<(String, Value), SyncError> {
        let name = match owner.kind {
            ArtifactKind::Flow => "flow",
            ArtifactKind::App => "app",
            _ => "raw_app",
        };
        let (path, text) = self
            .descriptor([
                format!("{}{}.yaml", owner.key, name),
                format!("{}{}.json", owner.key, name),
            ])
            .ok_or_else(|| SyncError::parse(owner.key.as_str(), format!("{} descriptor not found", name)))?;
        Ok((path.clone(), parse_document(&path, text)?))
    }

    fn container(&self, owner: &Owner) -> Result<Assembled, SyncError> {
        let (_, mut doc) = self.container_descriptor(owner)?;
        self.resolve(&mut doc, &owner.key, &mut BTreeSet::new())?;
        Ok(Assembled {
            kind: owner.kind,
            path: owner.remote_path()?,
            body: doc,
        })
    }

    /// Raw apps carry every file of their directory that is not the
    /// descriptor or an inlined runnable under `value.files`.
    fn raw_app(&self, owner: &Owner) -> Result<Assembled, SyncError> {
        let (descriptor, mut doc) = self.container_descriptor(owner)?;
        let mut used = BTreeSet::new();
        used.insert(descriptor);
        self.resolve(&mut doc, &owner.key, &mut used)?;

        let files: Map<String, Value> = self
            .files
            .range(owner.key.clone()..)
            .take_while(|(k, _)| k.starts_with(owner.key.as_str()))
            .filter(|(k, _)| !used.contains(*k))
            .filter_map(|(k, v)| {
                k.strip_prefix(owner.key.as_str())
                    .map(|rel| (format!("/{}", rel), Value::String(v.clone())))
            })
            .collect();
        if let Some(value) = doc.get_mut("value").and_then(Value::as_object_mut) {
            value.insert("files".to_string(), Value::Object(files));
        } else if let Some(map) = doc.as_object_mut() {
            let mut value = Map::new();
            value.insert("files".to_string(), Value::Object(files));
            map.insert("value".to_string(), Value::Object(value));
        }
        Ok(Assembled {
            kind: ArtifactKind::RawApp,
            path: owner.remote_path()?,
            body: doc,
        })
    }
}
