//! Artifact kinds and path classification.
//!
//! Classification is a pure function over path syntax. Paths are relative and
//! use `/` as separator.

use crate::error::SyncError;
use serde::Serialize;
use std::fmt;

/// Suffixes of files holding script content. Longer suffixes first so that
/// `.playbook.yml` wins over a bare extension check.
pub const SCRIPT_CONTENT_EXTENSIONS: &[&str] = &[
    ".playbook.yml",
    ".ts",
    ".py",
    ".go",
    ".sh",
    ".sql",
    ".gql",
    ".ps1",
    ".php",
    ".rs",
    ".cs",
    ".nu",
    ".java",
    ".js",
];

/// Trigger flavours, each stored as `<path>.<kind>_trigger.yaml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Http,
    Websocket,
    Kafka,
    Nats,
    Postgres,
    Mqtt,
    Sqs,
    Gcp,
    Email,
}

impl TriggerKind {
    pub const ALL: [TriggerKind; 9] = [
        TriggerKind::Http,
        TriggerKind::Websocket,
        TriggerKind::Kafka,
        TriggerKind::Nats,
        TriggerKind::Postgres,
        TriggerKind::Mqtt,
        TriggerKind::Sqs,
        TriggerKind::Gcp,
        TriggerKind::Email,
    ];

    /// Type token as it appears in file names, e.g. `http_trigger`.
    pub fn token(&self) -> &'static str {
        match self {
            TriggerKind::Http => "http_trigger",
            TriggerKind::Websocket => "websocket_trigger",
            TriggerKind::Kafka => "kafka_trigger",
            TriggerKind::Nats => "nats_trigger",
            TriggerKind::Postgres => "postgres_trigger",
            TriggerKind::Mqtt => "mqtt_trigger",
            TriggerKind::Sqs => "sqs_trigger",
            TriggerKind::Gcp => "gcp_trigger",
            TriggerKind::Email => "email_trigger",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.token() == token)
    }
}

/// Kind of a synchronizable artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Settings,
    EncryptionKey,
    User,
    Group,
    Folder,
    ResourceType,
    Variable,
    Resource,
    WorkspaceDependencies,
    Script,
    Flow,
    RawApp,
    App,
    Schedule,
    Trigger(TriggerKind),
}

/// Precedence given to paths that cannot be classified.
pub const UNCLASSIFIED_PRECEDENCE: u8 = 15;

impl ArtifactKind {
    /// Position in the dependency order used to sort changes. Referenced
    /// artifacts come before the artifacts referencing them.
    pub fn precedence(&self) -> u8 {
        match self {
            ArtifactKind::Settings => 0,
            ArtifactKind::EncryptionKey => 1,
            ArtifactKind::User => 2,
            ArtifactKind::Group => 3,
            ArtifactKind::Folder => 4,
            ArtifactKind::ResourceType => 5,
            ArtifactKind::Variable => 6,
            ArtifactKind::Resource => 7,
            ArtifactKind::WorkspaceDependencies => 8,
            ArtifactKind::Script => 9,
            ArtifactKind::Flow => 10,
            ArtifactKind::RawApp => 11,
            ArtifactKind::App => 12,
            ArtifactKind::Schedule => 13,
            ArtifactKind::Trigger(_) => 14,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::Settings => "settings",
            ArtifactKind::EncryptionKey => "encryption_key",
            ArtifactKind::User => "user",
            ArtifactKind::Group => "group",
            ArtifactKind::Folder => "folder",
            ArtifactKind::ResourceType => "resource-type",
            ArtifactKind::Variable => "variable",
            ArtifactKind::Resource => "resource",
            ArtifactKind::WorkspaceDependencies => "workspace_dependencies",
            ArtifactKind::Script => "script",
            ArtifactKind::Flow => "flow",
            ArtifactKind::RawApp => "raw_app",
            ArtifactKind::App => "app",
            ArtifactKind::Schedule => "schedule",
            ArtifactKind::Trigger(t) => t.token(),
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(self, ArtifactKind::Trigger(_))
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify a path into its artifact kind.
pub fn classify(path: &str) -> Result<ArtifactKind, SyncError> {
    if path.contains(".flow/") {
        return Ok(ArtifactKind::Flow);
    }
    if path.contains(".raw_app/") {
        return Ok(ArtifactKind::RawApp);
    }
    if path.contains(".app/") {
        return Ok(ArtifactKind::App);
    }
    if is_workspace_dependency(path) {
        return Ok(ArtifactKind::WorkspaceDependencies);
    }
    if is_resource_file(path) {
        return Ok(ArtifactKind::Resource);
    }
    if is_script_content(path) || path.ends_with(".lock") {
        return Ok(ArtifactKind::Script);
    }

    let name = file_name(path);
    let stem = name
        .strip_suffix(".yaml")
        .or_else(|| name.strip_suffix(".json"));

    if let Some(stem) = stem {
        let token = stem.rsplit('.').next().unwrap_or(stem);
        let kind = match token {
            "script" => Some(ArtifactKind::Script),
            "variable" => Some(ArtifactKind::Variable),
            "resource" => Some(ArtifactKind::Resource),
            "resource-type" => Some(ArtifactKind::ResourceType),
            "schedule" => Some(ArtifactKind::Schedule),
            "user" => Some(ArtifactKind::User),
            "group" => Some(ArtifactKind::Group),
            "meta" if stem.starts_with("folder.") => Some(ArtifactKind::Folder),
            other => TriggerKind::from_token(other).map(ArtifactKind::Trigger),
        };
        if let Some(kind) = kind {
            return Ok(kind);
        }
        if stem == "settings" || stem.starts_with("settings.") {
            return Ok(ArtifactKind::Settings);
        }
    }

    if name.starts_with("encryption_key") {
        return Ok(ArtifactKind::EncryptionKey);
    }

    Err(SyncError::Unclassifiable(path.to_string()))
}

/// Whether the path is a workspace dependency file. These are synced
/// verbatim whatever their extension.
pub fn is_workspace_dependency(path: &str) -> bool {
    path.starts_with("dependencies/")
}

/// Classify, treating failures as "no kind".
pub fn try_classify(path: &str) -> Option<ArtifactKind> {
    classify(path).ok()
}

/// Whether the path is a resource file attachment (`x.resource.file.<ext>`).
pub fn is_resource_file(path: &str) -> bool {
    match path.find(".resource.file.") {
        Some(idx) => idx + ".resource.file.".len() < path.len(),
        None => false,
    }
}

/// Whether the path holds script source code.
pub fn is_script_content(path: &str) -> bool {
    if path.ends_with(".yml") {
        return path.ends_with(".playbook.yml");
    }
    SCRIPT_CONTENT_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Whether the path is a script descriptor (`x.script.yaml` / `x.script.json`).
pub fn is_script_metadata(path: &str) -> bool {
    path.ends_with(".script.yaml") || path.ends_with(".script.json")
}

/// Last path segment.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Key grouping all files of one artifact: everything before the first `.`.
///
/// `f/x.flow/a.inline_script.ts`, `f/x.flow/flow.yaml` and `f/x.script.yaml`
/// all map to `f/x`.
pub fn group_key(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Root directory of a flow, app or raw app containing `path`, including the
/// trailing `/`, e.g. `f/x.flow/`.
pub fn container_root(path: &str) -> Option<&str> {
    for marker in [".flow/", ".raw_app/", ".app/"] {
        if let Some(idx) = path.find(marker) {
            return Some(&path[..idx + marker.len()]);
        }
    }
    None
}

/// Path of the artifact as known by the remote, e.g. `f/x` for
/// `f/x.script.yaml`, or the folder name for a folder descriptor.
pub fn remote_path(path: &str) -> Result<String, SyncError> {
    let kind = classify(path)?;
    let stripped = match kind {
        ArtifactKind::Flow => path.split(".flow/").next().map(str::to_string),
        ArtifactKind::RawApp => path.split(".raw_app/").next().map(str::to_string),
        ArtifactKind::App => path.split(".app/").next().map(str::to_string),
        ArtifactKind::Folder => path.split('/').nth(1).map(str::to_string),
        ArtifactKind::User => strip_typed(path.strip_prefix("users/").unwrap_or(path), "user"),
        ArtifactKind::Group => strip_typed(path.strip_prefix("groups/").unwrap_or(path), "group"),
        ArtifactKind::Settings | ArtifactKind::EncryptionKey => Some(String::new()),
        ArtifactKind::WorkspaceDependencies => Some(path.to_string()),
        ArtifactKind::Resource if is_resource_file(path) => path
            .find(".resource.file.")
            .map(|idx| path[..idx].to_string()),
        ArtifactKind::Script => {
            if is_script_metadata(path) {
                strip_typed(path, "script")
            } else if let Some(base) = path.strip_suffix(".script.lock") {
                Some(base.to_string())
            } else {
                Some(remove_script_extension(path).to_string())
            }
        }
        other => strip_typed(path, other.label()),
    };
    stripped.ok_or_else(|| SyncError::Unclassifiable(path.to_string()))
}

fn strip_typed(path: &str, token: &str) -> Option<String> {
    path.strip_suffix(&format!(".{}.yaml", token))
        .or_else(|| path.strip_suffix(&format!(".{}.json", token)))
        .map(str::to_string)
}

/// Strip the script content extension, including compound language tags
/// such as `.pg.sql` or `.bun.ts`.
pub fn remove_script_extension(path: &str) -> &str {
    let name = file_name(path);
    match name.find('.') {
        Some(idx) => &path[..path.len() - name.len() + idx],
        None => path,
    }
}
