//! Branch-specific item paths.
//!
//! A branch override of `f/db.resource.yaml` for branch `main` lives in
//! `f/db.main.resource.yaml`. Diffing always works on base paths; the
//! branch-specific name only matters when reading or writing local files.

use super::kind::{classify, file_name, is_resource_file, ArtifactKind, TriggerKind};
use crate::config::SpecificItemsConfig;
use crate::error::SyncError;
use crate::glob::GlobList;

/// Characters that cannot appear in a branch token.
const UNSAFE_BRANCH_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '.'];

/// Replace filesystem-unsafe characters with `_`. Returns the token and
/// whether anything was replaced.
pub fn sanitize_branch_name(branch: &str) -> (String, bool) {
    let token: String = branch
        .chars()
        .map(|c| if UNSAFE_BRANCH_CHARS.contains(&c) { '_' } else { c })
        .collect();
    let changed = token != branch;
    (token, changed)
}

/// Type suffixes that may carry a branch token in front of them.
fn typed_suffixes() -> impl Iterator<Item = String> {
    let tokens = ["variable", "resource"]
        .into_iter()
        .map(str::to_string)
        .chain(TriggerKind::ALL.iter().map(|k| k.token().to_string()));
    tokens.flat_map(|t| [format!(".{}.yaml", t), format!(".{}.json", t)])
}

const RESOURCE_FILE_MARKER: &str = ".resource.file.";

/// Split a branch-specific path into its base path and branch token.
fn split_branch_specific(path: &str) -> Option<(String, String)> {
    let name = file_name(path);
    let dir = &path[..path.len() - name.len()];

    for ext in ["yaml", "json"] {
        if let Some(token) = name
            .strip_prefix("folder.")
            .and_then(|rest| rest.strip_suffix(&format!(".meta.{}", ext)))
        {
            return non_empty(token)
                .map(|t| (format!("{}folder.meta.{}", dir, ext), t.to_string()));
        }
        if dir.is_empty() {
            if let Some(token) = name
                .strip_prefix("settings.")
                .and_then(|rest| rest.strip_suffix(&format!(".{}", ext)))
            {
                return non_empty(token).map(|t| (format!("settings.{}", ext), t.to_string()));
            }
        }
    }

    if let Some(idx) = path.find(RESOURCE_FILE_MARKER) {
        let head = &path[..idx];
        let tail = &path[idx..];
        return split_token(head).map(|(base, token)| (format!("{}{}", base, tail), token));
    }

    for suffix in typed_suffixes() {
        if let Some(head) = path.strip_suffix(&suffix) {
            return split_token(head).map(|(base, token)| (format!("{}{}", base, suffix), token));
        }
    }
    None
}

/// `f/db.main` -> (`f/db`, `main`), only within the last path segment.
fn split_token(head: &str) -> Option<(String, String)> {
    let name = file_name(head);
    let dot = name.rfind('.')?;
    let stem = &name[..dot];
    let token = &name[dot + 1..];
    if stem.is_empty() || token.is_empty() {
        return None;
    }
    let dir = &head[..head.len() - name.len()];
    Some((format!("{}{}", dir, stem), token.to_string()))
}

fn non_empty(s: &str) -> Option<&str> {
    if s.is_empty() || s.contains('/') {
        None
    } else {
        Some(s)
    }
}

/// Path of the `branch` override of `base`. Paths of kinds that cannot be
/// branch-specific are returned unchanged.
pub fn to_branch_specific_path(base: &str, branch: &str) -> String {
    let (token, _) = sanitize_branch_name(branch);
    if token.is_empty() {
        return base.to_string();
    }
    let name = file_name(base);
    let dir = &base[..base.len() - name.len()];

    for ext in ["yaml", "json"] {
        if name == format!("folder.meta.{}", ext) {
            return format!("{}folder.{}.meta.{}", dir, token, ext);
        }
        if base == format!("settings.{}", ext) {
            return format!("settings.{}.{}", token, ext);
        }
    }
    if let Some(idx) = base.find(RESOURCE_FILE_MARKER) {
        return format!("{}.{}{}", &base[..idx], token, &base[idx..]);
    }
    for suffix in typed_suffixes() {
        if let Some(head) = base.strip_suffix(&suffix) {
            return format!("{}.{}{}", head, token, suffix);
        }
    }
    base.to_string()
}

/// Base path of a `branch` override. Anything else is returned unchanged.
pub fn from_branch_specific_path(path: &str, branch: &str) -> String {
    let (token, _) = sanitize_branch_name(branch);
    match split_branch_specific(path) {
        Some((base, found)) if found == token => base,
        _ => path.to_string(),
    }
}

/// Whether the path is a branch override for some branch.
pub fn is_branch_specific_file(path: &str) -> bool {
    split_branch_specific(path).is_some()
}

/// Whether the path is a branch override for `branch`.
pub fn is_current_branch_file(path: &str, branch: &str) -> bool {
    let (token, _) = sanitize_branch_name(branch);
    matches!(split_branch_specific(path), Some((_, found)) if found == token)
}

/// Base path of any branch override, regardless of branch.
pub fn base_path_of(path: &str) -> Option<String> {
    split_branch_specific(path).map(|(base, _)| base)
}

/// Compiled specific items of the active branch.
#[derive(Debug, Clone, Default)]
pub struct SpecificItems {
    variables: Option<GlobList>,
    resources: Option<GlobList>,
    triggers: Option<GlobList>,
    folders: Option<GlobList>,
    settings: bool,
}

impl SpecificItems {
    pub fn compile(config: &SpecificItemsConfig) -> Result<Self, SyncError> {
        let compile = |list: &Option<Vec<String>>| -> Result<Option<GlobList>, SyncError> {
            match list {
                Some(patterns) if !patterns.is_empty() => Ok(Some(GlobList::compile(patterns)?)),
                _ => Ok(None),
            }
        };
        Ok(SpecificItems {
            variables: compile(&config.variables)?,
            resources: compile(&config.resources)?,
            triggers: compile(&config.triggers)?,
            folders: compile(&config.folders)?,
            settings: config.settings.unwrap_or(false),
        })
    }

    fn list_for(&self, kind: ArtifactKind) -> Option<&GlobList> {
        match kind {
            ArtifactKind::Variable => self.variables.as_ref(),
            ArtifactKind::Resource => self.resources.as_ref(),
            ArtifactKind::Trigger(_) => self.triggers.as_ref(),
            ArtifactKind::Folder => self.folders.as_ref(),
            _ => None,
        }
    }

    /// Whether the base path is configured to be branch-specific.
    pub fn is_specific_item(&self, base: &str) -> bool {
        let Ok(kind) = classify(base) else {
            return false;
        };
        if kind == ArtifactKind::Settings {
            return self.settings && !base.contains('/');
        }
        let Some(globs) = self.list_for(kind) else {
            return false;
        };
        match kind {
            ArtifactKind::Folder => {
                let name = file_name(base);
                let dir = base[..base.len() - name.len()].trim_end_matches('/');
                globs.matches_any(dir)
            }
            ArtifactKind::Resource if is_resource_file(base) => {
                globs.matches_any(base) || globs.matches_any(&resource_document_of(base))
            }
            _ => globs.matches_any(base),
        }
    }

    /// Whether the path's kind has any branch-specific configuration.
    pub fn is_item_type_configured(&self, path: &str) -> bool {
        match classify(path) {
            Ok(ArtifactKind::Settings) => self.settings,
            Ok(kind) => self.list_for(kind).is_some(),
            Err(_) => false,
        }
    }
}

/// `f/c.resource.file.ini` -> `f/c.resource.yaml`
fn resource_document_of(path: &str) -> String {
    match path.find(RESOURCE_FILE_MARKER) {
        Some(idx) => format!("{}.resource.yaml", &path[..idx]),
        None => path.to_string(),
    }
}

/// Override path of `base` when it is a specific item of the active branch.
pub fn get_branch_specific_path(
    base: &str,
    branch: Option<&str>,
    in_repository: bool,
    items: Option<&SpecificItems>,
) -> Option<String> {
    let branch = branch?;
    if !in_repository {
        return None;
    }
    let items = items?;
    if !items.is_specific_item(base) {
        return None;
    }
    Some(to_branch_specific_path(base, branch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn items(yaml: &str) -> SpecificItems {
        let config: SpecificItemsConfig = serde_yaml::from_str(yaml).unwrap();
        SpecificItems::compile(&config).unwrap()
    }

    #[test]
    fn test_to_branch_specific_path() {
        assert_eq!(to_branch_specific_path("f/test.variable.yaml", "main"), "f/test.main.variable.yaml");
        assert_eq!(
            to_branch_specific_path("u/admin/db.resource.yaml", "develop"),
            "u/admin/db.develop.resource.yaml"
        );
        assert_eq!(
            to_branch_specific_path("f/my_trigger.http_trigger.yaml", "feature-x"),
            "f/my_trigger.feature-x.http_trigger.yaml"
        );
        assert_eq!(
            to_branch_specific_path("f/test.variable.yaml", "feature/my-feature"),
            "f/test.feature_my-feature.variable.yaml"
        );
        assert_eq!(
            to_branch_specific_path("f/test.variable.yaml", "release.1.0"),
            "f/test.release_1_0.variable.yaml"
        );
        assert_eq!(to_branch_specific_path("f/script.ts", "main"), "f/script.ts");
        assert_eq!(
            to_branch_specific_path("f/config.resource.file.json", "main"),
            "f/config.main.resource.file.json"
        );
        assert_eq!(
            to_branch_specific_path("f/my_folder/folder.meta.yaml", "main"),
            "f/my_folder/folder.main.meta.yaml"
        );
        assert_eq!(to_branch_specific_path("settings.yaml", "main"), "settings.main.yaml");
    }

    #[test]
    fn test_from_branch_specific_path() {
        assert_eq!(from_branch_specific_path("f/test.main.variable.yaml", "main"), "f/test.variable.yaml");
        assert_eq!(
            from_branch_specific_path("f/test.feature_my-feature.variable.yaml", "feature/my-feature"),
            "f/test.variable.yaml"
        );
        assert_eq!(from_branch_specific_path("f/test.variable.yaml", "main"), "f/test.variable.yaml");
        assert_eq!(
            from_branch_specific_path("f/test.dev.variable.yaml", "main"),
            "f/test.dev.variable.yaml"
        );
        assert_eq!(
            from_branch_specific_path("f/config.main.resource.file.json", "main"),
            "f/config.resource.file.json"
        );
        assert_eq!(
            from_branch_specific_path("f/env/folder.feature_test.meta.yaml", "feature/test"),
            "f/env/folder.meta.yaml"
        );
    }

    #[test]
    fn test_is_branch_specific_file() {
        assert!(is_branch_specific_file("f/test.main.variable.yaml"));
        assert!(is_branch_specific_file("u/admin/db.staging.resource.yaml"));
        assert!(is_branch_specific_file("f/my.develop.kafka_trigger.yaml"));
        assert!(is_branch_specific_file("f/config.main.resource.file.json"));
        assert!(is_branch_specific_file("f/nested/path/folder.staging.meta.yaml"));
        assert!(is_branch_specific_file("settings.main.yaml"));

        assert!(!is_branch_specific_file("f/test.variable.yaml"));
        assert!(!is_branch_specific_file("f/my.http_trigger.yaml"));
        assert!(!is_branch_specific_file("f/script.ts"));
        assert!(!is_branch_specific_file("f/config.resource.file.json"));
        assert!(!is_branch_specific_file("f/my_folder/folder.meta.yaml"));
        assert!(!is_branch_specific_file("settings.yaml"));
    }

    #[test]
    fn test_is_current_branch_file() {
        assert!(is_current_branch_file("f/my_folder/folder.staging.meta.yaml", "staging"));
        assert!(!is_current_branch_file("f/my_folder/folder.staging.meta.yaml", "production"));
        assert!(!is_current_branch_file("f/my_folder/folder.meta.yaml", "staging"));
        assert!(is_current_branch_file("f/env/folder.feature_test.meta.yaml", "feature/test"));
    }

    #[test]
    fn test_is_specific_item() {
        let vars = items("variables: [\"f/**\", \"g/**\"]");
        assert!(vars.is_specific_item("f/test.variable.yaml"));
        assert!(vars.is_specific_item("g/test.variable.yaml"));
        assert!(!vars.is_specific_item("u/admin/test.variable.yaml"));
        assert!(!vars.is_specific_item("f/test.resource.yaml"));

        let folders = items("folders: [\"f/env_*\"]");
        assert!(folders.is_specific_item("f/env_staging/folder.meta.yaml"));
        assert!(!folders.is_specific_item("f/other/folder.meta.yaml"));

        let exact = items("resources: [\"f/db.resource.yaml\"]");
        assert!(exact.is_specific_item("f/db.resource.yaml"));
        assert!(exact.is_specific_item("f/db.resource.file.json"));
        assert!(!exact.is_specific_item("f/other.resource.yaml"));

        let settings = items("settings: true");
        assert!(settings.is_specific_item("settings.yaml"));
    }

    #[test]
    fn test_item_type_configured() {
        let vars = items("variables: [\"f/specific*\"]");
        assert!(vars.is_item_type_configured("f/other.variable.yaml"));
        assert!(!vars.is_item_type_configured("f/other.resource.yaml"));
        assert!(!vars.is_item_type_configured("f/x.ts"));
    }

    #[test]
    fn test_get_branch_specific_path_requires_repository() {
        let vars = items("variables: [\"f/**\"]");
        assert_eq!(
            get_branch_specific_path("f/a.variable.yaml", Some("main"), true, Some(&vars)),
            Some("f/a.main.variable.yaml".to_string())
        );
        assert_eq!(
            get_branch_specific_path("f/a.variable.yaml", Some("main"), false, Some(&vars)),
            None
        );
        assert_eq!(get_branch_specific_path("f/a.variable.yaml", None, true, Some(&vars)), None);
        assert_eq!(get_branch_specific_path("f/a.ts", Some("main"), true, Some(&vars)), None);
    }

    fn base_paths() -> impl Strategy<Value = String> {
        let suffix = prop_oneof![
            Just(".variable.yaml".to_string()),
            Just(".resource.json".to_string()),
            Just(".resource.file.ini".to_string()),
            Just(".http_trigger.yaml".to_string()),
            Just(".websocket_trigger.yaml".to_string()),
            Just(".kafka_trigger.yaml".to_string()),
            Just(".nats_trigger.yaml".to_string()),
            Just(".postgres_trigger.yaml".to_string()),
            Just(".mqtt_trigger.yaml".to_string()),
            Just(".sqs_trigger.yaml".to_string()),
            Just(".gcp_trigger.yaml".to_string()),
            Just(".email_trigger.yaml".to_string()),
        ];
        ("[fgu]", "[a-z_]{1,8}", "[a-z0-9_]{1,8}", suffix)
            .prop_map(|(root, dir, name, suffix)| format!("{}/{}/{}{}", root, dir, name, suffix))
    }

    proptest! {
        #[test]
        fn prop_branch_path_round_trip(base in base_paths(), branch in "[a-zA-Z0-9/._:-]{0,16}") {
            let specific = to_branch_specific_path(&base, &branch);
            prop_assert_eq!(from_branch_specific_path(&specific, &branch), base);
        }

        #[test]
        fn prop_folder_round_trip(dir in "[a-z_]{1,8}(/[a-z_]{1,8}){0,2}", branch in "[a-z0-9/.-]{1,12}") {
            let base = format!("f/{}/folder.meta.yaml", dir);
            let specific = to_branch_specific_path(&base, &branch);
            prop_assert_eq!(from_branch_specific_path(&specific, &branch), base);
        }
    }
}
