//! Derived-state regeneration
//!
//! Script descriptors carry state derived from the code: the input schema,
//! entrypoint flags and the resolved dependency lock. Flows and raw apps
//! carry locks for each inline script. Regeneration recomputes that state
//! only for artifacts whose inputs changed since the last run, using the
//! lockfile hashes as the record of what was last computed.

use crate::artifact::document::{parse_document, render, DocumentFormat};
use crate::artifact::inline::{inline_ref, language_from_path, parse_inline_ref};
use crate::artifact::kind::{is_script_content, remove_script_extension};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::store::state::write_file;
use crate::store::Lockfile;
use crate::sync::tracker::ChangeTracker;
use crate::tree::hasher::hash_parts;
use crate::tree::{walk_files, LocalTree};
use crate::types::ContentHash;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Lockfile subpath holding the hash of a whole flow.
pub const FLOW_HASH_KEY: &str = "__flow_hash";
/// Lockfile subpath holding the hash of a whole raw app.
pub const APP_HASH_KEY: &str = "__app_hash";

/// Schema and entrypoint facts inferred from script code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferredSchema {
    pub schema: Option<Value>,
    pub has_preprocessor: bool,
    pub no_main_func: bool,
}

/// Computes derived state. Implemented by the remote client; tests use
/// in-process fakes.
#[async_trait]
pub trait MetadataGenerator: Send + Sync {
    async fn infer_schema(
        &self,
        content: &str,
        language: &str,
        current: Option<&Value>,
    ) -> Result<InferredSchema, SyncError>;

    /// Resolve the dependency lock of one script. `dependencies` is the JSON
    /// map of workspace dependency files.
    async fn resolve_lock(
        &self,
        path: &str,
        content: &str,
        language: &str,
        dependencies: &str,
    ) -> Result<String, SyncError>;
}

/// Entrypoint detection by scanning the source text. The schema itself is
/// kept as is.
pub fn scan_entrypoints(content: &str, language: &str, current: Option<&Value>) -> InferredSchema {
    let (main, preprocessor): (&[&str], &[&str]) = match language {
        "python3" => (&["def main("], &["def preprocessor("]),
        "bun" | "deno" | "nativets" | "bunnative" => (
            &["function main(", "const main ="],
            &["function preprocessor(", "const preprocessor ="],
        ),
        "go" => (&["func main("], &["func preprocessor("]),
        "rust" => (&["fn main("], &["fn preprocessor("]),
        "php" => (&["function main("], &["function preprocessor("]),
        "csharp" => (&[" Main("], &[" Preprocessor("]),
        "java" => (&[" main("], &[" preprocessor("]),
        "nu" => (&["def main"], &["def preprocessor"]),
        _ => (&[], &[]),
    };
    InferredSchema {
        schema: current.cloned(),
        has_preprocessor: preprocessor.iter().any(|p| content.contains(p)),
        no_main_func: !main.is_empty() && !main.iter().any(|m| content.contains(m)),
    }
}

/// What to do with artifacts whose lockfile hash is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationMode {
    /// Record current hashes without recomputing (the remote is
    /// authoritative after a pull).
    RecordOnly,
    /// Only report stale artifacts.
    CheckStale,
    /// Recompute derived state through the generator.
    Regenerate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegenerationReport {
    pub regenerated: Vec<String>,
    pub recorded: Vec<String>,
    pub up_to_date: Vec<String>,
    pub stale: Vec<String>,
    /// Path and error message.
    pub failed: Vec<(String, String)>,
}

enum Outcome {
    UpToDate,
    Recorded,
    Stale,
    Regenerated,
}

/// Lockfile-driven regeneration over the local tree.
pub struct Regenerator<'a> {
    ctx: &'a SyncContext,
    generator: Option<&'a dyn MetadataGenerator>,
    dependencies: String,
}

impl<'a> Regenerator<'a> {
    pub fn new(ctx: &'a SyncContext, generator: Option<&'a dyn MetadataGenerator>) -> Self {
        Regenerator {
            dependencies: workspace_dependencies(&ctx.root),
            ctx,
            generator,
        }
    }

    pub async fn run(
        &self,
        tracker: &ChangeTracker,
        lockfile: &mut Lockfile,
        mode: RegenerationMode,
    ) -> RegenerationReport {
        let mut report = RegenerationReport::default();
        for script in &tracker.scripts {
            let outcome = self.script(script, lockfile, mode).await;
            record_outcome(&mut report, script, outcome);
        }
        for flow in &tracker.flows {
            let outcome = self.container(flow, FLOW_HASH_KEY, lockfile, mode).await;
            record_outcome(&mut report, flow, outcome);
        }
        for raw_app in &tracker.raw_apps {
            let outcome = self.container(raw_app, APP_HASH_KEY, lockfile, mode).await;
            record_outcome(&mut report, raw_app, outcome);
        }
        if !tracker.apps.is_empty() {
            info!(apps = ?tracker.apps, "App inline scripts changed, their locks are not regenerated");
        }
        report
    }

    async fn read(&self, path: &str) -> Result<String, SyncError> {
        let file = self.ctx.root.join(path);
        tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| SyncError::io(file, e))
    }

    fn regeneration_error(path: &str, message: impl ToString) -> SyncError {
        SyncError::Regeneration {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    async fn script(
        &self,
        content_path: &str,
        lockfile: &mut Lockfile,
        mode: RegenerationMode,
    ) -> Result<Outcome, SyncError> {
        let content = self.read(content_path).await?;
        let language = language_from_path(content_path, self.ctx.options.default_ts)
            .ok_or_else(|| Self::regeneration_error(content_path, "unknown script language"))?;
        let remote = remove_script_extension(content_path).to_string();
        let meta_path = self.metadata_path(&remote);
        let meta_text = self.read(&meta_path).await.unwrap_or_default();
        let hash = script_hash(&self.dependencies, &content, &meta_text);

        if lockfile.is_up_to_date(&remote, &hash, None) {
            return Ok(Outcome::UpToDate);
        }
        let generator = match (mode, self.generator) {
            (RegenerationMode::RecordOnly, _) => {
                lockfile.record(&remote, hash, None);
                return Ok(Outcome::Recorded);
            }
            (RegenerationMode::CheckStale, _) | (RegenerationMode::Regenerate, None) => {
                return Ok(Outcome::Stale)
            }
            (RegenerationMode::Regenerate, Some(generator)) => generator,
        };

        let mut meta = if meta_text.trim().is_empty() {
            Map::new()
        } else {
            match parse_document(&meta_path, &meta_text)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        };
        let inferred = generator
            .infer_schema(&content, language, meta.get("schema"))
            .await?;
        if let Some(schema) = inferred.schema {
            meta.insert("schema".to_string(), schema);
        }
        set_flag(&mut meta, "has_preprocessor", inferred.has_preprocessor);
        set_flag(&mut meta, "no_main_func", inferred.no_main_func);

        if self.ctx.codebases.is_bound(content_path) {
            meta.remove("lock");
        } else {
            let lock = generator
                .resolve_lock(&remote, &content, language, &self.dependencies)
                .await?;
            if lock.is_empty() {
                meta.insert("lock".to_string(), Value::String(String::new()));
            } else {
                let lock_path = format!("{}.script.lock", remote);
                write_file(&self.ctx.root.join(&lock_path), &lock).await?;
                meta.insert("lock".to_string(), Value::String(inline_ref(&lock_path)));
            }
        }

        let format = DocumentFormat::from_json_flag(meta_path.ends_with(".json"));
        let new_text = render(&Value::Object(meta), format)?;
        write_file(&self.ctx.root.join(&meta_path), &new_text).await?;
        lockfile.record(&remote, script_hash(&self.dependencies, &content, &new_text), None);
        info!(script = %remote, "Regenerated script metadata");
        Ok(Outcome::Regenerated)
    }

    /// Existing descriptor of a script, or where a new one goes.
    fn metadata_path(&self, remote: &str) -> String {
        for ext in ["yaml", "json"] {
            let candidate = format!("{}.script.{}", remote, ext);
            if self.ctx.root.join(&candidate).is_file() {
                return candidate;
            }
        }
        format!("{}.script.{}", remote, self.ctx.format.extension())
    }

    /// Flows and raw apps: one hash per inline script plus one for the whole
    /// container.
    async fn container(
        &self,
        root_dir: &str,
        marker: &str,
        lockfile: &mut Lockfile,
        mode: RegenerationMode,
    ) -> Result<Outcome, SyncError> {
        let key = root_dir.trim_end_matches('/');
        let files = self.container_files(key).await?;
        let hashes = self.inline_hashes(&files);
        let whole = container_hash(&self.dependencies, &files);

        if lockfile.is_up_to_date(key, &whole, Some(marker)) {
            return Ok(Outcome::UpToDate);
        }
        let generator = match (mode, self.generator) {
            (RegenerationMode::RecordOnly, _) => {
                record_container(lockfile, key, marker, whole, hashes);
                return Ok(Outcome::Recorded);
            }
            (RegenerationMode::CheckStale, _) | (RegenerationMode::Regenerate, None) => {
                return Ok(Outcome::Stale)
            }
            (RegenerationMode::Regenerate, Some(generator)) => generator,
        };

        let (descriptor_path, descriptor_text) = files
            .iter()
            .find(|(path, _)| is_container_descriptor(path))
            .map(|(p, t)| (p.clone(), t.clone()))
            .ok_or_else(|| Self::regeneration_error(key, "missing descriptor"))?;
        let mut doc = parse_document(&descriptor_path, &descriptor_text)?;

        let mut targets = Vec::new();
        for_each_inline_script(&mut doc, &mut |script| {
            let target = script
                .get("content")
                .and_then(Value::as_str)
                .and_then(parse_inline_ref)
                .map(str::to_string);
            let language = script.get("language").and_then(Value::as_str).map(str::to_string);
            if let (Some(target), Some(language)) = (target, language) {
                targets.push((target, language));
            }
        });

        let mut locks = HashMap::new();
        for (target, language) in targets {
            let Some(content) = files.get(&target) else {
                warn!(container = %key, file = %target, "Inline script referenced but missing");
                continue;
            };
            let fresh = hashes
                .get(&target)
                .map(|h| lockfile.is_up_to_date(key, h, Some(&target)))
                .unwrap_or(false);
            if fresh {
                continue;
            }
            let path = format!("{}/{}", key, target);
            let lock = generator
                .resolve_lock(&path, content, &language, &self.dependencies)
                .await?;
            locks.insert(target, lock);
        }

        for (target, lock) in &locks {
            if lock.is_empty() {
                continue;
            }
            write_file(&self.ctx.root.join(key).join(lock_file_name(target)), lock).await?;
        }
        for_each_inline_script(&mut doc, &mut |script| {
            let target = script
                .get("content")
                .and_then(Value::as_str)
                .and_then(parse_inline_ref)
                .map(str::to_string);
            if let Some(lock) = target.as_ref().and_then(|t| locks.get(t).map(|l| (t, l))) {
                let value = if lock.1.is_empty() {
                    String::new()
                } else {
                    inline_ref(&lock_file_name(lock.0))
                };
                script.insert("lock".to_string(), Value::String(value));
            }
        });

        let format = DocumentFormat::from_json_flag(descriptor_path.ends_with(".json"));
        write_file(
            &self.ctx.root.join(key).join(&descriptor_path),
            &render(&doc, format)?,
        )
        .await?;

        let files = self.container_files(key).await?;
        let hashes = self.inline_hashes(&files);
        lockfile.clear(key);
        record_container(lockfile, key, marker, container_hash(&self.dependencies, &files), hashes);
        info!(container = %key, locks = locks.len(), "Regenerated inline script locks");
        Ok(Outcome::Regenerated)
    }

    /// Files of a container, keyed relative to its directory.
    async fn container_files(&self, key: &str) -> Result<BTreeMap<String, String>, SyncError> {
        let dir = self.ctx.root.join(key);
        if !dir.is_dir() {
            return Err(Self::regeneration_error(key, "directory not found"));
        }
        let root = LocalTree::plain(&dir).root();
        let mut files = BTreeMap::new();
        for entry in walk_files(root, |_, _| false).await {
            let content = entry.node.content().await?;
            files.insert(entry.path().to_string(), content);
        }
        Ok(files)
    }

    fn inline_hashes(&self, files: &BTreeMap<String, String>) -> BTreeMap<String, ContentHash> {
        files
            .iter()
            .filter(|(path, _)| is_script_content(path))
            .map(|(path, content)| {
                (
                    path.clone(),
                    hash_parts([self.dependencies.as_str(), content.as_str()]),
                )
            })
            .collect()
    }
}

fn record_outcome(report: &mut RegenerationReport, path: &str, outcome: Result<Outcome, SyncError>) {
    let path = path.to_string();
    match outcome {
        Ok(Outcome::UpToDate) => report.up_to_date.push(path),
        Ok(Outcome::Recorded) => report.recorded.push(path),
        Ok(Outcome::Stale) => report.stale.push(path),
        Ok(Outcome::Regenerated) => report.regenerated.push(path),
        Err(e) => {
            warn!(%path, error = %e, "Derived state could not be regenerated, leaving it stale");
            report.failed.push((path, e.to_string()));
        }
    }
}

fn record_container(
    lockfile: &mut Lockfile,
    key: &str,
    marker: &str,
    whole: ContentHash,
    hashes: BTreeMap<String, ContentHash>,
) {
    for (subpath, hash) in hashes {
        lockfile.record(key, hash, Some(&subpath));
    }
    lockfile.record(key, whole, Some(marker));
    debug!(container = %key, "Recorded container hashes");
}

fn set_flag(meta: &mut Map<String, Value>, key: &str, on: bool) {
    if on {
        meta.insert(key.to_string(), Value::Bool(true));
    } else {
        meta.remove(key);
    }
}

fn is_container_descriptor(path: &str) -> bool {
    matches!(
        path,
        "flow.yaml" | "flow.json" | "raw_app.yaml" | "raw_app.json" | "app.yaml" | "app.json"
    )
}

/// `a.inline_script.py` locks into `a.inline_script.lock`.
fn lock_file_name(target: &str) -> String {
    match target.find(".inline_script.") {
        Some(idx) => format!("{}lock", &target[..idx + ".inline_script.".len()]),
        None => format!("{}.lock", remove_script_extension(target)),
    }
}

pub fn script_hash(dependencies: &str, content: &str, metadata: &str) -> ContentHash {
    hash_parts([dependencies, content, metadata])
}

/// Hash over every non-lock file of a container.
fn container_hash(dependencies: &str, files: &BTreeMap<String, String>) -> ContentHash {
    let mut parts = vec![dependencies];
    for (path, content) in files {
        if path.ends_with(".lock") {
            continue;
        }
        parts.push(path.as_str());
        parts.push(content.as_str());
    }
    hash_parts(parts)
}

/// Visit every object that carries inline code: flow raw script modules and
/// app `inlineScript` objects alike have `content` and `language`.
fn for_each_inline_script<F>(value: &mut Value, f: &mut F)
where
    F: FnMut(&mut Map<String, Value>),
{
    match value {
        Value::Object(map) => {
            if map.contains_key("content") && map.contains_key("language") {
                f(map);
            }
            for child in map.values_mut() {
                for_each_inline_script(child, f);
            }
        }
        Value::Array(items) => {
            for item in items {
                for_each_inline_script(item, f);
            }
        }
        _ => {}
    }
}

/// Workspace dependency files under `dependencies/`, as a JSON map.
fn workspace_dependencies(root: &Path) -> String {
    let dir = root.join("dependencies");
    let mut deps = BTreeMap::new();
    for entry in walkdir::WalkDir::new(&dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        match std::fs::read_to_string(entry.path()) {
            Ok(text) => {
                deps.insert(relative.to_string_lossy().replace('\\', "/"), text);
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Unreadable dependency file"),
        }
    }
    serde_json::to_string(&deps).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncOptions;
    use crate::context::BranchInfo;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeGenerator {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MetadataGenerator for FakeGenerator {
        async fn infer_schema(
            &self,
            content: &str,
            language: &str,
            _current: Option<&Value>,
        ) -> Result<InferredSchema, SyncError> {
            let mut inferred = scan_entrypoints(content, language, None);
            inferred.schema = Some(serde_json::json!({"type": "object"}));
            Ok(inferred)
        }

        async fn resolve_lock(
            &self,
            path: &str,
            _content: &str,
            language: &str,
            _dependencies: &str,
        ) -> Result<String, SyncError> {
            self.calls.lock().push(path.to_string());
            Ok(format!("# lock for {} ({})\n", path, language))
        }
    }

    fn context(root: &Path) -> SyncContext {
        SyncContext::new(root, SyncOptions::default(), BranchInfo::default(), None).unwrap()
    }

    fn write(root: &Path, path: &str, content: &str) {
        let file = root.join(path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(file, content).unwrap();
    }

    #[test]
    fn test_scan_entrypoints() {
        let py = scan_entrypoints("def main(x):\n  pass\n", "python3", None);
        assert!(!py.no_main_func && !py.has_preprocessor);
        let ts = scan_entrypoints("export async function preprocessor() {}", "bun", None);
        assert!(ts.no_main_func && ts.has_preprocessor);
        let sql = scan_entrypoints("select 1", "postgresql", None);
        assert!(!sql.no_main_func);
    }

    #[test]
    fn test_lock_file_names() {
        assert_eq!(lock_file_name("a.inline_script.py"), "a.inline_script.lock");
        assert_eq!(lock_file_name("load.inline_script.pg.sql"), "load.inline_script.lock");
    }

    #[tokio::test]
    async fn test_script_regenerated_once_then_up_to_date() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "f/x.py", "def main():\n  return 1\n");
        write(dir.path(), "f/x.script.yaml", "summary: x\nlock: ''\n");
        let ctx = context(dir.path());
        let generator = FakeGenerator::default();
        let regenerator = Regenerator::new(&ctx, Some(&generator));
        let mut lockfile = Lockfile::in_memory(dir.path());
        let tracker = ChangeTracker {
            scripts: vec!["f/x.py".to_string()],
            ..Default::default()
        };

        let report = regenerator
            .run(&tracker, &mut lockfile, RegenerationMode::Regenerate)
            .await;
        assert_eq!(report.regenerated, vec!["f/x.py"]);
        let meta = std::fs::read_to_string(dir.path().join("f/x.script.yaml")).unwrap();
        assert!(meta.contains("!inline f/x.script.lock"));
        assert!(meta.contains("type: object"));
        assert!(dir.path().join("f/x.script.lock").is_file());

        let report = regenerator
            .run(&tracker, &mut lockfile, RegenerationMode::Regenerate)
            .await;
        assert_eq!(report.up_to_date, vec!["f/x.py"]);
        assert_eq!(generator.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_check_stale_and_record_only() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "f/x.py", "def main():\n  return 1\n");
        let ctx = context(dir.path());
        let regenerator = Regenerator::new(&ctx, None);
        let mut lockfile = Lockfile::in_memory(dir.path());
        let tracker = ChangeTracker {
            scripts: vec!["f/x.py".to_string()],
            ..Default::default()
        };

        let report = regenerator.run(&tracker, &mut lockfile, RegenerationMode::CheckStale).await;
        assert_eq!(report.stale, vec!["f/x.py"]);
        let report = regenerator.run(&tracker, &mut lockfile, RegenerationMode::RecordOnly).await;
        assert_eq!(report.recorded, vec!["f/x.py"]);
        let report = regenerator.run(&tracker, &mut lockfile, RegenerationMode::CheckStale).await;
        assert_eq!(report.up_to_date, vec!["f/x.py"]);
    }

    #[tokio::test]
    async fn test_flow_locks_written_next_to_inline_scripts() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "f/etl.flow/flow.yaml",
            "summary: etl\nvalue:\n  modules:\n    - id: a\n      value:\n        type: rawscript\n        language: python3\n        content: '!inline a.inline_script.py'\n",
        );
        write(dir.path(), "f/etl.flow/a.inline_script.py", "def main():\n  pass\n");
        let ctx = context(dir.path());
        let generator = FakeGenerator::default();
        let regenerator = Regenerator::new(&ctx, Some(&generator));
        let mut lockfile = Lockfile::in_memory(dir.path());
        let tracker = ChangeTracker {
            flows: vec!["f/etl.flow/".to_string()],
            ..Default::default()
        };

        let report = regenerator
            .run(&tracker, &mut lockfile, RegenerationMode::Regenerate)
            .await;
        assert_eq!(report.regenerated, vec!["f/etl.flow/"]);
        assert!(dir.path().join("f/etl.flow/a.inline_script.lock").is_file());
        let flow = std::fs::read_to_string(dir.path().join("f/etl.flow/flow.yaml")).unwrap();
        assert!(flow.contains("a.inline_script.lock"));
        assert_eq!(*generator.calls.lock(), vec!["f/etl.flow/a.inline_script.py"]);

        let report = regenerator
            .run(&tracker, &mut lockfile, RegenerationMode::Regenerate)
            .await;
        assert_eq!(report.up_to_date, vec!["f/etl.flow/"]);
    }

    #[tokio::test]
    async fn test_missing_script_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let regenerator = Regenerator::new(&ctx, None);
        let mut lockfile = Lockfile::in_memory(dir.path());
        let tracker = ChangeTracker {
            scripts: vec!["f/gone.py".to_string()],
            ..Default::default()
        };
        let report = regenerator.run(&tracker, &mut lockfile, RegenerationMode::RecordOnly).await;
        assert_eq!(report.failed.len(), 1);
    }
}
