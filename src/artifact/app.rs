//! App and raw app documents.

use super::inline::{inline_ref, PathAssigner};
use super::InlineFile;
use serde_json::{Map, Value};

/// Move every `inlineScript` found anywhere under `rec` into separate files.
/// Names come from the `name` of the object holding the inline script.
pub fn extract_inline_scripts(rec: &mut Value, assigner: &mut PathAssigner) -> Vec<InlineFile> {
    let mut files = Vec::new();
    collect(rec, assigner, &mut files);
    files
}

fn collect(rec: &mut Value, assigner: &mut PathAssigner, files: &mut Vec<InlineFile>) {
    match rec {
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str).map(str::to_string);
            for (key, value) in map.iter_mut() {
                match value {
                    Value::Object(script) if key == "inlineScript" => {
                        extract_one(script, name.as_deref(), assigner, files);
                    }
                    other => collect(other, assigner, files),
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                collect(item, assigner, files);
            }
        }
        _ => {}
    }
}

fn extract_one(
    script: &mut Map<String, Value>,
    name: Option<&str>,
    assigner: &mut PathAssigner,
    files: &mut Vec<InlineFile>,
) {
    let language = script
        .get("language")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let (base, ext) = assigner.assign(name, &language);

    if let Some(content) = non_empty_str(script.get("content")) {
        let path = format!("{}{}", base, ext);
        script.insert("content".to_string(), Value::String(inline_ref(&path)));
        files.push(InlineFile { path, content });
    }
    if let Some(lock) = non_empty_str(script.get("lock")) {
        let path = format!("{}lock", base);
        script.insert("lock".to_string(), Value::String(inline_ref(&path)));
        files.push(InlineFile {
            path,
            content: lock,
        });
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Split a raw app document into its descriptor and frontend files.
///
/// The `value.files` map (keys like `/index.tsx`) becomes one file per entry;
/// runnable inline scripts are extracted like app inline scripts.
pub fn explode_raw_app(doc: &mut Value, assigner: &mut PathAssigner) -> Vec<InlineFile> {
    let mut out = Vec::new();
    let Some(value) = doc.get_mut("value").and_then(Value::as_object_mut) else {
        return out;
    };
    if let Some(Value::Object(files)) = value.remove("files") {
        for (path, content) in files {
            let content = match content {
                Value::String(s) => s,
                other => other.to_string(),
            };
            out.push(InlineFile {
                path: path.trim_start_matches('/').to_string(),
                content,
            });
        }
    }
    if let Some(runnables) = value.get_mut("runnables") {
        out.extend(extract_inline_scripts(runnables, assigner));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultTs;
    use serde_json::json;

    #[test]
    fn test_app_inline_scripts_are_named_after_component() {
        let mut app = json!({
            "value": {
                "grid": [{"data": {"componentInput": {"runnable": {
                    "name": "Load Rows",
                    "inlineScript": {"language": "postgresql", "content": "select 1", "lock": ""}
                }}}}]
            }
        });
        let mut assigner = PathAssigner::new(DefaultTs::Bun);
        let files = extract_inline_scripts(&mut app, &mut assigner);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "load_rows.inline_script.pg.sql");
        assert_eq!(files[0].content, "select 1");
        let script = &app["value"]["grid"][0]["data"]["componentInput"]["runnable"]["inlineScript"];
        assert_eq!(script["content"], json!("!inline load_rows.inline_script.pg.sql"));
        assert_eq!(script["lock"], json!(""));
    }

    #[test]
    fn test_raw_app_files_and_runnables() {
        let mut doc = json!({
            "summary": "dashboard",
            "value": {
                "files": {"/index.tsx": "export default 1", "/lib/util.ts": "x"},
                "runnables": {"a": {"name": "a", "inlineScript": {"language": "python3", "content": "print(1)"}}}
            }
        });
        let mut assigner = PathAssigner::new(DefaultTs::Bun);
        let mut files = explode_raw_app(&mut doc, &mut assigner);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.inline_script.py", "index.tsx", "lib/util.ts"]);
        assert!(doc["value"].get("files").is_none());
    }
}
