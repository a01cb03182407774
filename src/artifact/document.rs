//! Structured descriptor documents: parsing and canonical rendering.

use crate::error::SyncError;
use serde_json::Value;
use serde_yaml::{Mapping, Value as YamlValue};

/// Keys rendered first, in this order.
const PRIORITY_KEYS: &[&str] = &[
    "version",
    "id",
    "type",
    "summary",
    "name",
    "display_name",
    "description",
    "value",
    "content",
    "modules",
    "failure_module",
    "input_transforms",
];

/// Keys rendered last, in this order.
const TRAILING_KEYS: &[&str] = &["lock", "locks"];

/// On-disk encoding of descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            DocumentFormat::Json
        } else {
            DocumentFormat::Yaml
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Yaml => "yaml",
            DocumentFormat::Json => "json",
        }
    }
}

fn key_rank(key: &str) -> (usize, &str) {
    if let Some(i) = PRIORITY_KEYS.iter().position(|k| *k == key) {
        return (i, "");
    }
    if let Some(i) = TRAILING_KEYS.iter().position(|k| *k == key) {
        return (PRIORITY_KEYS.len() + 1 + i, "");
    }
    (PRIORITY_KEYS.len(), key)
}

/// Parse a descriptor, choosing the decoder from the path extension.
pub fn parse_document(path: &str, text: &str) -> Result<Value, SyncError> {
    if path.ends_with(".json") {
        serde_json::from_str(text).map_err(|e| SyncError::parse(path, e))
    } else {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        let yaml: YamlValue = serde_yaml::from_str(text).map_err(|e| SyncError::parse(path, e))?;
        Ok(yaml_to_json(yaml))
    }
}

/// Convert YAML to JSON. An `!inline path` tag becomes the string
/// `"!inline path"`, the form used for inline references everywhere else.
fn yaml_to_json(value: YamlValue) -> Value {
    match value {
        YamlValue::Null => Value::Null,
        YamlValue::Bool(b) => Value::Bool(b),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        YamlValue::String(s) => Value::String(s),
        YamlValue::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        YamlValue::Mapping(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (yaml_key(k), yaml_to_json(v)))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            match (tag.trim_start_matches('!'), tagged.value) {
                ("inline", YamlValue::String(s)) => Value::String(format!("!inline {}", s)),
                (_, inner) => yaml_to_json(inner),
            }
        }
    }
}

fn yaml_key(key: YamlValue) -> String {
    match key {
        YamlValue::String(s) => s,
        YamlValue::Bool(b) => b.to_string(),
        YamlValue::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Render with the canonical key order.
pub fn render_yaml(value: &Value) -> Result<String, SyncError> {
    serde_yaml::to_string(&ordered(value)).map_err(|e| SyncError::parse("<yaml>", e))
}

pub fn render_json(value: &Value) -> Result<String, SyncError> {
    serde_json::to_string_pretty(value).map_err(|e| SyncError::parse("<json>", e))
}

pub fn render(value: &Value, format: DocumentFormat) -> Result<String, SyncError> {
    match format {
        DocumentFormat::Yaml => render_yaml(value),
        DocumentFormat::Json => render_json(value),
    }
}

fn ordered(value: &Value) -> YamlValue {
    match value {
        Value::Null => YamlValue::Null,
        Value::Bool(b) => YamlValue::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                YamlValue::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                YamlValue::Number(u.into())
            } else {
                YamlValue::Number(n.as_f64().unwrap_or_default().into())
            }
        }
        Value::String(s) => YamlValue::String(s.clone()),
        Value::Array(items) => YamlValue::Sequence(items.iter().map(ordered).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| key_rank(a).cmp(&key_rank(b)));
            let mut out = Mapping::new();
            for key in keys {
                out.insert(YamlValue::String(key.clone()), ordered(&map[key.as_str()]));
            }
            YamlValue::Mapping(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_keys_come_first_and_locks_last() {
        let doc = json!({
            "lock": "x",
            "alpha": 1,
            "summary": "s",
            "locks": {},
            "value": 2,
            "id": "a",
            "beta": true,
        });
        let text = render_yaml(&doc).unwrap();
        let keys: Vec<&str> = text
            .lines()
            .filter(|l| !l.starts_with(' '))
            .map(|l| l.split(':').next().unwrap())
            .collect();
        assert_eq!(keys, vec!["id", "summary", "value", "alpha", "beta", "lock", "locks"]);
    }

    #[test]
    fn test_nested_maps_are_ordered() {
        let doc = json!({"value": {"modules": [], "content": "c", "aaa": 1}});
        let text = render_yaml(&doc).unwrap();
        let content = text.find("content").unwrap();
        let modules = text.find("modules").unwrap();
        let aaa = text.find("aaa").unwrap();
        assert!(content < modules && modules < aaa);
    }

    #[test]
    fn test_parse_by_extension() {
        let yaml = parse_document("f/a.variable.yaml", "value: 1\n").unwrap();
        let json = parse_document("f/a.variable.json", "{\"value\": 1}").unwrap();
        assert_eq!(yaml, json);
        assert!(parse_document("f/a.variable.json", "value: 1").is_err());
    }

    #[test]
    fn test_inline_tag_is_read_as_reference() {
        let doc = parse_document("f/x.flow/flow.yaml", "content: !inline a.inline_script.ts\n").unwrap();
        assert_eq!(doc, json!({"content": "!inline a.inline_script.ts"}));
    }

    #[test]
    fn test_inline_reference_survives_rendering() {
        let doc = json!({"content": "!inline f/a.inline_script.py"});
        let text = render_yaml(&doc).unwrap();
        let back = parse_document("x.yaml", &text).unwrap();
        assert_eq!(back, doc);
    }
}
