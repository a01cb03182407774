//! Structural validation of descriptor documents.
//!
//! Flow, schedule and trigger documents are checked for required fields and
//! field types before a push when linting is enabled. The target is inferred
//! from the file name.

use super::document::parse_document;
use super::kind::{try_classify, ArtifactKind, TriggerKind};
use serde::Serialize;
use serde_json::{Map, Value};

/// What a document is validated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTarget {
    Flow,
    Schedule,
    Trigger(TriggerKind),
}

impl ValidationTarget {
    /// Target of a descriptor file, `None` for files that are not validated.
    pub fn from_filename(path: &str) -> Option<Self> {
        if !(path.ends_with(".yaml") || path.ends_with(".json")) {
            return None;
        }
        if path.ends_with(".flow/flow.yaml") || path.ends_with(".flow/flow.json") {
            return Some(ValidationTarget::Flow);
        }
        match try_classify(path)? {
            ArtifactKind::Schedule => Some(ValidationTarget::Schedule),
            ArtifactKind::Trigger(kind) => Some(ValidationTarget::Trigger(kind)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Boolean,
    Array,
    Object,
    Number,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
            FieldType::Number => value.is_number(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
            FieldType::Number => "number",
        }
    }
}

/// One schema violation. `pointer` locates the field, e.g. `/retry/constant`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub pointer: String,
    pub keyword: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Parse errors. A document that does not parse has no violations.
    pub diagnostics: Vec<String>,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty() && self.violations.is_empty()
    }
}

/// Validates descriptor text against the schema of its target.
pub trait DocumentValidator: Send + Sync {
    fn validate(&self, path: &str, text: &str, target: ValidationTarget) -> ValidationReport;
}

/// Built-in validator checking required fields, types and retry bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

const RUNNABLE: &[(&str, FieldType)] = &[("script_path", FieldType::String), ("is_flow", FieldType::Boolean)];

const SCHEDULE: &[(&str, FieldType)] = &[
    ("schedule", FieldType::String),
    ("timezone", FieldType::String),
    ("enabled", FieldType::Boolean),
    ("script_path", FieldType::String),
    ("is_flow", FieldType::Boolean),
];

fn trigger_fields(kind: TriggerKind) -> &'static [(&'static str, FieldType)] {
    use FieldType::*;
    match kind {
        TriggerKind::Http => &[
            ("route_path", String),
            ("request_type", String),
            ("authentication_method", String),
            ("http_method", String),
            ("is_static_website", Boolean),
            ("workspaced_route", Boolean),
            ("wrap_body", Boolean),
            ("raw_string", Boolean),
        ],
        TriggerKind::Websocket => &[
            ("url", String),
            ("filters", Array),
            ("can_return_message", Boolean),
            ("can_return_error_result", Boolean),
        ],
        TriggerKind::Kafka => &[
            ("kafka_resource_path", String),
            ("group_id", String),
            ("topics", Array),
            ("filters", Array),
        ],
        TriggerKind::Nats => &[
            ("nats_resource_path", String),
            ("use_jetstream", Boolean),
            ("subjects", Array),
        ],
        TriggerKind::Postgres => &[
            ("postgres_resource_path", String),
            ("publication_name", String),
            ("replication_slot_name", String),
        ],
        TriggerKind::Mqtt => &[("mqtt_resource_path", String), ("subscribe_topics", Array)],
        TriggerKind::Sqs => &[
            ("queue_url", String),
            ("aws_resource_path", String),
            ("aws_auth_resource_type", String),
        ],
        TriggerKind::Gcp => &[
            ("gcp_resource_path", String),
            ("topic_id", String),
            ("subscription_id", String),
            ("delivery_type", String),
            ("subscription_mode", String),
        ],
        TriggerKind::Email => &[("local_part", String)],
    }
}

fn require(doc: &Map<String, Value>, base: &str, fields: &[(&str, FieldType)], out: &mut Vec<Violation>) {
    for (field, expected) in fields {
        let pointer = format!("{}/{}", base, field);
        match doc.get(*field) {
            None => out.push(Violation {
                pointer,
                keyword: "required",
                message: format!("missing required property '{}'", field),
            }),
            Some(value) if !expected.accepts(value) => out.push(Violation {
                pointer,
                keyword: "type",
                message: format!("must be {}", expected.name()),
            }),
            Some(_) => {}
        }
    }
}

fn bound(value: Option<&Value>, pointer: String, min: f64, max: Option<f64>, out: &mut Vec<Violation>) {
    let Some(n) = value.and_then(Value::as_f64) else {
        return;
    };
    if n < min {
        out.push(Violation {
            pointer,
            keyword: "minimum",
            message: format!("must be >= {}", min),
        });
    } else if let Some(max) = max.filter(|max| n > *max) {
        out.push(Violation {
            pointer,
            keyword: "maximum",
            message: format!("must be <= {}", max),
        });
    }
}

/// Retry policy shared by schedules and triggers. `null` means no policy.
fn check_retry(doc: &Map<String, Value>, out: &mut Vec<Violation>) {
    let Some(Value::Object(retry)) = doc.get("retry") else {
        return;
    };
    if let Some(Value::Object(constant)) = retry.get("constant") {
        bound(constant.get("seconds"), "/retry/constant/seconds".into(), 0.0, None, out);
    }
    if let Some(Value::Object(exponential)) = retry.get("exponential") {
        bound(exponential.get("seconds"), "/retry/exponential/seconds".into(), 1.0, None, out);
        bound(
            exponential.get("random_factor"),
            "/retry/exponential/random_factor".into(),
            0.0,
            Some(100.0),
            out,
        );
    }
    if let Some(Value::Object(retry_if)) = retry.get("retry_if") {
        require(retry_if, "/retry/retry_if", &[("expr", FieldType::String)], out);
    }
}

fn check_flow(doc: &Map<String, Value>, out: &mut Vec<Violation>) {
    require(doc, "", &[("value", FieldType::Object)], out);
    if let Some(Value::Object(value)) = doc.get("value") {
        require(value, "/value", &[("modules", FieldType::Array)], out);
    }
    if let Some(summary) = doc.get("summary") {
        if !summary.is_null() && !summary.is_string() {
            out.push(Violation {
                pointer: "/summary".to_string(),
                keyword: "type",
                message: "must be string".to_string(),
            });
        }
    }
}

impl DocumentValidator for SchemaValidator {
    fn validate(&self, path: &str, text: &str, target: ValidationTarget) -> ValidationReport {
        let mut report = ValidationReport::default();
        let doc = match parse_document(path, text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                report.diagnostics.push(format!("{}: expected a mapping at the top level", path));
                return report;
            }
            Err(e) => {
                report.diagnostics.push(e.to_string());
                return report;
            }
        };
        let out = &mut report.violations;
        match target {
            ValidationTarget::Flow => check_flow(&doc, out),
            ValidationTarget::Schedule => {
                require(&doc, "", SCHEDULE, out);
                check_retry(&doc, out);
            }
            ValidationTarget::Trigger(kind) => {
                require(&doc, "", RUNNABLE, out);
                require(&doc, "", trigger_fields(kind), out);
                check_retry(&doc, out);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(path: &str, doc: Value) -> ValidationReport {
        let target = ValidationTarget::from_filename(path).unwrap();
        SchemaValidator.validate(path, &doc.to_string(), target)
    }

    #[test]
    fn test_target_from_filename() {
        assert_eq!(
            ValidationTarget::from_filename("f/etl.flow/flow.yaml"),
            Some(ValidationTarget::Flow)
        );
        assert_eq!(
            ValidationTarget::from_filename("f/daily.schedule.yaml"),
            Some(ValidationTarget::Schedule)
        );
        assert_eq!(
            ValidationTarget::from_filename("f/hook.http_trigger.yaml"),
            Some(ValidationTarget::Trigger(TriggerKind::Http))
        );
        assert_eq!(ValidationTarget::from_filename("f/a.variable.yaml"), None);
        assert_eq!(ValidationTarget::from_filename("f/x.py"), None);
    }

    #[test]
    fn test_minimal_schedule_is_valid() {
        let report = check(
            "f/daily.schedule.json",
            json!({
                "schedule": "0 0 12 * * *",
                "timezone": "UTC",
                "enabled": true,
                "script_path": "f/jobs/daily_sync",
                "is_flow": false,
                "retry": null,
            }),
        );
        assert!(report.is_valid(), "{:?}", report);
    }

    #[test]
    fn test_schedule_wrong_types_and_retry_bounds() {
        let report = check(
            "f/daily.schedule.json",
            json!({
                "schedule": 12345,
                "timezone": "UTC",
                "enabled": "yes",
                "script_path": "f/jobs/daily_sync",
                "is_flow": "true",
                "retry": {
                    "exponential": {"attempts": 3, "seconds": 0, "random_factor": 150},
                    "retry_if": {},
                },
            }),
        );
        let keywords: Vec<&str> = report.violations.iter().map(|v| v.keyword).collect();
        assert_eq!(keywords.iter().filter(|k| **k == "type").count(), 3);
        assert!(keywords.contains(&"minimum"));
        assert!(keywords.contains(&"maximum"));
        assert!(report
            .violations
            .iter()
            .any(|v| v.pointer == "/retry/retry_if/expr" && v.keyword == "required"));
    }

    #[test]
    fn test_trigger_missing_kind_field() {
        let report = check(
            "f/in.email_trigger.json",
            json!({"script_path": "f/triggers/email_handler", "is_flow": false}),
        );
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].pointer, "/local_part");
        assert_eq!(report.violations[0].keyword, "required");
    }

    #[test]
    fn test_flow_needs_modules() {
        let report = SchemaValidator.validate(
            "f/etl.flow/flow.yaml",
            "summary: etl\nvalue:\n  modules: []\n",
            ValidationTarget::Flow,
        );
        assert!(report.is_valid());
        let report = SchemaValidator.validate("f/etl.flow/flow.yaml", "summary: etl\n", ValidationTarget::Flow);
        assert_eq!(report.violations[0].pointer, "/value");
    }

    #[test]
    fn test_unparseable_document_is_a_diagnostic() {
        let report = SchemaValidator.validate("f/a.schedule.json", "{not json", ValidationTarget::Schedule);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(report.violations.is_empty());
        assert!(!report.is_valid());
    }
}
