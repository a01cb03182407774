//! Environment variable source: WMSYNC_ prefix with __ separator.

use config::{Config, Environment};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::SyncError;

pub const ENV_PREFIX: &str = "WMSYNC";

/// Overlay `WMSYNC__<KEY>` variables onto the top-level keys of `doc`.
///
/// Environment keys arrive lower-cased, so they are matched against the
/// known option names case-insensitively.
pub fn overlay(doc: &mut Value, known_keys: &[String]) -> Result<(), SyncError> {
    let source = Config::builder()
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let values: HashMap<String, config::Value> = source.try_deserialize()?;
    apply(doc, known_keys, values)
}

fn apply(
    doc: &mut Value,
    known_keys: &[String],
    values: HashMap<String, config::Value>,
) -> Result<(), SyncError> {
    let Value::Object(map) = doc else {
        return Ok(());
    };
    for (env_key, value) in values {
        let Some(key) = known_keys
            .iter()
            .find(|k| k.to_lowercase() == env_key.to_lowercase())
        else {
            continue;
        };
        let json: Value = value.try_deserialize()?;
        map.insert(key.clone(), json);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_matches_keys_case_insensitively() {
        let mut doc = json!({"skipSecrets": true, "parallel": 1});
        let keys = vec!["skipSecrets".to_string(), "parallel".to_string()];
        let mut values = HashMap::new();
        values.insert("skipsecrets".to_string(), config::Value::from(false));
        values.insert("parallel".to_string(), config::Value::from(4i64));
        values.insert("unrelated".to_string(), config::Value::from("x"));
        apply(&mut doc, &keys, values).unwrap();
        assert_eq!(doc, json!({"skipSecrets": false, "parallel": 4}));
    }
}
