//! Result aggregation: projects the final context onto declared outputs.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::context::ContextSnapshot;

/// One entry per declared output. A key the context never received maps to
/// `null` rather than failing the run.
pub fn project(
    snapshot: &ContextSnapshot,
    outputs: &BTreeMap<String, String>,
) -> BTreeMap<String, Value> {
    outputs
        .keys()
        .map(|name| (name.clone(), snapshot.get(name).cloned().unwrap_or(Value::Null)))
        .collect()
}

/// Declared outputs absent from the context.
pub fn missing_outputs(snapshot: &ContextSnapshot, outputs: &BTreeMap<String, String>) -> Vec<String> {
    outputs
        .keys()
        .filter(|name| snapshot.get(name).is_none())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(names: &[&str]) -> BTreeMap<String, String> {
        names.iter().map(|n| (n.to_string(), "any".to_string())).collect()
    }

    #[test]
    fn missing_keys_project_to_null() {
        let mut snapshot = ContextSnapshot::default();
        snapshot.values.insert("summary".into(), json!("Key facts"));
        snapshot.values.insert("internal".into(), json!(1));

        let projected = project(&snapshot, &outputs(&["summary", "entities"]));
        assert_eq!(projected["summary"], json!("Key facts"));
        assert_eq!(projected["entities"], Value::Null);
        assert!(!projected.contains_key("internal"));

        assert_eq!(missing_outputs(&snapshot, &outputs(&["summary", "entities"])), vec!["entities"]);
    }
}
