use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{Operator, OperatorContext, OperatorError, Payload};

/// Applies field-level transformations to a copy of its input.
///
/// Params: `transformations: [{ operation, source_field, target_field }]`
/// with `operation` one of `copy`, `uppercase`, `lowercase`. A transformation
/// whose source field is absent is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformOperator;

#[derive(Debug, Deserialize)]
struct Transformation {
    operation: String,
    source_field: String,
    target_field: String,
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Operator for TransformOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        _ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let raw = params
            .get("transformations")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let transformations: Vec<Transformation> = serde_json::from_value(raw.clone())
            .map_err(|e| OperatorError::Operator(format!("invalid transformations: {e}")))?;

        let mut data = input;
        for t in &transformations {
            let Some(source) = data.get(&t.source_field) else {
                continue;
            };
            let value = match t.operation.as_str() {
                "copy" => source.clone(),
                "uppercase" => Value::String(text(source).to_uppercase()),
                "lowercase" => Value::String(text(source).to_lowercase()),
                other => {
                    return Err(OperatorError::Operator(format!(
                        "unknown transformation '{other}'"
                    )))
                }
            };
            data.insert(t.target_field.clone(), value);
        }

        let mut out = Payload::new();
        out.insert("transformed_data".into(), Value::Object(data));
        out.insert("applied_transformations".into(), raw);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn copy_and_case_changes() {
        let input = json!({ "custodian": "Jane Roe" }).as_object().cloned().unwrap();
        let params = json!({ "transformations": [
            { "operation": "uppercase", "source_field": "custodian", "target_field": "custodian_upper" },
            { "operation": "copy", "source_field": "custodian", "target_field": "owner" },
            { "operation": "lowercase", "source_field": "absent", "target_field": "never" },
        ]})
        .as_object()
        .cloned()
        .unwrap();

        let out = TransformOperator
            .call(input, &params, &OperatorContext::detached("t"))
            .await
            .unwrap();

        assert_eq!(
            out["transformed_data"],
            json!({ "custodian": "Jane Roe", "custodian_upper": "JANE ROE", "owner": "Jane Roe" })
        );
    }

    #[tokio::test]
    async fn unknown_operation_fails() {
        let input = json!({ "a": "x" }).as_object().cloned().unwrap();
        let params = json!({ "transformations": [
            { "operation": "reverse", "source_field": "a", "target_field": "b" }
        ]})
        .as_object()
        .cloned()
        .unwrap();
        let result = TransformOperator
            .call(input, &params, &OperatorContext::detached("t"))
            .await;
        assert!(matches!(result, Err(OperatorError::Operator(msg)) if msg.contains("reverse")));
    }
}
