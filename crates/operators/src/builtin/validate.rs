use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{Operator, OperatorContext, OperatorError, Payload};

/// Checks fields of its input against a list of rules.
///
/// Params: `rules: [{ field, condition, value? }]` where `condition` is one of
/// `equals`, `not_equals`, `contains`, `not_empty`. Rules whose field is not
/// in the input are not evaluated. Unknown conditions fail the rule.
///
/// Output: `validation_results` (one entry per evaluated rule) and
/// `all_passed`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOperator;

#[derive(Debug, Deserialize)]
struct Rule {
    field: String,
    condition: String,
    #[serde(default)]
    value: Value,
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate(actual: &Value, condition: &str, expected: &Value) -> bool {
    match condition {
        "equals" => actual == expected,
        "not_equals" => actual != expected,
        "contains" => as_text(actual).contains(&as_text(expected)),
        "not_empty" => match actual {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            _ => true,
        },
        _ => false,
    }
}

#[async_trait]
impl Operator for ValidateOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        _ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let rules: Vec<Value> = match params.get("rules") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(rules)) => rules.clone(),
            Some(_) => return Err(OperatorError::Operator("'rules' must be a list".into())),
        };

        let mut results = Vec::with_capacity(rules.len());
        for raw in rules {
            let rule: Rule = serde_json::from_value(raw.clone())
                .map_err(|e| OperatorError::Operator(format!("invalid validation rule: {e}")))?;
            let Some(actual) = input.get(&rule.field) else {
                continue;
            };
            results.push(json!({
                "rule": raw,
                "passed": evaluate(actual, &rule.condition, &rule.value),
                "actual_value": actual,
            }));
        }

        let all_passed = results.iter().all(|r| r["passed"] == Value::Bool(true));

        let mut out = Payload::new();
        out.insert("validation_results".into(), Value::Array(results));
        out.insert("all_passed".into(), Value::Bool(all_passed));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    async fn run(input: Value, rules: Value) -> Payload {
        ValidateOperator
            .call(map(input), &map(json!({ "rules": rules })), &OperatorContext::detached("v"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn not_empty_rules_over_analysis_output() {
        let out = run(
            json!({ "summary": "Key facts", "classification": {}, "entities": [] }),
            json!([
                { "field": "summary", "condition": "not_empty" },
                { "field": "classification", "condition": "not_empty" },
                { "field": "entities", "condition": "not_empty" },
            ]),
        )
        .await;

        let passed: Vec<bool> = out["validation_results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["passed"].as_bool().unwrap())
            .collect();
        assert_eq!(passed, vec![true, false, false]);
        assert_eq!(out["all_passed"], false);
    }

    #[tokio::test]
    async fn missing_fields_are_not_evaluated() {
        let out = run(json!({}), json!([{ "field": "summary", "condition": "not_empty" }])).await;
        assert_eq!(out["validation_results"], json!([]));
        assert_eq!(out["all_passed"], true);
    }

    #[tokio::test]
    async fn equality_and_containment() {
        let out = run(
            json!({ "document_type": "email", "subject": "Re: merger terms" }),
            json!([
                { "field": "document_type", "condition": "equals", "value": "email" },
                { "field": "document_type", "condition": "not_equals", "value": "memo" },
                { "field": "subject", "condition": "contains", "value": "merger" },
                { "field": "subject", "condition": "matches", "value": ".*" },
            ]),
        )
        .await;

        let passed: Vec<bool> = out["validation_results"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["passed"].as_bool().unwrap())
            .collect();
        assert_eq!(passed, vec![true, true, true, false]);
    }
}
