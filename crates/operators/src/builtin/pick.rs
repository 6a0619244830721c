use async_trait::async_trait;
use serde_json::Value;

use crate::{Operator, OperatorContext, OperatorError, Payload};

/// Copies selected fields from input to output.
///
/// Params: `fields` (list of keys) and/or `field` (a single key). Fields
/// absent from the input are left out of the output; an empty selection is
/// an operator error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PickOperator;

fn selected(params: &Payload) -> Vec<&str> {
    let mut fields: Vec<&str> = params
        .get("fields")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(single) = params.get("field").and_then(Value::as_str) {
        fields.push(single);
    }
    fields
}

#[async_trait]
impl Operator for PickOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        _ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let fields = selected(params);
        if fields.is_empty() {
            return Err(OperatorError::Operator(
                "pick requires a 'field' or 'fields' parameter".into(),
            ));
        }

        Ok(fields
            .into_iter()
            .filter_map(|f| input.get(f).map(|v| (f.to_owned(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn picks_listed_fields_only() {
        let input = map(json!({ "summary": "s", "tags": ["a"], "entities": [] }));
        let params = map(json!({ "fields": ["tags", "missing"] }));
        let out = PickOperator
            .call(input, &params, &OperatorContext::detached("extract_tags"))
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({ "tags": ["a"] }));
    }

    #[tokio::test]
    async fn empty_selection_is_an_error() {
        let result = PickOperator
            .call(Payload::new(), &Payload::new(), &OperatorContext::detached("x"))
            .await;
        assert!(matches!(result, Err(OperatorError::Operator(_))));
    }
}
