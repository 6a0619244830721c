use async_trait::async_trait;
use serde_json::Value;

use super::str_param;
use crate::{Operator, OperatorContext, OperatorError, Payload};

/// Collects everything its dependencies produced into one object.
///
/// Params: `into`, the output key (default `results`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOperator;

#[async_trait]
impl Operator for AggregateOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        _ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let key = str_param(params, "into").unwrap_or("results");
        let mut out = Payload::new();
        out.insert(key.to_owned(), Value::Object(input));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn honours_custom_key() {
        let input = json!({ "summary": "s", "entities": [] }).as_object().cloned().unwrap();
        let params = json!({ "into": "analysis" }).as_object().cloned().unwrap();
        let out = AggregateOperator
            .call(input, &params, &OperatorContext::detached("aggregate_results"))
            .await
            .unwrap();
        assert_eq!(out["analysis"]["summary"], "s");
        assert_eq!(out.len(), 1);
    }
}
