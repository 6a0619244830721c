use async_trait::async_trait;
use serde_json::Value;

use crate::{Operator, OperatorContext, OperatorError, Payload};

/// Document extraction stand-in: hands its input on under `extracted_data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughOperator;

#[async_trait]
impl Operator for PassthroughOperator {
    async fn call(
        &self,
        input: Payload,
        _params: &Payload,
        _ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let mut out = Payload::new();
        out.insert("extracted_data".into(), Value::Object(input));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn wraps_input() {
        let input = json!({ "text": "memo" }).as_object().cloned().unwrap();
        let out = PassthroughOperator
            .call(input, &Payload::new(), &OperatorContext::detached("extract"))
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({ "extracted_data": { "text": "memo" } }));
    }
}
