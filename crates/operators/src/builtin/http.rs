//! Remote operators that forward content to the AI backend over HTTP.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    InputSchema, Operator, OperatorContext, OperatorError, OperatorRegistry, Payload,
    RegistryError,
};

/// Operators the AI backend serves, each at `{base_url}/api/{name}`.
pub const REMOTE_OPERATORS: &[&str] = &["summarize", "classify", "extract_entities", "process"];

/// POSTs `{ input, params, run_id, node_id }` to an endpoint and returns the
/// JSON object it answers with.
///
/// Failure classification belongs here, not in the engine:
/// - the request never completed → [`OperatorError::Transport`]
/// - non-2xx status → [`OperatorError::Operator`] ("Failed to process document")
/// - body is not a JSON object → [`OperatorError::Operator`] ("Invalid response format")
#[derive(Debug, Clone)]
pub struct HttpOperator {
    client: Client,
    endpoint: String,
    schema: InputSchema,
}

impl HttpOperator {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    /// Share one connection pool across many remote operators.
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            schema: InputSchema::any(),
        }
    }

    pub fn with_schema(mut self, schema: InputSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Operator for HttpOperator {
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        let body = json!({
            "input": input,
            "params": params,
            "run_id": ctx.run_id,
            "node_id": ctx.node_id,
        });

        debug!(endpoint = %self.endpoint, node_id = %ctx.node_id, attempt = ctx.attempt, "forwarding to AI backend");

        let request = self.client.post(&self.endpoint).json(&body).send();
        let response = tokio::select! {
            response = request => response.map_err(|e| OperatorError::Transport(e.to_string()))?,
            _ = ctx.cancel.cancelled() => {
                return Err(OperatorError::Transport("request cancelled".into()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(OperatorError::Operator(format!(
                "Failed to process document: HTTP {status}"
            )));
        }

        match response.json::<Value>().await {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(OperatorError::Operator("Invalid response format".into())),
            Err(e) => Err(OperatorError::Operator(format!("Invalid response format: {e}"))),
        }
    }

    fn schema(&self) -> InputSchema {
        self.schema.clone()
    }
}

/// Register an [`HttpOperator`] for every name in [`REMOTE_OPERATORS`],
/// all requiring the document `text`.
pub fn register_remote(
    registry: &mut OperatorRegistry,
    base_url: &str,
    client: Client,
) -> Result<(), RegistryError> {
    let base = base_url.trim_end_matches('/');
    for name in REMOTE_OPERATORS {
        let op = HttpOperator::with_client(client.clone(), format!("{base}/api/{name}"))
            .with_schema(InputSchema::requiring(["text"]));
        registry.register_arc(*name, Arc::new(op))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn text_input() -> Payload {
        json!({ "text": "Privileged and confidential." })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn returns_backend_object() {
        let router = Router::new().route(
            "/api/summarize",
            post(|Json(body): Json<Value>| async move {
                Json(json!({ "summary": format!("summary of {}", body["input"]["text"].as_str().unwrap()) }))
            }),
        );
        let base = serve(router).await;

        let op = HttpOperator::new(format!("{base}/api/summarize"));
        let out = op
            .call(text_input(), &Payload::new(), &OperatorContext::detached("summarize"))
            .await
            .unwrap();
        assert_eq!(out["summary"], "summary of Privileged and confidential.");
    }

    #[tokio::test]
    async fn server_error_is_operator_error() {
        let router = Router::new().route(
            "/api/classify",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = serve(router).await;

        let op = HttpOperator::new(format!("{base}/api/classify"));
        let err = op
            .call(text_input(), &Payload::new(), &OperatorContext::detached("classify"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Operator(msg) if msg.starts_with("Failed to process document")));
    }

    #[tokio::test]
    async fn non_object_body_is_invalid_format() {
        let router = Router::new().route(
            "/api/extract_entities",
            post(|| async { Json(json!(["not", "an", "object"])) }),
        );
        let base = serve(router).await;

        let op = HttpOperator::new(format!("{base}/api/extract_entities"));
        let err = op
            .call(text_input(), &Payload::new(), &OperatorContext::detached("extract_entities"))
            .await
            .unwrap_err();
        assert_eq!(err, OperatorError::Operator("Invalid response format".into()));
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let op = HttpOperator::new(format!("http://{addr}/api/process"));
        let err = op
            .call(text_input(), &Payload::new(), &OperatorContext::detached("process"))
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Transport(_)));
    }

    #[test]
    fn remote_operators_registered_under_api_prefix() {
        let mut registry = OperatorRegistry::new();
        register_remote(&mut registry, "http://backend:8001/", Client::new()).unwrap();
        for name in REMOTE_OPERATORS {
            assert!(registry.contains(name));
        }
    }
}
