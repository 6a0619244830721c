//! The `Operator` trait, the contract every operator must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{InputSchema, OperatorError};

/// A JSON object: the shape of every operator input, output and params map.
pub type Payload = Map<String, Value>;

/// Per-call context handed to an operator by the engine.
///
/// Defined here (in the operators crate) so both the engine and individual
/// operator implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct OperatorContext {
    /// ID of the workflow run this call belongs to.
    pub run_id: Uuid,
    /// Name of the workflow being run.
    pub workflow: String,
    /// ID of the node invoking the operator.
    pub node_id: String,
    /// 1-based attempt number (retries increment it).
    pub attempt: u32,
    /// Fires when the run is cancelled. Long-running operators should watch
    /// it and return promptly.
    pub cancel: CancellationToken,
}

impl OperatorContext {
    /// A context that is not attached to any run, for direct invocations.
    pub fn detached(node_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow: String::new(),
            node_id: node_id.into(),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }
}

/// The core operator trait.
#[async_trait]
pub trait Operator: Send + Sync {
    /// Run the operator on `input` (the merged outputs of the node's
    /// dependencies) with the node's static `params`, returning the keys this
    /// node contributes to the execution context.
    async fn call(
        &self,
        input: Payload,
        params: &Payload,
        ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError>;

    /// The canonical input schema, checked before every call.
    fn schema(&self) -> InputSchema {
        InputSchema::any()
    }
}
