//! Built-in operators.
//!
//! Local operators cover the document-shaping steps of the eDiscovery
//! pipelines (pass-through extraction, rule validation, field transforms,
//! field picking and aggregation). [`HttpOperator`] forwards content to the
//! external AI backend.

mod aggregate;
mod http;
mod passthrough;
mod pick;
mod transform;
mod validate;

pub use aggregate::AggregateOperator;
pub use http::{register_remote, HttpOperator, REMOTE_OPERATORS};
pub use passthrough::PassthroughOperator;
pub use pick::PickOperator;
pub use transform::TransformOperator;
pub use validate::ValidateOperator;

use crate::{OperatorRegistry, Payload, RegistryError};

/// Register every local built-in under its default name.
pub fn register_builtins(registry: &mut OperatorRegistry) -> Result<(), RegistryError> {
    registry.register("aggregate", AggregateOperator)?;
    registry.register("passthrough", PassthroughOperator)?;
    registry.register("pick", PickOperator)?;
    registry.register("transform", TransformOperator)?;
    registry.register("validate", ValidateOperator)?;
    Ok(())
}

/// Read an optional string parameter.
fn str_param<'a>(params: &'a Payload, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
