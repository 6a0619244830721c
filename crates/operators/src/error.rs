//! Operator-level error types.

use thiserror::Error;

/// Errors returned by an operator's `call` method.
///
/// The engine uses the variant to classify node failures:
/// - `Operator`: the operator itself reported a failure (e.g. a malformed
///   upstream response). Retried per node policy.
/// - `Transport`: the call to the external service never completed.
///   Retried per node policy.
/// - `InvalidInput`: the input did not satisfy the operator's schema.
///   Never retried: the same input fails the same way.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OperatorError {
    #[error("operator error: {0}")]
    Operator(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl OperatorError {
    /// The bare message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Operator(msg) | Self::Transport(msg) | Self::InvalidInput(msg) => msg,
        }
    }
}

/// Errors produced while populating or querying the registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two operators were registered under the same name.
    #[error("operator '{0}' is already registered")]
    DuplicateOperator(String),

    /// No operator is registered under the requested name.
    #[error("no operator registered under '{0}'")]
    OperatorNotFound(String),
}
