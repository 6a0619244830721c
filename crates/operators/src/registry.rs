//! Operator registry: maps operator names to implementations.
//!
//! The registry is populated once at startup and then shared behind an
//! `Arc`. Registration takes `&mut self`, so once it is shared nothing can
//! change it and lookups on the hot path need no locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{Operator, OperatorContext, OperatorError, Payload, RegistryError};

/// A resolved operator, ready to invoke.
#[derive(Clone)]
pub struct RegisteredOperator {
    name: Arc<str>,
    operator: Arc<dyn Operator>,
}

impl RegisteredOperator {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate `input` against the operator's schema, then call it.
    pub async fn invoke(
        &self,
        input: Payload,
        params: &Payload,
        ctx: &OperatorContext,
    ) -> Result<Payload, OperatorError> {
        self.operator.schema().validate(&input)?;
        self.operator.call(input, params, ctx).await
    }
}

impl fmt::Debug for RegisteredOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredOperator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Name → operator map. Names are unique.
#[derive(Default, Clone)]
pub struct OperatorRegistry {
    operators: HashMap<String, RegisteredOperator>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in operators.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        crate::builtin::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Register `operator` under `name`.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateOperator`] if the name is already taken; the
    /// existing registration is left untouched.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        operator: impl Operator + 'static,
    ) -> Result<(), RegistryError> {
        self.register_arc(name, Arc::new(operator))
    }

    /// Register an operator that is already behind an `Arc`.
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        operator: Arc<dyn Operator>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.operators.contains_key(&name) {
            return Err(RegistryError::DuplicateOperator(name));
        }
        let registered = RegisteredOperator {
            name: Arc::from(name.as_str()),
            operator,
        };
        self.operators.insert(name, registered);
        Ok(())
    }

    /// Look up the operator registered under `name`.
    pub fn resolve(&self, name: &str) -> Result<RegisteredOperator, RegistryError> {
        self.operators
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::OperatorNotFound(name.to_owned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorRegistry")
            .field("operators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockOperator;
    use crate::InputSchema;
    use serde_json::json;

    #[test]
    fn duplicate_registration_fails_fast() {
        let mut registry = OperatorRegistry::new();
        registry
            .register("summarize", MockOperator::returning(json!({ "summary": "a" })))
            .unwrap();

        let err = registry
            .register("summarize", MockOperator::returning(json!({ "summary": "b" })))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateOperator("summarize".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_unknown_name() {
        let registry = OperatorRegistry::new();
        assert_eq!(
            registry.resolve("classify").unwrap_err(),
            RegistryError::OperatorNotFound("classify".into())
        );
    }

    #[test]
    fn builtins_are_registered() {
        let registry = OperatorRegistry::with_builtins().unwrap();
        for name in ["aggregate", "passthrough", "pick", "transform", "validate"] {
            assert!(registry.contains(name), "missing built-in '{name}'");
        }
    }

    #[tokio::test]
    async fn invoke_rejects_input_before_calling_operator() {
        let mock = MockOperator::returning(json!({ "summary": "ok" }))
            .with_schema(InputSchema::requiring(["text"]));
        let mut registry = OperatorRegistry::new();
        registry.register("summarize", mock.clone()).unwrap();

        let op = registry.resolve("summarize").unwrap();
        let result = op
            .invoke(Payload::new(), &Payload::new(), &OperatorContext::detached("n"))
            .await;

        assert!(matches!(result, Err(OperatorError::InvalidInput(_))));
        assert_eq!(mock.call_count(), 0);
    }
}
