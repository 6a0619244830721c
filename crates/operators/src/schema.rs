//! Canonical input schemas, enforced at the registry boundary.
//!
//! Operators used to accept the same field under several spellings
//! (`tags`, `:tags`, `Tags`) and quietly pick one. Inputs are now checked
//! up front: keys that collapse to the same canonical name are rejected as
//! ambiguous, and required keys must be present verbatim.

use std::collections::HashMap;

use crate::{OperatorError, Payload};

/// The keys an operator requires in its input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSchema {
    required: Vec<String>,
}

impl InputSchema {
    /// A schema with no required keys. Ambiguous keys are still rejected.
    pub fn any() -> Self {
        Self::default()
    }

    /// A schema requiring each of `keys`.
    pub fn requiring<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Validate `input` against this schema.
    ///
    /// # Errors
    /// [`OperatorError::InvalidInput`] when two keys share a canonical name or
    /// a required key is missing.
    pub fn validate(&self, input: &Payload) -> Result<(), OperatorError> {
        let mut seen: HashMap<String, &str> = HashMap::with_capacity(input.len());
        for key in input.keys() {
            if let Some(previous) = seen.insert(canonical_key(key), key.as_str()) {
                return Err(OperatorError::InvalidInput(format!(
                    "ambiguous input keys '{previous}' and '{key}'"
                )));
            }
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !input.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();

        if !missing.is_empty() {
            return Err(OperatorError::InvalidInput(format!(
                "missing required input keys: {}",
                missing.join(", ")
            )));
        }

        Ok(())
    }
}

/// Collapse the spellings a key may arrive under into one canonical form.
pub fn canonical_key(key: &str) -> String {
    key.trim().trim_start_matches(':').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn any_schema_accepts_distinct_keys() {
        let input = payload(json!({ "text": "memo", "tags": ["hot"] }));
        assert!(InputSchema::any().validate(&input).is_ok());
    }

    #[test]
    fn atom_style_duplicate_is_ambiguous() {
        let input = payload(json!({ "tags": [], ":tags": ["privileged"] }));
        let err = InputSchema::any().validate(&input).unwrap_err();
        assert!(matches!(err, OperatorError::InvalidInput(msg) if msg.contains("ambiguous")));
    }

    #[test]
    fn case_variants_are_ambiguous() {
        let input = payload(json!({ "Summary": "a", "summary": "b" }));
        assert!(InputSchema::any().validate(&input).is_err());
    }

    #[test]
    fn missing_required_keys_are_listed() {
        let schema = InputSchema::requiring(["text", "document_id"]);
        let err = schema.validate(&payload(json!({ "text": "x" }))).unwrap_err();
        assert_eq!(
            err,
            OperatorError::InvalidInput("missing required input keys: document_id".into())
        );
    }

    #[test]
    fn canonical_key_strips_prefix_and_case() {
        assert_eq!(canonical_key(":Entities "), "entities");
    }
}
