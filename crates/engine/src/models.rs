//! Workflow definition models.
//!
//! These types mirror the declarative workflow files (YAML or JSON) and are
//! the source of truth for what a workflow looks like in memory. A loaded
//! definition is never mutated; concurrent runs share it behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use operators::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::policy::RetryPolicy;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed dependency edge, written `"src->dst"` in workflow files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Edge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed edge '{0}': expected \"<src>-><dst>\"")]
pub struct EdgeParseError(String);

impl FromStr for Edge {
    type Err = EdgeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (from, to) = s
            .split_once("->")
            .ok_or_else(|| EdgeParseError(s.to_owned()))?;
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() || to.contains("->") {
            return Err(EdgeParseError(s.to_owned()));
        }
        Ok(Self {
            from: from.to_owned(),
            to: to.to_owned(),
        })
    }
}

impl TryFrom<String> for Edge {
    type Error = EdgeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Edge> for String {
    fn from(edge: Edge) -> Self {
        edge.to_string()
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

// ---------------------------------------------------------------------------
// MergePolicy
// ---------------------------------------------------------------------------

/// How the execution context resolves two nodes writing the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MergePolicy {
    /// The node that completes last wins.
    #[default]
    LastWriterWins,
    /// Writers earlier in `order` win over later ones; unlisted writers rank
    /// last. Equal ranks fall back to last-writer-wins.
    Precedence { order: Vec<String> },
    /// A second writer to any key fails with a merge conflict.
    FailOnCollision,
}

// ---------------------------------------------------------------------------
// NodeSpec
// ---------------------------------------------------------------------------

fn is_false(b: &bool) -> bool {
    !*b
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique identifier within the workflow.
    pub id: String,
    /// Registry key of the operator this node runs.
    #[serde(alias = "operator")]
    pub op: String,
    /// Static configuration handed to the operator on every call.
    #[serde(default)]
    pub params: Payload,
    /// IDs of the nodes that must succeed before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-node timeout; `params.timeout` (ms) is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Per-node retry policy; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// An optional node's failure does not by itself make the run partial.
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            op: op.into(),
            params: Payload::new(),
            depends_on: Vec::new(),
            timeout_ms: None,
            retry: None,
            optional: false,
        }
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Replace `params` with the given JSON object (anything else is ignored).
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// The node's own timeout, if it declares one.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .or_else(|| self.params.get("timeout").and_then(Value::as_u64))
            .map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Run inputs: name → type. A trailing `?` marks the input optional.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Outputs projected from the final context: name → type.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    pub nodes: Vec<NodeSpec>,
    /// Explicit edges; merged with every node's `depends_on`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub merge: MergePolicy,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, nodes: Vec<NodeSpec>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            nodes,
            edges: Vec::new(),
            merge: MergePolicy::default(),
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), ty.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), ty.into());
        self
    }

    pub fn with_merge(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self, EngineError> {
        serde_yaml_ng::from_str(source).map_err(|e| EngineError::Parse(e.to_string()))
    }

    pub fn from_json(source: &str) -> Result<Self, EngineError> {
        serde_json::from_str(source).map_err(|e| EngineError::Parse(e.to_string()))
    }

    /// Load a definition file; `.json` files are parsed as JSON, anything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&source),
            _ => Self::from_yaml(&source),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Every `(dependency, dependent)` pair from `depends_on` and `edges`,
    /// deduplicated, in declaration order.
    pub fn dependency_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = Vec::new();
        let declared = self
            .nodes
            .iter()
            .flat_map(|n| n.depends_on.iter().map(move |d| (d.as_str(), n.id.as_str())));
        let explicit = self.edges.iter().map(|e| (e.from.as_str(), e.to.as_str()));
        for pair in declared.chain(explicit) {
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
        pairs
    }

    /// Check run inputs against the declared `inputs`.
    ///
    /// Undeclared inputs are allowed through; declared ones must be present
    /// (unless their type ends in `?`) and match their type.
    pub fn validate_inputs(&self, inputs: &Payload) -> Result<(), EngineError> {
        for (name, ty) in &self.inputs {
            let (base, optional) = match ty.strip_suffix('?') {
                Some(base) => (base, true),
                None => (ty.as_str(), false),
            };
            match inputs.get(name) {
                None | Some(Value::Null) if optional => {}
                None => return Err(EngineError::MissingInput { name: name.clone() }),
                Some(value) if !type_matches(base, value) => {
                    return Err(EngineError::InputType {
                        name: name.clone(),
                        expected: base.to_owned(),
                    })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Does `value` satisfy the declared type string? Unknown type names
/// (including `any`) accept everything.
fn type_matches(ty: &str, value: &Value) -> bool {
    match ty.trim().to_ascii_lowercase().as_str() {
        "string" | "str" | "text" => value.is_string(),
        "number" | "float" => value.is_number(),
        "integer" | "int" => value.is_i64() || value.is_u64(),
        "boolean" | "bool" => value.is_boolean(),
        "map" | "object" | "dict" => value.is_object(),
        "list" | "array" => value.is_array(),
        _ => true,
    }
}
