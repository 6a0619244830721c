//! Engine-level error types.
//!
//! Everything here is a load-time error: it is reported before any operator
//! runs. Node failures during a run are not errors of `execute`; they are
//! recorded per node in the returned `RunResult`.

use thiserror::Error;

/// Problems with the shape of a workflow graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The definition has no nodes.
    #[error("workflow '{0}' declares no nodes")]
    EmptyWorkflow(String),

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// A node depends on a node that is not declared.
    #[error("node '{node_id}' depends on unknown node '{dependency}'")]
    UnknownDependency { node_id: String, dependency: String },

    /// An explicit edge names a node that is not declared.
    #[error("edge '{edge}' references unknown node '{node_id}'")]
    UnknownEdgeNode { edge: String, node_id: String },

    /// Topological sort left nodes behind: they sit on or behind a cycle.
    #[error("cyclic dependency among nodes: {}", nodes.join(", "))]
    CyclicDependency { nodes: Vec<String> },

    /// A node names an operator the registry does not know.
    #[error("node '{node_id}' uses unknown operator '{operator}'")]
    UnknownOperator { node_id: String, operator: String },
}

/// Errors returned by the engine's load and execute entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow graph: {0}")]
    Graph(#[from] GraphError),

    /// No workflow is registered under the requested name.
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    /// A workflow with this name is already registered.
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// A declared, non-optional run input was not supplied.
    #[error("missing required input '{name}'")]
    MissingInput { name: String },

    /// A run input does not match its declared type.
    #[error("input '{name}' must be of type '{expected}'")]
    InputType { name: String, expected: String },

    /// The definition file could not be parsed.
    #[error("cannot parse workflow definition: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
