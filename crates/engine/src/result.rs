//! Per-node and per-run results.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::policy::NodeFailure;

/// Lifecycle of a node within one run.
///
/// `Pending → Ready → Running → {Succeeded, Failed, Skipped}`; a pending
/// node may also go straight to `Skipped` when an upstream node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Ready,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
    Partial,
}

impl RunStatus {
    /// Process exit code for CLI invocations.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Failed => 1,
            Self::Partial => 2,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        })
    }
}

/// What happened to one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub status: NodeStatus,
    /// Attempts made (0 if the node never ran).
    pub attempts: u32,
    /// Last failure, for failed nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NodeFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl NodeResult {
    pub(crate) fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            attempts: 0,
            error: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Everything a caller learns about a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    /// Declared outputs; absent context keys come back as `null`.
    pub outputs: BTreeMap<String, Value>,
    pub node_results: BTreeMap<String, NodeResult>,
    /// Why the run was cut short (fail-fast, cancellation, run timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    pub fn node(&self, id: &str) -> Option<&NodeResult> {
        self.node_results.get(id)
    }

    pub fn node_status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|r| r.status)
    }

    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}
