//! `engine` crate: workflow definitions, DAG validation, and the
//! concurrent execution engine.
//!
//! A [`WorkflowDefinition`] is turned into an [`ExecutionGraph`] (rejecting
//! cycles, dangling references and unknown operators before anything runs),
//! then the scheduler dispatches every node whose dependencies have all
//! succeeded, merging node outputs into a per-run [`ExecutionContext`].
//! Failures are retried per node [`RetryPolicy`] and cascade to dependents
//! as skips. The declared outputs are projected from the final context into
//! a [`RunResult`].

pub mod aggregator;
pub mod config;
pub mod context;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod policy;
pub mod result;
mod scheduler;

pub use config::{EngineConfig, RunOptions};
pub use context::{ExecutionContext, MergeError};
pub use dag::{validate_dag, ExecutionGraph};
pub use error::{EngineError, GraphError};
pub use events::{ChannelObserver, ExecutionEvent, NoopObserver, RunObserver};
pub use executor::WorkflowEngine;
pub use models::{Edge, MergePolicy, NodeSpec, WorkflowDefinition};
pub use policy::{FailureKind, NodeFailure, RetryDecision, RetryPolicy};
pub use result::{NodeResult, NodeStatus, RunResult, RunStatus};
