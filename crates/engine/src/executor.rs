//! Workflow execution engine.
//!
//! `WorkflowEngine` is the central orchestrator:
//! 1. Holds a catalog of validated workflow definitions and the frozen
//!    operator registry, both shared read-only across concurrent runs.
//! 2. Checks run inputs and builds the per-run [`ExecutionGraph`].
//! 3. Seeds an [`ExecutionContext`] with the inputs and hands the graph to the
//!    scheduler, which runs independent nodes concurrently.
//! 4. Projects the declared outputs from the final context and derives the
//!    run status.
//!
//! Load-time problems come back as `Err(EngineError)`; anything that goes
//! wrong once nodes are running is reported in the [`RunResult`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use operators::{OperatorRegistry, Payload};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::aggregator;
use crate::config::{EngineConfig, RunOptions};
use crate::context::ExecutionContext;
use crate::dag::ExecutionGraph;
use crate::events::{ExecutionEvent, NoopObserver, RunObserver};
use crate::result::{NodeResult, NodeStatus, RunResult, RunStatus};
use crate::scheduler::Scheduler;
use crate::{EngineError, WorkflowDefinition};

/// Runs workflows against a fixed operator registry.
///
/// Build one engine per process, register workflows, then share it behind
/// an `Arc`; `execute` only needs `&self`.
pub struct WorkflowEngine {
    registry: Arc<OperatorRegistry>,
    config: EngineConfig,
    workflows: HashMap<String, Arc<WorkflowDefinition>>,
    observer: Arc<dyn RunObserver>,
}

impl WorkflowEngine {
    pub fn new(registry: OperatorRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            workflows: HashMap::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Deliver execution events of every run to `observer`.
    pub fn with_observer(mut self, observer: impl RunObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Validate `definition` against the registry and add it to the catalog.
    ///
    /// # Errors
    /// `DuplicateWorkflow` if the name is taken, `Graph` if the definition is
    /// not a valid DAG over registered operators.
    pub fn register_workflow(&mut self, definition: WorkflowDefinition) -> Result<(), EngineError> {
        if self.workflows.contains_key(&definition.name) {
            return Err(EngineError::DuplicateWorkflow(definition.name));
        }
        let graph = ExecutionGraph::build(&definition, &self.registry)?;
        info!(workflow = %definition.name, nodes = graph.len(), "workflow registered");
        self.workflows
            .insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    /// Register every `.yaml`, `.yml` and `.json` definition in `dir`, in
    /// file-name order. Returns the registered names.
    pub fn load_dir(&mut self, dir: impl AsRef<Path>) -> Result<Vec<String>, EngineError> {
        let mut paths: Vec<_> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml" | "json")
                )
            })
            .collect();
        paths.sort();

        let mut names = Vec::with_capacity(paths.len());
        for path in paths {
            let definition = WorkflowDefinition::load(&path)?;
            names.push(definition.name.clone());
            self.register_workflow(definition)?;
        }
        Ok(names)
    }

    pub fn workflow(&self, name: &str) -> Option<Arc<WorkflowDefinition>> {
        self.workflows.get(name).cloned()
    }

    /// Registered workflow names, sorted.
    pub fn workflow_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workflows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the registered workflow `name`.
    pub async fn execute(
        &self,
        name: &str,
        inputs: Payload,
        options: RunOptions,
    ) -> Result<RunResult, EngineError> {
        self.execute_with_cancel(name, inputs, options, CancellationToken::new())
            .await
    }

    /// Run the registered workflow `name`; cancelling `cancel` aborts the run.
    pub async fn execute_with_cancel(
        &self,
        name: &str,
        inputs: Payload,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunResult, EngineError> {
        let definition = self
            .workflow(name)
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_owned()))?;
        self.execute_definition(&definition, inputs, options, cancel)
            .await
    }

    /// Run an arbitrary definition without registering it.
    ///
    /// # Errors
    /// Graph errors and input errors are returned before any operator runs.
    #[instrument(skip_all, fields(workflow = %definition.name))]
    pub async fn execute_definition(
        &self,
        definition: &WorkflowDefinition,
        inputs: Payload,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunResult, EngineError> {
        let graph = ExecutionGraph::build(definition, &self.registry)?;
        definition.validate_inputs(&inputs)?;

        let run_id = Uuid::new_v4();
        let settings = self.config.resolve(&options);
        let started_at = Utc::now();
        info!(
            %run_id,
            nodes = graph.len(),
            max_parallelism = ?settings.max_parallelism,
            fail_fast = settings.fail_fast,
            "run started"
        );
        self.observer.notify(ExecutionEvent::RunStarted {
            run_id,
            workflow: definition.name.clone(),
        });

        let context = Arc::new(ExecutionContext::seeded(definition.merge.clone(), inputs));
        let outcome = Scheduler::new(
            run_id,
            &definition.name,
            &graph,
            Arc::clone(&context),
            &settings,
            Arc::clone(&self.observer),
        )
        .run(cancel)
        .await;

        let snapshot = context.snapshot();
        let outputs = aggregator::project(&snapshot, &definition.outputs);
        let missing = aggregator::missing_outputs(&snapshot, &definition.outputs);
        if !missing.is_empty() {
            warn!(%run_id, missing = ?missing, "declared outputs missing from context");
        }

        let status = run_status(
            definition,
            &outcome.node_results,
            outcome.abort_reason.is_some(),
            &missing,
        );
        info!(%run_id, %status, "run finished");
        self.observer
            .notify(ExecutionEvent::RunFinished { run_id, status });

        Ok(RunResult {
            run_id,
            workflow: definition.name.clone(),
            status,
            outputs,
            node_results: outcome.node_results,
            abort_reason: outcome.abort_reason,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// `failed` on abort or when nothing succeeded; `completed` when every
/// required node succeeded and every declared output exists; else `partial`.
fn run_status(
    definition: &WorkflowDefinition,
    results: &std::collections::BTreeMap<String, NodeResult>,
    aborted: bool,
    missing_outputs: &[String],
) -> RunStatus {
    let succeeded = |id: &str| {
        results
            .get(id)
            .is_some_and(|r| r.status == NodeStatus::Succeeded)
    };

    if aborted || !definition.nodes.iter().any(|n| succeeded(&n.id)) {
        return RunStatus::Failed;
    }
    let required_ok = definition
        .nodes
        .iter()
        .filter(|n| !n.optional)
        .all(|n| succeeded(&n.id));
    if required_ok && missing_outputs.is_empty() {
        RunStatus::Completed
    } else {
        RunStatus::Partial
    }
}
