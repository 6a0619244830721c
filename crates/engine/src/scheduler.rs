//! Per-run dispatch loop.
//!
//! Every node is a task in one `JoinSet`. The loop dispatches whatever is
//! ready (up to the parallelism cap), then waits on the first of: a task
//! completing, the caller cancelling the run, or the run deadline. A
//! completion either readies dependents or skips them transitively.
//!
//! Aborting a run (fail-fast, cancellation, run timeout) cancels the run
//! token. Node tasks give their operator `cancel_grace` to return and then
//! abort it; the loop drains the set for at most twice that before aborting
//! whatever is left.
//!
//! Dropping the run future cancels the run token and aborts every node task
//! along with the operator call it owns.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use operators::{OperatorContext, Payload};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::RunSettings;
use crate::context::ExecutionContext;
use crate::dag::{ExecutionGraph, GraphNode};
use crate::events::{ExecutionEvent, RunObserver};
use crate::policy::{FailureKind, NodeFailure, RetryDecision, RetryPolicy};
use crate::result::{NodeResult, NodeStatus};

/// What the loop hands back to the engine.
pub(crate) struct RunOutcome {
    pub node_results: BTreeMap<String, NodeResult>,
    pub abort_reason: Option<String>,
}

struct NodeOutcome {
    node_id: String,
    attempts: u32,
    result: Result<(), NodeFailure>,
}

pub(crate) struct Scheduler<'a> {
    run_id: Uuid,
    workflow: &'a str,
    graph: &'a ExecutionGraph,
    context: Arc<ExecutionContext>,
    settings: &'a RunSettings,
    observer: Arc<dyn RunObserver>,
    states: HashMap<String, NodeResult>,
    unmet: HashMap<String, usize>,
    ready: VecDeque<String>,
    abort_reason: Option<String>,
}

impl<'a> Scheduler<'a> {
    pub(crate) fn new(
        run_id: Uuid,
        workflow: &'a str,
        graph: &'a ExecutionGraph,
        context: Arc<ExecutionContext>,
        settings: &'a RunSettings,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        let mut states: HashMap<String, NodeResult> = graph
            .order()
            .iter()
            .map(|id| (id.clone(), NodeResult::pending()))
            .collect();
        let unmet = graph
            .order()
            .iter()
            .map(|id| (id.clone(), graph.in_degree(id)))
            .collect();

        let mut ready = VecDeque::new();
        for root in graph.roots() {
            if let Some(state) = states.get_mut(root) {
                state.status = NodeStatus::Ready;
            }
            ready.push_back(root.to_owned());
        }

        Self {
            run_id,
            workflow,
            graph,
            context,
            settings,
            observer,
            states,
            unmet,
            ready,
            abort_reason: None,
        }
    }

    /// Drive the run until every node is terminal or the run is aborted.
    pub(crate) async fn run(mut self, cancel: CancellationToken) -> RunOutcome {
        let run_token = cancel.child_token();
        let _cancel_on_drop = run_token.clone().drop_guard();
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();

        let run_timeout = self.settings.run_timeout;
        let run_deadline = async move {
            match run_timeout {
                Some(limit) => tokio::time::sleep_until(Instant::now() + limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(run_deadline);

        loop {
            self.dispatch(&mut tasks, &run_token);
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.abort_reason = Some("run cancelled".to_owned());
                    break;
                }
                _ = &mut run_deadline => {
                    let limit = run_timeout.unwrap_or_default();
                    self.abort_reason = Some(format!("run timed out after {} ms", limit.as_millis()));
                    break;
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        self.complete(outcome);
                        if self.abort_reason.is_some() {
                            break;
                        }
                    }
                    Some(Err(err)) => error!(run_id = %self.run_id, %err, "node task ended abnormally"),
                    None => break,
                },
            }
        }

        if let Some(reason) = self.abort_reason.clone() {
            warn!(run_id = %self.run_id, reason = %reason, running = tasks.len(), "aborting run");
            run_token.cancel();
            self.drain(&mut tasks).await;
        }
        self.settle();

        RunOutcome {
            node_results: self.states.into_iter().collect(),
            abort_reason: self.abort_reason,
        }
    }

    fn dispatch(&mut self, tasks: &mut JoinSet<NodeOutcome>, token: &CancellationToken) {
        loop {
            if let Some(limit) = self.settings.max_parallelism {
                if tasks.len() >= limit {
                    break;
                }
            }
            let Some(node_id) = self.ready.pop_front() else {
                break;
            };
            let Some(node) = self.graph.node(&node_id) else {
                continue;
            };
            if let Some(state) = self.states.get_mut(&node_id) {
                state.status = NodeStatus::Running;
                state.started_at = Some(Utc::now());
            }
            debug!(run_id = %self.run_id, node_id = %node_id, op = node.operator.name(), "dispatching node");

            let task = NodeTask {
                run_id: self.run_id,
                workflow: self.workflow.to_owned(),
                node: node.clone(),
                dependencies: self.graph.dependencies(&node_id).to_vec(),
                context: Arc::clone(&self.context),
                observer: Arc::clone(&self.observer),
                timeout: node.spec.timeout().unwrap_or(self.settings.default_node_timeout),
                retry: node.spec.retry.clone().unwrap_or_else(|| self.settings.retry.clone()),
                grace: self.settings.cancel_grace,
                cancel: token.child_token(),
            };
            let span = info_span!("node", run_id = %self.run_id, node_id = %node_id);
            tasks.spawn(task.run().instrument(span));
        }
    }

    /// Record a finished node, then ready or skip what depends on it. Once
    /// the run is aborting, dependents are left for [`Self::settle`].
    fn complete(&mut self, outcome: NodeOutcome) {
        let NodeOutcome {
            node_id,
            attempts,
            result,
        } = outcome;
        let optional = self
            .graph
            .node(&node_id)
            .map(|n| n.spec.optional)
            .unwrap_or(false);
        let Some(state) = self.states.get_mut(&node_id) else {
            return;
        };
        state.attempts = attempts;
        state.finished_at = Some(Utc::now());

        match result {
            Ok(()) => {
                state.status = NodeStatus::Succeeded;
                info!(run_id = %self.run_id, node_id = %node_id, attempts, "node succeeded");
                self.observer.notify(ExecutionEvent::NodeSucceeded {
                    run_id: self.run_id,
                    node_id: node_id.clone(),
                });

                if self.abort_reason.is_some() {
                    return;
                }
                let graph = self.graph;
                for dependent in graph.dependents(&node_id) {
                    let Some(unmet) = self.unmet.get_mut(dependent) else {
                        continue;
                    };
                    *unmet = unmet.saturating_sub(1);
                    if *unmet > 0 {
                        continue;
                    }
                    if let Some(next) = self.states.get_mut(dependent) {
                        if next.status == NodeStatus::Pending {
                            next.status = NodeStatus::Ready;
                            self.ready.push_back(dependent.clone());
                        }
                    }
                }
            }
            Err(failure) => {
                error!(
                    run_id = %self.run_id,
                    node_id = %node_id,
                    attempts,
                    kind = ?failure.kind,
                    error = %failure.message,
                    "node failed"
                );
                state.status = NodeStatus::Failed;
                self.observer.notify(ExecutionEvent::NodeFailed {
                    run_id: self.run_id,
                    node_id: node_id.clone(),
                    kind: failure.kind,
                    error: failure.message.clone(),
                });
                state.error = Some(failure);

                if self.abort_reason.is_some() {
                    return;
                }
                self.skip_dependents(&node_id);
                if self.settings.fail_fast && !optional {
                    self.abort_reason = Some(format!("fail-fast: node '{node_id}' failed"));
                }
            }
        }
    }

    /// Skip every pending node downstream of `failed`.
    fn skip_dependents(&mut self, failed: &str) {
        let reason = format!("upstream failure: '{failed}'");
        for id in self.graph.descendants(failed) {
            let Some(state) = self.states.get_mut(&id) else {
                continue;
            };
            if state.status != NodeStatus::Pending {
                continue;
            }
            state.status = NodeStatus::Skipped;
            state.skip_reason = Some(reason.clone());
            info!(run_id = %self.run_id, node_id = %id, upstream = failed, "node skipped");
            self.observer.notify(ExecutionEvent::NodeSkipped {
                run_id: self.run_id,
                node_id: id,
                reason: reason.clone(),
            });
        }
    }

    /// Collect in-flight tasks after the run token was cancelled.
    async fn drain(&mut self, tasks: &mut JoinSet<NodeOutcome>) {
        let limit = self.settings.cancel_grace.saturating_mul(2);
        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => self.complete(outcome),
                    Err(err) => error!(run_id = %self.run_id, %err, "node task ended abnormally"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(run_id = %self.run_id, stuck = tasks.len(), "aborting node tasks that outlived the grace period");
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    /// Give every node that is still not terminal its final state.
    fn settle(&mut self) {
        let graph = self.graph;
        let abort_reason = self.abort_reason.as_deref();
        for id in graph.order() {
            let Some(state) = self.states.get_mut(id) else {
                continue;
            };
            match state.status {
                NodeStatus::Running => {
                    let failure = match abort_reason {
                        Some(_) => NodeFailure::new(
                            FailureKind::Cancelled,
                            "did not stop within grace period",
                        ),
                        None => NodeFailure::new(FailureKind::Operator, "node task ended abnormally"),
                    };
                    state.status = NodeStatus::Failed;
                    state.finished_at = Some(Utc::now());
                    self.observer.notify(ExecutionEvent::NodeFailed {
                        run_id: self.run_id,
                        node_id: id.clone(),
                        kind: failure.kind,
                        error: failure.message.clone(),
                    });
                    state.error = Some(failure);
                }
                NodeStatus::Pending | NodeStatus::Ready => {
                    let reason = abort_reason.unwrap_or("upstream did not complete").to_owned();
                    state.status = NodeStatus::Skipped;
                    state.skip_reason = Some(reason.clone());
                    self.observer.notify(ExecutionEvent::NodeSkipped {
                        run_id: self.run_id,
                        node_id: id.clone(),
                        reason,
                    });
                }
                NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped => {}
            }
        }
    }
}

/// Everything one node needs to run detached from the scheduler.
struct NodeTask {
    run_id: Uuid,
    workflow: String,
    node: GraphNode,
    dependencies: Vec<String>,
    context: Arc<ExecutionContext>,
    observer: Arc<dyn RunObserver>,
    timeout: Duration,
    retry: RetryPolicy,
    grace: Duration,
    cancel: CancellationToken,
}

impl NodeTask {
    async fn run(self) -> NodeOutcome {
        let node_id = self.node.spec.id.clone();
        let input = self.context.input_for(&self.dependencies);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(attempt, "attempt started");
            self.observer.notify(ExecutionEvent::NodeStarted {
                run_id: self.run_id,
                node_id: node_id.clone(),
                attempt,
            });

            let failure = match self.attempt(input.clone(), attempt).await {
                Ok(output) => match self.context.write(&node_id, output) {
                    Ok(()) => {
                        return NodeOutcome {
                            node_id,
                            attempts: attempt,
                            result: Ok(()),
                        }
                    }
                    Err(err) => NodeFailure::new(FailureKind::MergeConflict, err.to_string()),
                },
                Err(failure) => failure,
            };

            match self.retry.decide(failure.kind, attempt) {
                RetryDecision::Retry { delay } if !self.cancel.is_cancelled() => {
                    let delay_ms = delay.as_millis() as u64;
                    warn!(attempt, delay_ms, error = %failure.message, "attempt failed, retrying");
                    self.observer.notify(ExecutionEvent::NodeRetrying {
                        run_id: self.run_id,
                        node_id: node_id.clone(),
                        attempt,
                        delay_ms,
                        error: failure.message.clone(),
                    });
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            return NodeOutcome {
                                node_id,
                                attempts: attempt,
                                result: Err(NodeFailure::new(
                                    FailureKind::Cancelled,
                                    "run cancelled during retry backoff",
                                )),
                            };
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                _ => {
                    return NodeOutcome {
                        node_id,
                        attempts: attempt,
                        result: Err(failure),
                    }
                }
            }
        }
    }

    /// One operator call under the node timeout.
    async fn attempt(&self, input: Payload, attempt: u32) -> Result<Payload, NodeFailure> {
        let operator = self.node.operator.clone();
        let params = self.node.spec.params.clone();
        let ctx = OperatorContext {
            run_id: self.run_id,
            workflow: self.workflow.clone(),
            node_id: self.node.spec.id.clone(),
            attempt,
            cancel: self.cancel.clone(),
        };
        let mut handle = AbortOnDropHandle::new(tokio::spawn(async move {
            operator.invoke(input, &params, &ctx).await
        }));

        tokio::select! {
            biased;
            joined = &mut handle => match joined {
                Ok(result) => result.map_err(NodeFailure::from),
                Err(err) if err.is_panic() => {
                    Err(NodeFailure::new(FailureKind::Operator, "operator panicked"))
                }
                Err(_) => Err(NodeFailure::new(FailureKind::Cancelled, "operator task was aborted")),
            },
            _ = tokio::time::sleep(self.timeout) => {
                handle.abort();
                Err(NodeFailure::new(
                    FailureKind::Timeout,
                    format!("timed out after {} ms", self.timeout.as_millis()),
                ))
            }
            _ = self.cancel.cancelled() => {
                if tokio::time::timeout(self.grace, &mut handle).await.is_err() {
                    handle.abort();
                    return Err(NodeFailure::new(
                        FailureKind::Cancelled,
                        "did not stop within grace period",
                    ));
                }
                Err(NodeFailure::new(FailureKind::Cancelled, "run cancelled"))
            }
        }
    }
}
