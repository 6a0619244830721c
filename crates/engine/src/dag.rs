//! DAG validation and the per-run execution graph.
//!
//! Rules enforced:
//! 1. The workflow has at least one node and node IDs are unique.
//! 2. Every `depends_on` entry and explicit edge references a declared node.
//! 3. The directed graph is acyclic (Kahn's algorithm must consume every node).
//! 4. Every node's operator is registered (checked by [`ExecutionGraph::build`]).
//!
//! All of this happens before any operator runs.

use std::collections::{HashMap, HashSet, VecDeque};

use operators::{OperatorRegistry, RegisteredOperator};

use crate::{GraphError, NodeSpec, WorkflowDefinition};

/// Structure shared by [`validate_dag`] and [`ExecutionGraph::build`].
struct Topology {
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

fn topology(workflow: &WorkflowDefinition) -> Result<Topology, GraphError> {
    if workflow.nodes.is_empty() {
        return Err(GraphError::EmptyWorkflow(workflow.name.clone()));
    }

    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut node_set: HashSet<&str> = HashSet::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if !node_set.insert(node.id.as_str()) {
            return Err(GraphError::DuplicateNodeId(node.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate references
    // -----------------------------------------------------------------------
    for node in &workflow.nodes {
        if let Some(missing) = node.depends_on.iter().find(|d| !node_set.contains(d.as_str())) {
            return Err(GraphError::UnknownDependency {
                node_id: node.id.clone(),
                dependency: missing.clone(),
            });
        }
    }
    for edge in &workflow.edges {
        for end in [&edge.from, &edge.to] {
            if !node_set.contains(end.as_str()) {
                return Err(GraphError::UnknownEdgeNode {
                    edge: edge.to_string(),
                    node_id: end.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &workflow.nodes {
        dependencies.entry(node.id.clone()).or_default();
        dependents.entry(node.id.clone()).or_default();
        in_degree.insert(node.id.as_str(), 0);
    }

    for (from, to) in workflow.dependency_pairs() {
        dependents.entry(from.to_owned()).or_default().push(to.to_owned());
        dependencies.entry(to.to_owned()).or_default().push(from.to_owned());
        *in_degree.entry(to).or_insert(0) += 1;
    }

    // Seed in declaration order so the resulting order is stable.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_owned());

        for next in &dependents[node_id] {
            if let Some(deg) = in_degree.get_mut(next.as_str()) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(next.as_str());
                }
            }
        }
    }

    // Anything not visited sits on, or downstream of, a cycle.
    if order.len() != workflow.nodes.len() {
        let visited: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut nodes: Vec<String> = workflow
            .nodes
            .iter()
            .filter(|n| !visited.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        nodes.sort();
        return Err(GraphError::CyclicDependency { nodes });
    }

    Ok(Topology {
        order,
        dependencies,
        dependents,
    })
}

/// Validate the workflow's structure and return node IDs in topological
/// execution order. Operators are not checked.
///
/// # Errors
/// - [`GraphError::EmptyWorkflow`] if there are no nodes.
/// - [`GraphError::DuplicateNodeId`] if two nodes share an ID.
/// - [`GraphError::UnknownDependency`] / [`GraphError::UnknownEdgeNode`] for
///   dangling references.
/// - [`GraphError::CyclicDependency`] if the graph is not acyclic.
pub fn validate_dag(workflow: &WorkflowDefinition) -> Result<Vec<String>, GraphError> {
    topology(workflow).map(|t| t.order)
}

/// A node of the execution graph with its resolved operator.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub spec: NodeSpec,
    pub operator: RegisteredOperator,
}

/// Validated, per-run view of a workflow: adjacency in both directions,
/// in-degrees and a topological order.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl ExecutionGraph {
    /// Build and validate the graph for `workflow`, resolving every operator
    /// through `registry`.
    pub fn build(
        workflow: &WorkflowDefinition,
        registry: &OperatorRegistry,
    ) -> Result<Self, GraphError> {
        let Topology {
            order,
            dependencies,
            dependents,
        } = topology(workflow)?;

        let mut nodes = HashMap::with_capacity(workflow.nodes.len());
        for spec in &workflow.nodes {
            let operator = registry
                .resolve(&spec.op)
                .map_err(|_| GraphError::UnknownOperator {
                    node_id: spec.id.clone(),
                    operator: spec.op.clone(),
                })?;
            nodes.insert(
                spec.id.clone(),
                GraphNode {
                    spec: spec.clone(),
                    operator,
                },
            );
        }

        Ok(Self {
            nodes,
            order,
            dependencies,
            dependents,
        })
    }

    /// Node IDs in topological order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Nodes with no dependencies, in topological order.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(|id| self.in_degree(id) == 0)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.dependencies(id).len()
    }

    /// Every node reachable from `id` through dependents, excluding `id`.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.dependents(id).iter().map(String::as_str).collect();
        let mut out = Vec::new();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                out.push(next.to_owned());
                stack.extend(self.dependents(next).iter().map(String::as_str));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::Edge;
    use operators::mock::MockOperator;
    use serde_json::json;

    fn node(id: &str, deps: &[&str]) -> NodeSpec {
        NodeSpec::new(id, "mock").depends_on(deps.iter().copied())
    }

    fn workflow(nodes: Vec<NodeSpec>) -> WorkflowDefinition {
        WorkflowDefinition::new("test", nodes)
    }

    fn registry() -> OperatorRegistry {
        let mut registry = OperatorRegistry::new();
        registry.register("mock", MockOperator::returning(json!({}))).unwrap();
        registry
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let wf = workflow(vec![node("a", &[]), node("b", &["a"]), node("c", &["b"])]);
        assert_eq!(validate_dag(&wf).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let wf = workflow(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("d", &["b", "c"]),
        ]);
        let sorted = validate_dag(&wf).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn explicit_edges_add_dependencies() {
        let mut wf = workflow(vec![node("a", &[]), node("b", &[])]);
        wf.edges.push(Edge { from: "a".into(), to: "b".into() });

        let graph = ExecutionGraph::build(&wf, &registry()).unwrap();
        assert_eq!(graph.dependencies("b"), ["a".to_string()]);
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn redundant_edges_do_not_double_count() {
        let mut wf = workflow(vec![node("a", &[]), node("b", &["a"])]);
        wf.edges.push(Edge { from: "a".into(), to: "b".into() });

        let graph = ExecutionGraph::build(&wf, &registry()).unwrap();
        assert_eq!(graph.in_degree("b"), 1);
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert_eq!(
            validate_dag(&workflow(vec![])),
            Err(GraphError::EmptyWorkflow("test".into()))
        );
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let wf = workflow(vec![node("a", &[]), node("a", &[])]);
        assert_eq!(validate_dag(&wf), Err(GraphError::DuplicateNodeId("a".into())));
    }

    #[test]
    fn dependency_on_missing_node_is_rejected() {
        let wf = workflow(vec![node("a", &["ghost"])]);
        assert_eq!(
            validate_dag(&wf),
            Err(GraphError::UnknownDependency {
                node_id: "a".into(),
                dependency: "ghost".into()
            })
        );
    }

    #[test]
    fn edge_to_missing_node_is_rejected() {
        let mut wf = workflow(vec![node("a", &[])]);
        wf.edges.push(Edge { from: "a".into(), to: "ghost".into() });
        assert!(matches!(
            validate_dag(&wf),
            Err(GraphError::UnknownEdgeNode { node_id, .. }) if node_id == "ghost"
        ));
    }

    #[test]
    fn cycle_is_detected_and_named() {
        // root → A → B → C → A  (cycle!)
        let wf = workflow(vec![
            node("root", &[]),
            node("a", &["root", "c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ]);
        assert_eq!(
            validate_dag(&wf),
            Err(GraphError::CyclicDependency {
                nodes: vec!["a".into(), "b".into(), "c".into()]
            })
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let wf = workflow(vec![node("loop", &["loop"])]);
        assert!(matches!(validate_dag(&wf), Err(GraphError::CyclicDependency { .. })));
    }

    #[test]
    fn unknown_operator_is_rejected_at_build_time() {
        let wf = workflow(vec![NodeSpec::new("summarize", "summarise")]);
        assert_eq!(
            ExecutionGraph::build(&wf, &registry()).unwrap_err(),
            GraphError::UnknownOperator {
                node_id: "summarize".into(),
                operator: "summarise".into()
            }
        );
    }

    #[test]
    fn descendants_are_transitive() {
        let wf = workflow(vec![
            node("a", &[]),
            node("b", &["a"]),
            node("c", &["b"]),
            node("d", &[]),
        ]);
        let graph = ExecutionGraph::build(&wf, &registry()).unwrap();
        let mut desc = graph.descendants("a");
        desc.sort();
        assert_eq!(desc, vec!["b", "c"]);
        assert!(graph.descendants("d").is_empty());
    }
}
