use axum::{
    extract::{Path, State},
    Json,
};
use engine::WorkflowDefinition;
use serde::Serialize;

use super::AppState;
use crate::ApiError;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub description: String,
    pub nodes: usize,
}

pub async fn list(State(state): State<AppState>) -> Json<Vec<WorkflowSummary>> {
    let summaries = state
        .engine
        .workflow_names()
        .into_iter()
        .filter_map(|name| state.engine.workflow(name))
        .map(|def| WorkflowSummary {
            name: def.name.clone(),
            description: def.description.clone(),
            nodes: def.nodes.len(),
        })
        .collect();
    Json(summaries)
}

pub async fn get(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowDefinition>, ApiError> {
    match state.engine.workflow(&name) {
        Some(def) => Ok(Json(def.as_ref().clone())),
        None => Err(ApiError::NotFound(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{EngineConfig, NodeSpec, WorkflowEngine};
    use operators::mock::MockOperator;
    use operators::OperatorRegistry;
    use serde_json::json;

    fn state() -> AppState {
        let mut registry = OperatorRegistry::new();
        registry.register("noop", MockOperator::returning(json!({}))).unwrap();
        let mut engine = WorkflowEngine::new(registry, EngineConfig::default());
        for name in ["review", "intake"] {
            engine
                .register_workflow(WorkflowDefinition::new(
                    name,
                    vec![NodeSpec::new("a", "noop"), NodeSpec::new("b", "noop").depends_on(["a"])],
                ))
                .unwrap();
        }
        AppState::new(engine)
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let Json(summaries) = list(State(state())).await;
        let names: Vec<&str> = summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["intake", "review"]);
        assert_eq!(summaries[0].nodes, 2);
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let err = get(Path("missing".into()), State(state())).await.unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
