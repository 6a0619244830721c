pub mod executions;
pub mod workflows;

pub(crate) use crate::AppState;
