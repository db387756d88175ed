use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flows::FlowInputs;

/// One flow execution waiting for a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowJob {
    pub task_id: String,
    pub flow: String,
    #[serde(default)]
    pub inputs: FlowInputs,
    #[serde(default)]
    pub project_id: Option<Uuid>,
}

impl FlowJob {
    pub fn new(flow: impl Into<String>, inputs: FlowInputs, project_id: Option<Uuid>) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            flow: flow.into(),
            inputs,
            project_id,
        }
    }
}
