//! Task status channel
//!
//! Workers publish a task's state here as it runs; HTTP handlers poll it,
//! either once or as a server-sent event stream.
//!
//! ```text
//! PENDING ──▶ PROGRESS ──▶ PROGRESS ... ──▶ SUCCESS | FAILURE
//! ```
//!
//! Terminal states are sticky: once a task reaches SUCCESS or FAILURE,
//! later publishes for it are ignored. Intermediate states are best-effort;
//! a slow poller may never see some of them.

pub mod memory;
pub mod redis;
pub mod stream;

pub use self::memory::MemoryStatusStore;
pub use self::redis::RedisStatusStore;
pub use self::stream::{status_stream, StatusFrame};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Progress,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// One entry of a task's results log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultEntry {
    Log {
        message: String,
    },
    ToolResult {
        step_name: String,
        tool: String,
        /// Parsed JSON when the tool produced valid JSON, the raw string otherwise.
        data: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub status: String,
    pub step_results: Vec<ResultEntry>,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(default)]
    pub payload: Option<TaskPayload>,
}

impl TaskStatus {
    pub fn pending() -> Self {
        Self { state: TaskState::Pending, payload: None }
    }

    pub fn progress(payload: TaskPayload) -> Self {
        Self { state: TaskState::Progress, payload: Some(payload) }
    }

    pub fn success(payload: TaskPayload) -> Self {
        Self { state: TaskState::Success, payload: Some(payload) }
    }

    pub fn failure(payload: TaskPayload) -> Self {
        Self { state: TaskState::Failure, payload: Some(payload) }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Record the task's current state. Ignored if the task is already terminal.
    async fn publish(&self, task_id: &str, status: TaskStatus) -> AppResult<()>;

    /// Point-in-time read; unknown task ids read as PENDING.
    async fn poll(&self, task_id: &str) -> AppResult<TaskStatus>;

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}

/// A running task's handle on its own status entry.
#[derive(Clone)]
pub struct TaskReporter {
    task_id: String,
    store: Arc<dyn StatusStore>,
}

impl TaskReporter {
    pub fn new(task_id: impl Into<String>, store: Arc<dyn StatusStore>) -> Self {
        Self { task_id: task_id.into(), store }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publish a status update. Progress is best-effort, so a store failure
    /// is logged and otherwise ignored.
    pub async fn update_state(&self, status: TaskStatus) {
        if let Err(e) = self.store.publish(&self.task_id, status).await {
            warn!(task_id = %self.task_id, error = %e, "Failed to publish task status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_entry_wire_format() {
        let log = ResultEntry::Log { message: "started".to_string() };
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            serde_json::json!({"type": "log", "message": "started"})
        );

        let tool = ResultEntry::ToolResult {
            step_name: "Search".to_string(),
            tool: "web_search".to_string(),
            data: serde_json::json!({"a": 1}),
        };
        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            serde_json::json!({"type": "tool_result", "step_name": "Search", "tool": "web_search", "data": {"a": 1}})
        );
    }

    #[test]
    fn test_state_names() {
        assert_eq!(serde_json::to_value(TaskState::Progress).unwrap(), "PROGRESS");
        assert!(TaskState::Failure.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
    }

    #[test]
    fn test_final_result_omitted_when_absent() {
        let payload = TaskPayload {
            status: "Running".to_string(),
            step_results: vec![],
            progress: 10,
            final_result: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("final_result").is_none());
        assert_eq!(json["progress"], 10);
    }
}
