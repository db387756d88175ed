//! Progress observation for running pipelines.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::status::{ResultEntry, TaskPayload, TaskReporter, TaskStatus};

/// Progress reported when a named step starts.
pub const STEP_START_PROGRESS: u8 = 10;
/// Progress reported when a model call starts.
pub const MODEL_CALL_PROGRESS: u8 = 50;
/// Progress reported when a tool finishes.
pub const TOOL_RESULT_PROGRESS: u8 = 75;
/// Progress of a completed flow.
pub const COMPLETE_PROGRESS: u8 = 100;

/// Lifecycle hooks a pipeline calls while it runs.
///
/// Pipelines depend only on this trait; where the events end up is the
/// implementor's business.
#[async_trait]
pub trait FlowObserver: Send + Sync {
    /// A step is starting. Unnamed (`None`) steps are internal plumbing.
    async fn on_step_start(&self, step_name: Option<&str>);

    /// A model call is about to be made on behalf of a step.
    async fn on_model_call_start(&self, step_name: Option<&str>);

    /// A tool finished with `raw_output`.
    async fn on_tool_result(&self, step_name: &str, tool: &str, raw_output: &str);
}

/// Parse tool output as JSON, keeping the raw text when it isn't.
pub fn parse_tool_output(raw_output: &str) -> Value {
    serde_json::from_str(raw_output).unwrap_or_else(|_| Value::String(raw_output.to_string()))
}

#[derive(Default)]
struct ProgressRecord {
    results: Vec<ResultEntry>,
    status_message: String,
    progress: u8,
}

/// Observer that turns pipeline events into the task's PROGRESS status.
///
/// Keeps an append-only results log and republishes the whole log with
/// every event. One instance per task execution.
pub struct ProgressObserver {
    reporter: TaskReporter,
    record: Mutex<ProgressRecord>,
}

impl ProgressObserver {
    pub fn new(reporter: TaskReporter) -> Self {
        Self {
            reporter,
            record: Mutex::new(ProgressRecord::default()),
        }
    }

    /// Snapshot of the results log so far.
    pub fn results(&self) -> Vec<ResultEntry> {
        self.lock().results.clone()
    }

    pub fn progress(&self) -> u8 {
        self.lock().progress
    }

    pub fn status_message(&self) -> String {
        self.lock().status_message.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressRecord> {
        // A poisoned lock still holds a consistent log: entries are pushed whole.
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn record(&self, entry: ResultEntry, status_message: String, progress: u8) {
        let payload = {
            let mut record = self.lock();
            record.results.push(entry);
            record.status_message = status_message;
            record.progress = progress;
            TaskPayload {
                status: record.status_message.clone(),
                step_results: record.results.clone(),
                progress: record.progress,
                final_result: None,
            }
        };

        debug!(task_id = %self.reporter.task_id(), progress, status = %payload.status, "Progress");
        self.reporter.update_state(TaskStatus::progress(payload)).await;
    }
}

#[async_trait]
impl FlowObserver for ProgressObserver {
    async fn on_step_start(&self, step_name: Option<&str>) {
        let Some(name) = step_name else { return };
        self.record(
            ResultEntry::Log { message: format!("Starting step: '{}'...", name) },
            format!("Running '{}'...", name),
            STEP_START_PROGRESS,
        )
        .await;
    }

    async fn on_model_call_start(&self, step_name: Option<&str>) {
        let Some(name) = step_name else { return };
        self.record(
            ResultEntry::Log { message: format!("LLM processing for: '{}'...", name) },
            format!("LLM thinking about '{}'...", name),
            MODEL_CALL_PROGRESS,
        )
        .await;
    }

    async fn on_tool_result(&self, step_name: &str, tool: &str, raw_output: &str) {
        self.record(
            ResultEntry::ToolResult {
                step_name: step_name.to_string(),
                tool: tool.to_string(),
                data: parse_tool_output(raw_output),
            },
            format!("Tool '{}' completed.", step_name),
            TOOL_RESULT_PROGRESS,
        )
        .await;
    }
}
