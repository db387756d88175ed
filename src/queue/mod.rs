//! Background flow execution.
//!
//! HTTP handlers enqueue a [`FlowJob`] and return its task id right away;
//! a pool of workers runs each job through [`FlowTask`] and publishes its
//! progress to the status store.

pub mod flow_task;
pub mod jobs;
pub mod workers;

pub use flow_task::{FlowTask, FlowTaskResult};
pub use jobs::FlowJob;
pub use workers::{spawn_workers, Worker};

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::flows::FlowInputs;
use crate::status::{StatusStore, TaskStatus};
use crate::types::{AppError, AppResult};

/// Producer side of the job queue.
#[derive(Clone)]
pub struct TaskQueue {
    sender: mpsc::Sender<FlowJob>,
    status: Arc<dyn StatusStore>,
}

impl TaskQueue {
    pub fn new(capacity: usize, status: Arc<dyn StatusStore>) -> (Self, mpsc::Receiver<FlowJob>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender, status }, receiver)
    }

    /// Record the task as PENDING and hand it to the workers.
    pub async fn enqueue(
        &self,
        flow: impl Into<String>,
        inputs: FlowInputs,
        project_id: Option<Uuid>,
    ) -> AppResult<String> {
        let job = FlowJob::new(flow, inputs, project_id);
        let task_id = job.task_id.clone();

        self.status.publish(&task_id, TaskStatus::pending()).await?;
        self.sender
            .send(job)
            .await
            .map_err(|_| AppError::Internal("task queue is closed".to_string()))?;

        info!(task_id = %task_id, "Task enqueued");
        Ok(task_id)
    }
}
