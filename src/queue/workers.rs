use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::queue::flow_task::FlowTask;
use crate::queue::jobs::FlowJob;
use crate::status::{TaskPayload, TaskReporter, TaskStatus};
use crate::types::AppError;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<FlowJob>>>;

/// Drains the job queue, one flow task at a time per worker.
pub struct Worker {
    id: usize,
    task: FlowTask,
}

impl Worker {
    pub fn new(id: usize, task: FlowTask) -> Self {
        Self { id, task }
    }

    /// Run `job` in its own tokio task. A panic that escapes the flow task
    /// still ends the job with a FAILURE status.
    pub async fn process_job(&self, job: FlowJob) {
        info!(worker = self.id, task_id = %job.task_id, flow = %job.flow, "Processing job");

        let task = self.task.clone();
        let task_id = job.task_id.clone();
        let handle = tokio::spawn(async move { task.run(job).await });

        match handle.await {
            Ok(result) => {
                info!(worker = self.id, task_id = %task_id, success = result.is_success(), "Job finished");
            }
            Err(e) => {
                error!(worker = self.id, task_id = %task_id, error = %e, "Worker task panicked");
                let message = AppError::Internal("worker task panicked".to_string()).status_message();
                TaskReporter::new(task_id, self.task.status_store())
                    .update_state(TaskStatus::failure(TaskPayload {
                        status: message,
                        step_results: Vec::new(),
                        progress: 0,
                        final_result: None,
                    }))
                    .await;
            }
        }
    }

    async fn run(self, receiver: SharedReceiver) {
        info!(worker = self.id, "Worker started");
        loop {
            let job = { receiver.lock().await.recv().await };
            match job {
                Some(job) => self.process_job(job).await,
                None => break,
            }
        }
        info!(worker = self.id, "Worker stopped");
    }
}

/// Start `concurrency` workers sharing `receiver`. They stop once every
/// queue handle is dropped and the channel is drained.
pub fn spawn_workers(
    concurrency: usize,
    task: FlowTask,
    receiver: mpsc::Receiver<FlowJob>,
) -> Vec<JoinHandle<()>> {
    let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));
    (0..concurrency.max(1))
        .map(|id| tokio::spawn(Worker::new(id, task.clone()).run(receiver.clone())))
        .collect()
}
