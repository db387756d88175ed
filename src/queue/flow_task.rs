//! Generic flow task
//!
//! Runs one [`FlowJob`] end to end:
//!
//! ```text
//! resolve flow ─▶ [load project, create Research RUNNING] ─▶ build LLM + pipeline
//!              ─▶ transform inputs ─▶ invoke ─▶ SUCCESS (Research COMPLETED)
//!                                             └▶ FAILURE (Research FAILED)
//! ```
//!
//! Every error ends here: the task publishes a terminal status and returns
//! a result, it never propagates the error and never retries.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::db::ProjectStore;
use crate::flows::observer::COMPLETE_PROGRESS;
use crate::flows::{FlowFactory, FlowInputs, FlowObserver, FlowOutput, FlowRegistry, ProgressObserver};
use crate::llm::{LlmFactory, ROLE_GENERAL};
use crate::models::{Research, ResearchStatus};
use crate::queue::jobs::FlowJob;
use crate::status::{ResultEntry, StatusStore, TaskPayload, TaskReporter, TaskStatus};
use crate::types::{AppError, AppResult};

pub const SUCCESS_MESSAGE: &str = "Flow completed!";

/// What the task returns once it is done.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowTaskResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_results: Option<Vec<ResultEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl FlowTaskResult {
    fn failed(message: String) -> Self {
        Self {
            status: message,
            step_results: None,
            final_result: None,
            progress: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_result.is_some()
    }
}

#[derive(Clone)]
pub struct FlowTask {
    registry: Arc<FlowRegistry>,
    llm_factory: Arc<dyn LlmFactory>,
    store: Arc<dyn ProjectStore>,
    status: Arc<dyn StatusStore>,
}

impl FlowTask {
    pub fn new(
        registry: Arc<FlowRegistry>,
        llm_factory: Arc<dyn LlmFactory>,
        store: Arc<dyn ProjectStore>,
        status: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            registry,
            llm_factory,
            store,
            status,
        }
    }

    pub fn status_store(&self) -> Arc<dyn StatusStore> {
        self.status.clone()
    }

    pub async fn run(&self, job: FlowJob) -> FlowTaskResult {
        let started = Instant::now();
        let reporter = TaskReporter::new(job.task_id.clone(), self.status.clone());
        let observer = Arc::new(ProgressObserver::new(reporter.clone()));

        info!(task_id = %job.task_id, flow = %job.flow, project_id = ?job.project_id, "Starting flow task");

        let factory = match self.registry.resolve(&job.flow) {
            Ok(factory) => factory,
            Err(e) => return self.fail(&reporter, &observer, None, e).await,
        };

        let (research, inputs) = match self.prepare(&job).await {
            Ok(prepared) => prepared,
            Err(e) => return self.fail(&reporter, &observer, None, e).await,
        };

        match self.execute(factory, inputs, observer.clone()).await {
            Ok(output) => {
                let final_result = output.final_text();
                if let Some(research) = &research {
                    let elapsed = started.elapsed().as_secs_f64();
                    if let Err(e) = self.finish_research(research, ResearchStatus::Completed, Some(elapsed)).await {
                        return self.fail(&reporter, &observer, Some(research), e).await;
                    }
                }

                let step_results = observer.results();
                reporter
                    .update_state(TaskStatus::success(TaskPayload {
                        status: SUCCESS_MESSAGE.to_string(),
                        step_results: step_results.clone(),
                        progress: COMPLETE_PROGRESS,
                        final_result: Some(final_result.clone()),
                    }))
                    .await;

                info!(
                    task_id = %job.task_id,
                    flow = %job.flow,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Flow task completed"
                );

                FlowTaskResult {
                    status: SUCCESS_MESSAGE.to_string(),
                    step_results: Some(step_results),
                    final_result: Some(final_result),
                    progress: Some(COMPLETE_PROGRESS),
                }
            }
            Err(e) => self.fail(&reporter, &observer, research.as_ref(), e).await,
        }
    }

    /// Load the project (if any), open its Research record and add the
    /// project's fields to the inputs.
    ///
    /// `research_id` and `project_id` in the inputs only ever name the
    /// record this task opened; caller-supplied values are dropped.
    async fn prepare(&self, job: &FlowJob) -> AppResult<(Option<Research>, FlowInputs)> {
        let mut inputs = job.inputs.clone();
        for key in ["research_id", "project_id"] {
            if inputs.remove(key).is_some() {
                warn!(task_id = %job.task_id, key, "Ignoring caller-supplied input");
            }
        }
        let Some(project_id) = job.project_id else {
            return Ok((None, inputs));
        };

        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Project not found.".to_string()))?;

        let research = self.store.create_research(project.id).await?;
        info!(task_id = %job.task_id, research_id = %research.id, "Research started");

        inputs.insert("research_id".to_string(), Value::String(research.id.to_string()));
        inputs.insert("project_id".to_string(), Value::String(project.id.to_string()));
        inputs
            .entry("title")
            .or_insert_with(|| Value::String(project.title.clone()));
        inputs
            .entry("description")
            .or_insert_with(|| Value::String(project.description.clone()));
        inputs
            .entry("keywords")
            .or_insert_with(|| serde_json::json!(project.keywords));

        Ok((Some(research), inputs))
    }

    async fn execute(
        &self,
        factory: Arc<dyn FlowFactory>,
        inputs: FlowInputs,
        observer: Arc<ProgressObserver>,
    ) -> AppResult<FlowOutput> {
        let llm = self.llm_factory.build(ROLE_GENERAL)?;
        let pipeline = factory.build(llm)?;
        let inputs = factory.transform_inputs(inputs)?;

        let observer: Arc<dyn FlowObserver> = observer;
        let handle = tokio::spawn(async move { pipeline.invoke(inputs, observer).await });

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(AppError::PipelineExecution("pipeline panicked".to_string())),
            Err(e) => Err(AppError::PipelineExecution(format!("pipeline was cancelled: {}", e))),
        }
    }

    /// Write the final status on a fresh copy of the record so counters
    /// saved by the pipeline survive.
    async fn finish_research(
        &self,
        research: &Research,
        status: ResearchStatus,
        execute_time: Option<f64>,
    ) -> AppResult<()> {
        let mut current = self.store.refresh_research(research).await?;
        current.status = status;
        if execute_time.is_some() {
            current.execute_time = execute_time;
        }
        self.store.save_research_status(&current).await?;
        info!(research_id = %current.id, status = %current.status, execute_time = ?current.execute_time, "Research finished");
        Ok(())
    }

    async fn fail(
        &self,
        reporter: &TaskReporter,
        observer: &ProgressObserver,
        research: Option<&Research>,
        err: AppError,
    ) -> FlowTaskResult {
        error!(task_id = %reporter.task_id(), kind = err.kind(), error = ?err, "Flow task failed");

        if let Some(research) = research {
            if let Err(e) = self.finish_research(research, ResearchStatus::Failed, None).await {
                warn!(research_id = %research.id, error = %e, "Could not mark research as failed");
            }
        }

        let message = err.status_message();
        reporter
            .update_state(TaskStatus::failure(TaskPayload {
                status: message.clone(),
                step_results: observer.results(),
                progress: observer.progress(),
                final_result: None,
            }))
            .await;

        FlowTaskResult::failed(message)
    }
}
