use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::sse::{Event, KeepAlive, Sse},
    response::Json as ResponseJson,
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::models::{AppState, StartTaskRequest, StartTaskResponse};
use crate::status::{status_stream, StatusFrame, StatusStore};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start-task/", post(start_task))
        .route("/task-status/{task_id}/", get(task_status_stream))
        .route("/api/tasks/{task_id}", get(task_status))
        .with_state(state)
}

async fn start_task(
    State(state): State<AppState>,
    payload: Result<Json<StartTaskRequest>, JsonRejection>,
) -> AppResult<ResponseJson<StartTaskResponse>> {
    let Json(request) = payload.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;

    let flow = request
        .flow
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("'flow' is required".to_string()))?;

    info!(flow = %flow, project_id = ?request.project_id, "Received task request");

    let task_id = state.queue.enqueue(flow, request.inputs, request.project_id).await?;
    Ok(Json(StartTaskResponse { task_id }))
}

/// One frame per poll interval until the task is terminal.
async fn task_status_stream(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(task_id = %task_id, "Status stream opened");

    let interval = Duration::from_millis(state.config.worker.status_poll_interval_ms);
    let frames = status_stream(state.status.clone(), task_id, interval).map(|frame| {
        Ok::<_, Infallible>(Event::default().json_data(&frame).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to encode status frame");
            Event::default().data(r#"{"state":"FAILURE","details":"Error: could not encode status"}"#)
        }))
    });

    Sse::new(frames).keep_alive(KeepAlive::default())
}

async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<ResponseJson<StatusFrame>> {
    let status = state.status.poll(&task_id).await?;
    Ok(Json(StatusFrame::from(status)))
}
