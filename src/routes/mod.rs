//! API Routes
//!
//! - `POST /start-task/` - Enqueue a flow run, returns its task id
//! - `GET /task-status/{task_id}/` - Server-sent status stream for a task
//! - `GET /api/tasks/{task_id}` - Point-in-time task status
//! - `/api/projects` - Projects and their research records
//! - `/api/health` - Health checks

pub mod health;
pub mod projects;
pub mod tasks;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(tasks::router(state.clone()))
        .merge(projects::router(state.clone()))
        .merge(health::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
