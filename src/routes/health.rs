use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};
use tracing::warn;

use crate::db::ProjectStore;
use crate::models::{AppState, HealthResponse};
use crate::status::StatusStore;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    let database = match state.store.health_check().await {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            warn!(error = %e, "Database health check failed");
            "unavailable".to_string()
        }
    };
    let status_store = match state.status.health_check().await {
        Ok(()) => "connected".to_string(),
        Err(e) => {
            warn!(error = %e, "Status store health check failed");
            "unavailable".to_string()
        }
    };

    let status = if database == "connected" && status_store == "connected" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        database,
        status_store,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryStore;
    use crate::queue::TaskQueue;
    use crate::status::MemoryStatusStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_in_memory() {
        let status = Arc::new(MemoryStatusStore::new());
        let (queue, _receiver) = TaskQueue::new(1, status.clone());
        let state = AppState {
            config: Config::for_tests(),
            store: Arc::new(MemoryStore::new()),
            status,
            queue,
        };

        let response = router(state)
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["database"], "connected");
        assert_eq!(body["status_store"], "connected");
    }
}
