use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::db::ProjectStore;
use crate::models::{AppState, NewProject, Project, ResearchDetail, ResearchView};
use crate::types::{AppError, AppResult};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/projects", post(create_project))
        .route("/api/projects/{id}", get(get_project))
        .route("/api/projects/{id}/researches", get(list_researches))
        .route("/api/researches/{id}", get(get_research))
        .with_state(state)
}

async fn create_project(
    State(state): State<AppState>,
    payload: Result<Json<NewProject>, JsonRejection>,
) -> AppResult<(StatusCode, ResponseJson<Project>)> {
    let Json(mut project) = payload.map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))?;

    project.title = project.title.trim().to_string();
    if project.title.is_empty() {
        return Err(AppError::InvalidRequest("'title' must not be empty".to_string()));
    }
    project.keywords.retain(|k| !k.trim().is_empty());

    let project = state.store.create_project(project).await?;
    info!(project_id = %project.id, title = %project.title, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_project(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<ResponseJson<Project>> {
    load_project(&state, id).await.map(Json)
}

/// Research runs for a project, newest first, with their ratios.
async fn list_researches(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ResponseJson<Vec<ResearchView>>> {
    load_project(&state, id).await?;
    let researches = state.store.list_researches(id).await?;
    Ok(Json(researches.into_iter().map(ResearchView::from).collect()))
}

/// One research run with the search results it looked at and the
/// opportunities it found.
async fn get_research(State(state): State<AppState>, Path(id): Path<Uuid>) -> AppResult<ResponseJson<ResearchDetail>> {
    let research = state
        .store
        .get_research(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Research not found.".to_string()))?;
    let contexts = state.store.list_item_contexts(id).await?;
    let opportunities = state.store.list_opportunities(id).await?;

    Ok(Json(ResearchDetail {
        research: research.into(),
        contexts,
        opportunities,
    }))
}

async fn load_project(state: &AppState, id: Uuid) -> AppResult<Project> {
    state
        .store
        .get_project(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found.".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryStore;
    use crate::models::{NewItemContext, NewOpportunity, ResearchCounters};
    use crate::queue::TaskQueue;
    use crate::status::MemoryStatusStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(store: Arc<MemoryStore>) -> AppState {
        let status = Arc::new(MemoryStatusStore::new());
        let (queue, _receiver) = TaskQueue::new(1, status.clone());
        AppState {
            config: Config::for_tests(),
            store,
            status,
            queue,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_project() {
        let store = Arc::new(MemoryStore::new());
        let response = router(state(store.clone()))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/projects")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"title": " Reef monitoring ", "description": "Sensors", "keywords": ["ocean", " "]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["title"], "Reef monitoring");
        assert_eq!(body["keywords"], serde_json::json!(["ocean"]));

        let id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
        assert!(store.get_project(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_title_is_rejected() {
        let response = router(state(Arc::new(MemoryStore::new())))
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/projects")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"title": "", "description": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_researches_with_ratios() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                title: "Reef".to_string(),
                description: String::new(),
                keywords: vec![],
            })
            .await
            .unwrap();
        let research = store.create_research(project.id).await.unwrap();
        store
            .save_research_counters(
                research.id,
                ResearchCounters {
                    initial_results_count: 8,
                    relevant_results_count: 2,
                    opportunities_found_count: 1,
                },
            )
            .await
            .unwrap();

        let response = router(state(store))
            .oneshot(
                Request::builder()
                    .uri(format!("/api/projects/{}/researches", project.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["status"], "RUNNING");
        assert_eq!(body[0]["relevance_ratio"], 25.0);
        assert_eq!(body[0]["opportunity_ratio"], 50.0);
    }

    #[tokio::test]
    async fn test_unknown_project_is_404() {
        let response = router(state(Arc::new(MemoryStore::new())))
            .oneshot(
                Request::builder()
                    .uri(format!("/api/projects/{}/researches", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Project not found.");
    }

    #[tokio::test]
    async fn test_research_detail_lists_findings() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                title: "Reef".to_string(),
                description: String::new(),
                keywords: vec![],
            })
            .await
            .unwrap();
        let research = store.create_research(project.id).await.unwrap();
        store
            .save_item_contexts(
                research.id,
                vec![NewItemContext {
                    title: "Ocean Grant".to_string(),
                    url: "https://grants.example/ocean".to_string(),
                    content: "Open call".to_string(),
                    is_relevant: true,
                }],
            )
            .await
            .unwrap();
        store
            .save_opportunities(
                research.id,
                vec![NewOpportunity {
                    title: "Ocean Grant".to_string(),
                    funder: Some("Sea Trust".to_string()),
                    deadline: None,
                    amount: None,
                    url: Some("https://grants.example/ocean".to_string()),
                    summary: None,
                }],
            )
            .await
            .unwrap();

        let response = router(state(store))
            .oneshot(
                Request::builder()
                    .uri(format!("/api/researches/{}", research.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], research.id.to_string());
        assert_eq!(body["status"], "RUNNING");
        assert_eq!(body["relevance_ratio"], 0.0);
        assert_eq!(body["contexts"][0]["url"], "https://grants.example/ocean");
        assert_eq!(body["contexts"][0]["is_relevant"], true);
        assert_eq!(body["opportunities"][0]["funder"], "Sea Trust");
    }

    #[tokio::test]
    async fn test_unknown_research_is_404() {
        let response = router(state(Arc::new(MemoryStore::new())))
            .oneshot(
                Request::builder()
                    .uri(format!("/api/researches/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Research not found.");
    }
}
