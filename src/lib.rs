// Opportunity Radar - LLM flows for discovering funding opportunities

pub mod config;
pub mod db;
pub mod models;
pub mod types;
pub mod llm;
pub mod search;    // Web search (SerpAPI)
pub mod flows;     // Flow registry, chain runtime and built-in flows
pub mod status;    // Task status publication
pub mod queue;
pub mod routes;
pub mod middleware;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
