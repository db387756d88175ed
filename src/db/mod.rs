use sqlx::postgres::{PgPool, PgPoolOptions};
use async_trait::async_trait;
use uuid::Uuid;
use crate::config::DatabaseConfig;
use crate::models::{
    ItemContext, NewItemContext, NewOpportunity, NewProject, Opportunity, Project, Research, ResearchCounters,
};
use crate::types::{AppError, AppResult};
use anyhow::Result;

pub use memory::MemoryStore;
pub use operations::PgStore;

pub mod memory;
pub mod operations;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.url)
        .await?;

    // Test connection
    sqlx::query("SELECT 1")
        .fetch_one(&pool)
        .await?;

    Ok(pool)
}

/// Persistence for projects and their research records.
///
/// Research writes are split by owner: the flow task saves status and
/// timing, pipelines save counters. Neither write touches the other's
/// columns, so the two can interleave on the same record.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, project: NewProject) -> AppResult<Project>;

    async fn get_project(&self, id: Uuid) -> AppResult<Option<Project>>;

    /// Insert a new research record in `RUNNING` state.
    async fn create_research(&self, project_id: Uuid) -> AppResult<Research>;

    async fn get_research(&self, id: Uuid) -> AppResult<Option<Research>>;

    /// Newest first.
    async fn list_researches(&self, project_id: Uuid) -> AppResult<Vec<Research>>;

    /// Persist `status` and `execute_time` only.
    async fn save_research_status(&self, research: &Research) -> AppResult<()>;

    /// Persist the three counters only.
    async fn save_research_counters(&self, id: Uuid, counters: ResearchCounters) -> AppResult<()>;

    /// Append the search results a research looked at, in order. A URL
    /// already saved for the research is updated in place.
    async fn save_item_contexts(&self, research_id: Uuid, contexts: Vec<NewItemContext>) -> AppResult<()>;

    /// In the order they were saved.
    async fn list_item_contexts(&self, research_id: Uuid) -> AppResult<Vec<ItemContext>>;

    /// Append the opportunities a research found, in order.
    async fn save_opportunities(&self, research_id: Uuid, opportunities: Vec<NewOpportunity>) -> AppResult<()>;

    /// In the order they were saved.
    async fn list_opportunities(&self, research_id: Uuid) -> AppResult<Vec<Opportunity>>;

    async fn health_check(&self) -> AppResult<()>;

    /// Reload a research record, picking up writes made since it was read.
    async fn refresh_research(&self, research: &Research) -> AppResult<Research> {
        self.get_research(research.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Research {} not found.", research.id)))
    }
}
