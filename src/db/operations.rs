use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::ProjectStore;
use crate::models::*;
use crate::types::{AppError, AppResult};

// Note: FromRow rows are used with runtime query_as (no DATABASE_URL at compile time)

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    title: String,
    description: String,
    keywords: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            keywords: row.keywords.0,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResearchRow {
    id: Uuid,
    project_id: Uuid,
    execute_time: Option<f64>,
    date: DateTime<Utc>,
    status: String,
    initial_results_count: i32,
    relevant_results_count: i32,
    opportunities_found_count: i32,
}

impl TryFrom<ResearchRow> for Research {
    type Error = AppError;

    fn try_from(row: ResearchRow) -> AppResult<Self> {
        let status = ResearchStatus::from_db(&row.status).ok_or_else(|| {
            AppError::Internal(format!("Unknown research status '{}'", row.status))
        })?;

        Ok(Self {
            id: row.id,
            project_id: row.project_id,
            execute_time: row.execute_time,
            date: row.date,
            status,
            initial_results_count: counter_from_db(row.initial_results_count),
            relevant_results_count: counter_from_db(row.relevant_results_count),
            opportunities_found_count: counter_from_db(row.opportunities_found_count),
        })
    }
}

fn counter_from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn counter_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

const RESEARCH_COLUMNS: &str = "id, project_id, execute_time, date, status, \
    initial_results_count, relevant_results_count, opportunities_found_count";

/// Postgres-backed project store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn require_research(tx: &mut sqlx::PgConnection, id: Uuid) -> AppResult<()> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM researches WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        found
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Research {} not found.", id)))
    }

    async fn next_position(tx: &mut sqlx::PgConnection, table: &str, research_id: Uuid) -> AppResult<i32> {
        let query = format!(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM {} WHERE research_id = $1",
            table
        );
        let position: i32 = sqlx::query_scalar(&query)
            .bind(research_id)
            .fetch_one(&mut *tx)
            .await?;
        Ok(position)
    }
}

#[derive(sqlx::FromRow)]
struct ItemContextRow {
    id: Uuid,
    research_id: Uuid,
    title: String,
    url: String,
    content: String,
    is_relevant: bool,
    created_at: DateTime<Utc>,
}

impl From<ItemContextRow> for ItemContext {
    fn from(row: ItemContextRow) -> Self {
        Self {
            id: row.id,
            research_id: row.research_id,
            title: row.title,
            url: row.url,
            content: row.content,
            is_relevant: row.is_relevant,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct OpportunityRow {
    id: Uuid,
    research_id: Uuid,
    title: String,
    funder: Option<String>,
    deadline: Option<String>,
    amount: Option<String>,
    url: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<OpportunityRow> for Opportunity {
    fn from(row: OpportunityRow) -> Self {
        Self {
            id: row.id,
            research_id: row.research_id,
            details: NewOpportunity {
                title: row.title,
                funder: row.funder,
                deadline: row.deadline,
                amount: row.amount,
                url: row.url,
                summary: row.summary,
            },
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ProjectStore for PgStore {
    async fn create_project(&self, project: NewProject) -> AppResult<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            INSERT INTO projects (id, title, description, keywords)
            VALUES ($1, $2, $3, $4)
            RETURNING id, title, description, keywords, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&project.title)
        .bind(&project.description)
        .bind(Json(&project.keywords))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_project(&self, id: Uuid) -> AppResult<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, title, description, keywords, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Project::from))
    }

    async fn create_research(&self, project_id: Uuid) -> AppResult<Research> {
        let research = Research::new_running(project_id);
        let query = format!(
            "INSERT INTO researches (id, project_id, date, status) VALUES ($1, $2, $3, $4) RETURNING {}",
            RESEARCH_COLUMNS
        );

        let row = sqlx::query_as::<_, ResearchRow>(&query)
            .bind(research.id)
            .bind(research.project_id)
            .bind(research.date)
            .bind(research.status.as_str())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn get_research(&self, id: Uuid) -> AppResult<Option<Research>> {
        let query = format!("SELECT {} FROM researches WHERE id = $1", RESEARCH_COLUMNS);

        sqlx::query_as::<_, ResearchRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Research::try_from)
            .transpose()
    }

    async fn list_researches(&self, project_id: Uuid) -> AppResult<Vec<Research>> {
        let query = format!(
            "SELECT {} FROM researches WHERE project_id = $1 ORDER BY date DESC",
            RESEARCH_COLUMNS
        );

        let rows = sqlx::query_as::<_, ResearchRow>(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Research::try_from).collect()
    }

    async fn save_research_status(&self, research: &Research) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE researches SET status = $1, execute_time = $2 WHERE id = $3",
        )
        .bind(research.status.as_str())
        .bind(research.execute_time)
        .bind(research.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Research {} not found.", research.id)));
        }
        Ok(())
    }

    async fn save_research_counters(&self, id: Uuid, counters: ResearchCounters) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE researches
            SET initial_results_count = $1,
                relevant_results_count = $2,
                opportunities_found_count = $3
            WHERE id = $4
            "#,
        )
        .bind(counter_to_db(counters.initial_results_count))
        .bind(counter_to_db(counters.relevant_results_count))
        .bind(counter_to_db(counters.opportunities_found_count))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Research {} not found.", id)));
        }
        Ok(())
    }

    async fn save_item_contexts(&self, research_id: Uuid, contexts: Vec<NewItemContext>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_research(&mut tx, research_id).await?;
        let mut position = Self::next_position(&mut tx, "item_contexts", research_id).await?;

        for context in contexts {
            sqlx::query(
                r#"
                INSERT INTO item_contexts (id, research_id, position, title, url, content, is_relevant)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (research_id, url) DO UPDATE
                SET title = EXCLUDED.title,
                    content = EXCLUDED.content,
                    is_relevant = EXCLUDED.is_relevant
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(research_id)
            .bind(position)
            .bind(&context.title)
            .bind(&context.url)
            .bind(&context.content)
            .bind(context.is_relevant)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_item_contexts(&self, research_id: Uuid) -> AppResult<Vec<ItemContext>> {
        let rows = sqlx::query_as::<_, ItemContextRow>(
            r#"
            SELECT id, research_id, title, url, content, is_relevant, created_at
            FROM item_contexts
            WHERE research_id = $1
            ORDER BY position
            "#,
        )
        .bind(research_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ItemContext::from).collect())
    }

    async fn save_opportunities(&self, research_id: Uuid, opportunities: Vec<NewOpportunity>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::require_research(&mut tx, research_id).await?;
        let mut position = Self::next_position(&mut tx, "opportunities", research_id).await?;

        for opportunity in opportunities {
            sqlx::query(
                r#"
                INSERT INTO opportunities (id, research_id, position, title, funder, deadline, amount, url, summary)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(research_id)
            .bind(position)
            .bind(&opportunity.title)
            .bind(&opportunity.funder)
            .bind(&opportunity.deadline)
            .bind(&opportunity.amount)
            .bind(&opportunity.url)
            .bind(&opportunity.summary)
            .execute(&mut *tx)
            .await?;
            position += 1;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_opportunities(&self, research_id: Uuid) -> AppResult<Vec<Opportunity>> {
        let rows = sqlx::query_as::<_, OpportunityRow>(
            r#"
            SELECT id, research_id, title, funder, deadline, amount, url, summary, created_at
            FROM opportunities
            WHERE research_id = $1
            ORDER BY position
            "#,
        )
        .bind(research_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Opportunity::from).collect())
    }

    async fn health_check(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
