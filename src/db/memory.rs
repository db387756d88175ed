use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::ProjectStore;
use crate::models::{
    ItemContext, NewItemContext, NewOpportunity, NewProject, Opportunity, Project, Research, ResearchCounters,
};
use crate::types::{AppError, AppResult};

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    researches: HashMap<Uuid, Research>,
    item_contexts: Vec<ItemContext>,
    opportunities: Vec<Opportunity>,
}

impl Tables {
    fn require_research(&self, id: Uuid) -> AppResult<()> {
        if self.researches.contains_key(&id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Research {} not found.", id)))
        }
    }
}

/// In-process store used when no `DATABASE_URL` is configured.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, project: NewProject) -> AppResult<Project> {
        let project = Project {
            id: Uuid::new_v4(),
            title: project.title,
            description: project.description,
            keywords: project.keywords,
            created_at: Utc::now(),
        };
        let mut guard = self.inner.write().await;
        guard.projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: Uuid) -> AppResult<Option<Project>> {
        let guard = self.inner.read().await;
        Ok(guard.projects.get(&id).cloned())
    }

    async fn create_research(&self, project_id: Uuid) -> AppResult<Research> {
        let mut guard = self.inner.write().await;
        if !guard.projects.contains_key(&project_id) {
            return Err(AppError::NotFound("Project not found.".to_string()));
        }
        let research = Research::new_running(project_id);
        guard.researches.insert(research.id, research.clone());
        Ok(research)
    }

    async fn get_research(&self, id: Uuid) -> AppResult<Option<Research>> {
        let guard = self.inner.read().await;
        Ok(guard.researches.get(&id).cloned())
    }

    async fn list_researches(&self, project_id: Uuid) -> AppResult<Vec<Research>> {
        let guard = self.inner.read().await;
        let mut researches: Vec<Research> = guard
            .researches
            .values()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect();
        researches.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(researches)
    }

    async fn save_research_status(&self, research: &Research) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .researches
            .get_mut(&research.id)
            .ok_or_else(|| AppError::NotFound(format!("Research {} not found.", research.id)))?;
        stored.status = research.status;
        stored.execute_time = research.execute_time;
        Ok(())
    }

    async fn save_research_counters(&self, id: Uuid, counters: ResearchCounters) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        let stored = guard
            .researches
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Research {} not found.", id)))?;
        stored.initial_results_count = counters.initial_results_count;
        stored.relevant_results_count = counters.relevant_results_count;
        stored.opportunities_found_count = counters.opportunities_found_count;
        Ok(())
    }

    async fn save_item_contexts(&self, research_id: Uuid, contexts: Vec<NewItemContext>) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        guard.require_research(research_id)?;
        let created_at = Utc::now();
        for c in contexts {
            let existing = guard
                .item_contexts
                .iter()
                .position(|stored| stored.research_id == research_id && stored.url == c.url);
            match existing {
                Some(index) => {
                    let stored = &mut guard.item_contexts[index];
                    stored.title = c.title;
                    stored.content = c.content;
                    stored.is_relevant = c.is_relevant;
                }
                None => guard.item_contexts.push(ItemContext {
                    id: Uuid::new_v4(),
                    research_id,
                    title: c.title,
                    url: c.url,
                    content: c.content,
                    is_relevant: c.is_relevant,
                    created_at,
                }),
            }
        }
        Ok(())
    }

    async fn list_item_contexts(&self, research_id: Uuid) -> AppResult<Vec<ItemContext>> {
        let guard = self.inner.read().await;
        Ok(guard
            .item_contexts
            .iter()
            .filter(|c| c.research_id == research_id)
            .cloned()
            .collect())
    }

    async fn save_opportunities(&self, research_id: Uuid, opportunities: Vec<NewOpportunity>) -> AppResult<()> {
        let mut guard = self.inner.write().await;
        guard.require_research(research_id)?;
        let created_at = Utc::now();
        guard.opportunities.extend(opportunities.into_iter().map(|details| Opportunity {
            id: Uuid::new_v4(),
            research_id,
            details,
            created_at,
        }));
        Ok(())
    }

    async fn list_opportunities(&self, research_id: Uuid) -> AppResult<Vec<Opportunity>> {
        let guard = self.inner.read().await;
        Ok(guard
            .opportunities
            .iter()
            .filter(|o| o.research_id == research_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
