use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Config;
use crate::db::ProjectStore;
use crate::queue::TaskQueue;
use crate::status::StatusStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ProjectStore>,
    pub status: Arc<dyn StatusStore>,
    pub queue: TaskQueue,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResearchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "PENDING",
            ResearchStatus::Running => "RUNNING",
            ResearchStatus::Completed => "COMPLETED",
            ResearchStatus::Failed => "FAILED",
        }
    }

    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(ResearchStatus::Pending),
            "RUNNING" => Some(ResearchStatus::Running),
            "COMPLETED" => Some(ResearchStatus::Completed),
            "FAILED" => Some(ResearchStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Failed)
    }
}

impl std::fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One execution of a flow against a project.
///
/// The three counters belong to the pipeline that runs under this record;
/// the flow task only ever writes `status` and `execute_time`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Research {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Wall-clock seconds, set only on successful completion.
    pub execute_time: Option<f64>,
    pub date: DateTime<Utc>,
    pub status: ResearchStatus,
    pub initial_results_count: u32,
    pub relevant_results_count: u32,
    pub opportunities_found_count: u32,
}

impl Research {
    pub fn new_running(project_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            execute_time: None,
            date: Utc::now(),
            status: ResearchStatus::Running,
            initial_results_count: 0,
            relevant_results_count: 0,
            opportunities_found_count: 0,
        }
    }

    /// Relevant results as a percentage of initial results.
    pub fn relevance_ratio(&self) -> f64 {
        percentage(self.relevant_results_count, self.initial_results_count)
    }

    /// Opportunities found as a percentage of relevant results.
    pub fn opportunity_ratio(&self) -> f64 {
        percentage(self.opportunities_found_count, self.relevant_results_count)
    }
}

fn percentage(numerator: u32, denominator: u32) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    (numerator as f64 / denominator as f64) * 100.0
}

/// Counter values a pipeline reports for its research record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResearchCounters {
    pub initial_results_count: u32,
    pub relevant_results_count: u32,
    pub opportunities_found_count: u32,
}

/// Research record as served over HTTP, with the derived ratios.
#[derive(Debug, serde::Serialize)]
pub struct ResearchView {
    #[serde(flatten)]
    pub research: Research,
    pub relevance_ratio: f64,
    pub opportunity_ratio: f64,
}

impl From<Research> for ResearchView {
    fn from(research: Research) -> Self {
        Self {
            relevance_ratio: research.relevance_ratio(),
            opportunity_ratio: research.opportunity_ratio(),
            research,
        }
    }
}

/// A search result a research run looked at, and whether it was kept.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ItemContext {
    pub id: Uuid,
    pub research_id: Uuid,
    pub title: String,
    pub url: String,
    pub content: String,
    pub is_relevant: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewItemContext {
    pub title: String,
    pub url: String,
    pub content: String,
    pub is_relevant: bool,
}

/// One funding opportunity as extracted by the model.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NewOpportunity {
    pub title: String,
    #[serde(default)]
    pub funder: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// A stored funding opportunity, owned by the research that found it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub research_id: Uuid,
    #[serde(flatten)]
    pub details: NewOpportunity,
    pub created_at: DateTime<Utc>,
}

/// A research record with everything it found.
#[derive(Debug, serde::Serialize)]
pub struct ResearchDetail {
    #[serde(flatten)]
    pub research: ResearchView,
    pub contexts: Vec<ItemContext>,
    pub opportunities: Vec<Opportunity>,
}

// API Request/Response types

#[derive(Debug, serde::Deserialize)]
pub struct StartTaskRequest {
    pub flow: Option<String>,
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub project_id: Option<Uuid>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct StartTaskResponse {
    pub task_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub database: String,
    pub status_store: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn research_with(initial: u32, relevant: u32, opportunities: u32) -> Research {
        let mut research = Research::new_running(Uuid::new_v4());
        research.initial_results_count = initial;
        research.relevant_results_count = relevant;
        research.opportunities_found_count = opportunities;
        research
    }

    #[test]
    fn test_ratios_are_zero_for_zero_denominators() {
        let research = research_with(0, 0, 0);
        assert_eq!(research.relevance_ratio(), 0.0);
        assert_eq!(research.opportunity_ratio(), 0.0);

        // Numerators alone never make a ratio non-zero.
        let research = research_with(0, 5, 3);
        assert_eq!(research.relevance_ratio(), 0.0);
        assert_eq!(research.opportunity_ratio(), 60.0);
    }

    #[test]
    fn test_ratios_follow_counters() {
        let research = research_with(20, 5, 2);
        assert_eq!(research.relevance_ratio(), 25.0);
        assert_eq!(research.opportunity_ratio(), 40.0);

        let research = research_with(3, 1, 0);
        assert!((research.relevance_ratio() - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(research.opportunity_ratio(), 0.0);
    }

    #[test]
    fn test_ratio_grid() {
        for initial in 0..6u32 {
            for relevant in 0..6u32 {
                let research = research_with(initial, relevant, relevant / 2);
                if initial == 0 {
                    assert_eq!(research.relevance_ratio(), 0.0);
                } else {
                    let expected = relevant as f64 / initial as f64 * 100.0;
                    assert_eq!(research.relevance_ratio(), expected);
                }
                if relevant == 0 {
                    assert_eq!(research.opportunity_ratio(), 0.0);
                }
            }
        }
    }

    #[test]
    fn test_new_research_is_running() {
        let project_id = Uuid::new_v4();
        let research = Research::new_running(project_id);
        assert_eq!(research.project_id, project_id);
        assert_eq!(research.status, ResearchStatus::Running);
        assert!(research.execute_time.is_none());
        assert!(!research.status.is_terminal());
    }

    #[test]
    fn test_status_db_names() {
        for status in [
            ResearchStatus::Pending,
            ResearchStatus::Running,
            ResearchStatus::Completed,
            ResearchStatus::Failed,
        ] {
            assert_eq!(ResearchStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(ResearchStatus::from_db("DONE"), None);
    }

    #[test]
    fn test_research_view_serializes_ratios() {
        let view = ResearchView::from(research_with(10, 4, 1));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["relevance_ratio"], 40.0);
        assert_eq!(json["opportunity_ratio"], 25.0);
        assert_eq!(json["status"], "RUNNING");
        assert_eq!(json["initial_results_count"], 10);
    }

    #[test]
    fn test_opportunity_serializes_flat() {
        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            research_id: Uuid::new_v4(),
            details: NewOpportunity {
                title: "Ocean Grant".to_string(),
                funder: Some("Sea Trust".to_string()),
                deadline: None,
                amount: None,
                url: None,
                summary: None,
            },
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&opportunity).unwrap();
        assert_eq!(json["title"], "Ocean Grant");
        assert_eq!(json["funder"], "Sea Trust");
        assert!(json["deadline"].is_null());
        assert!(json.get("details").is_none());
    }
}
