//! `discovery_opportunities_flow`
//!
//! Looks for funding opportunities (grants, calls, programmes) that match a
//! project, and records how the search narrowed down on the project's
//! research record.
//!
//! ```text
//! project_context ─▶ queries (LLM) ─▶ web search per query ─▶ relevance (LLM) ─▶ opportunities (LLM)
//!                                      initial_results_count   relevant_results_count   opportunities_found_count
//! ```
//!
//! Inputs: `title`, `description`, `keywords` (list or comma-separated
//! string). When the task runs under a project it also passes
//! `research_id`; counters, the search results looked at and the
//! opportunities found are only stored when it is present.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::ProjectStore;
use crate::flows::chain::{render_template, run_model_step, run_tool_step};
use crate::flows::observer::parse_tool_output;
use crate::flows::{FlowFactory, FlowInputs, FlowObserver, FlowOutput, Pipeline, Tool, WebSearchTool};
use crate::llm::LlmHandle;
use crate::models::{NewItemContext, NewOpportunity, ResearchCounters};
use crate::search::SerpApiClient;
use crate::types::{AppError, AppResult};

const FLOW_NAME: &str = "Opportunity Discovery Flow";
const QUERIES_STEP: &str = "Generating Search Queries";
const SEARCH_STEP: &str = "Searching the Web";
const RELEVANCE_STEP: &str = "Scrutinizing Relevance";
const EXTRACT_STEP: &str = "Extracting Opportunities";

/// Upper bound on generated queries, to keep search spend predictable.
const MAX_QUERIES: usize = 5;

const QUERIES_PROMPT: &str = "You help researchers find funding.\n\n\
Project:\n{project_context}\n\n\
Write up to {max_queries} web search queries that would surface open grants, \
calls for proposals or funding programmes for this project. \
Reply with a JSON array of strings and nothing else.";

const RELEVANCE_PROMPT: &str = "Project:\n{project_context}\n\n\
Search results (JSON):\n{results}\n\n\
Keep only the results that describe a funding opportunity this project could apply to. \
Reply with a JSON array of the `url` values you keep and nothing else.";

const EXTRACT_PROMPT: &str = "Project:\n{project_context}\n\n\
Relevant search results (JSON):\n{results}\n\n\
Extract every concrete funding opportunity from these results.\n{format_instructions}";

const FORMAT_INSTRUCTIONS: &str = "Reply with a JSON array and nothing else. Each element is an object \
with the keys \"title\", \"funder\", \"deadline\", \"amount\", \"url\" and \"summary\". \
Use null for anything the results do not state.";

pub struct DiscoveryFlowFactory {
    search: Option<SerpApiClient>,
    store: Arc<dyn ProjectStore>,
}

impl DiscoveryFlowFactory {
    pub fn new(search: Option<SerpApiClient>, store: Arc<dyn ProjectStore>) -> Self {
        Self { search, store }
    }
}

impl FlowFactory for DiscoveryFlowFactory {
    fn build(&self, llm: LlmHandle) -> AppResult<Box<dyn Pipeline>> {
        let client = self.search.clone().ok_or_else(|| {
            AppError::Configuration("SERPAPI_API_KEY is not configured".to_string())
        })?;
        Ok(Box::new(DiscoveryPipeline::new(
            llm,
            Arc::new(WebSearchTool::new(client)),
            self.store.clone(),
        )))
    }

    fn transform_inputs(&self, inputs: FlowInputs) -> AppResult<FlowInputs> {
        project_inputs(inputs)
    }
}

/// Fold `title`, `description` and `keywords` into `project_context` and
/// add `format_instructions`. Other fields pass through.
pub fn project_inputs(mut inputs: FlowInputs) -> AppResult<FlowInputs> {
    let title = inputs
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::PipelineExecution("Input 'title' is required".to_string()))?
        .to_string();
    let description = inputs
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let keywords = keyword_list(inputs.get("keywords"));

    let mut context = format!("Title: {}", title);
    if !description.is_empty() {
        context.push_str(&format!("\nDescription: {}", description));
    }
    if !keywords.is_empty() {
        context.push_str(&format!("\nKeywords: {}", keywords.join(", ")));
    }

    inputs.insert("project_context".to_string(), Value::String(context));
    inputs.insert(
        "format_instructions".to_string(),
        Value::String(FORMAT_INSTRUCTIONS.to_string()),
    );
    Ok(inputs)
}

fn keyword_list(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

pub struct DiscoveryPipeline {
    llm: LlmHandle,
    search: Arc<dyn Tool>,
    store: Arc<dyn ProjectStore>,
}

impl DiscoveryPipeline {
    pub fn new(llm: LlmHandle, search: Arc<dyn Tool>, store: Arc<dyn ProjectStore>) -> Self {
        Self { llm, search, store }
    }

    async fn generate_queries(&self, vars: &Value, observer: &dyn FlowObserver) -> AppResult<Vec<String>> {
        observer.on_step_start(Some(QUERIES_STEP)).await;
        let prompt = render_template(QUERIES_PROMPT, vars)?;
        let reply = run_model_step(Some(QUERIES_STEP), &self.llm, &prompt, observer).await?;

        let queries: Vec<String> = serde_json::from_value(extract_json(&reply)?).map_err(|e| {
            AppError::PipelineExecution(format!("Search queries are not a list of strings: {}", e))
        })?;

        let mut seen = HashSet::new();
        let queries: Vec<String> = queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty() && seen.insert(q.to_lowercase()))
            .take(MAX_QUERIES)
            .collect();

        if queries.is_empty() {
            return Err(AppError::PipelineExecution(
                "The model produced no search queries".to_string(),
            ));
        }
        Ok(queries)
    }

    /// Run every query, keeping results with a URL, first occurrence wins.
    async fn search(&self, queries: &[String], observer: &dyn FlowObserver) -> AppResult<Vec<Value>> {
        observer.on_step_start(Some(SEARCH_STEP)).await;

        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for query in queries {
            let raw = run_tool_step(Some(SEARCH_STEP), self.search.as_ref(), query, observer).await?;
            let Value::Array(items) = parse_tool_output(&raw) else {
                warn!(query = %query, "Search returned a non-list result, skipping");
                continue;
            };
            for item in items {
                let Some(url) = item.get("url").and_then(Value::as_str) else { continue };
                if seen.insert(url.to_string()) {
                    results.push(item);
                }
            }
        }
        Ok(results)
    }

    async fn scrutinize(
        &self,
        vars: &Value,
        results: &[Value],
        observer: &dyn FlowObserver,
    ) -> AppResult<Vec<Value>> {
        observer.on_step_start(Some(RELEVANCE_STEP)).await;
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = render_template(RELEVANCE_PROMPT, &with_results(vars, results)?)?;
        let reply = run_model_step(Some(RELEVANCE_STEP), &self.llm, &prompt, observer).await?;
        let kept: Vec<String> = serde_json::from_value(extract_json(&reply)?).map_err(|e| {
            AppError::PipelineExecution(format!("Relevant URLs are not a list of strings: {}", e))
        })?;
        let kept: HashSet<String> = kept.into_iter().collect();

        Ok(results
            .iter()
            .filter(|r| r.get("url").and_then(Value::as_str).is_some_and(|u| kept.contains(u)))
            .cloned()
            .collect())
    }

    async fn extract(
        &self,
        vars: &Value,
        relevant: &[Value],
        observer: &dyn FlowObserver,
    ) -> AppResult<Vec<NewOpportunity>> {
        observer.on_step_start(Some(EXTRACT_STEP)).await;
        if relevant.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = render_template(EXTRACT_PROMPT, &with_results(vars, relevant)?)?;
        let reply = run_model_step(Some(EXTRACT_STEP), &self.llm, &prompt, observer).await?;
        serde_json::from_value(extract_json(&reply)?)
            .map_err(|e| AppError::PipelineExecution(format!("Malformed opportunities list: {}", e)))
    }

    async fn save_counters(&self, research_id: Option<Uuid>, counters: ResearchCounters) -> AppResult<()> {
        match research_id {
            Some(id) => self.store.save_research_counters(id, counters).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Pipeline for DiscoveryPipeline {
    async fn invoke(&self, inputs: FlowInputs, observer: Arc<dyn FlowObserver>) -> AppResult<FlowOutput> {
        let observer = observer.as_ref();
        observer.on_step_start(Some(FLOW_NAME)).await;

        let research_id = research_id(&inputs)?;
        let mut vars = inputs;
        vars.insert("max_queries".to_string(), json!(MAX_QUERIES));
        let vars = Value::Object(vars);

        let queries = self.generate_queries(&vars, observer).await?;
        let results = self.search(&queries, observer).await?;
        let mut counters = ResearchCounters {
            initial_results_count: count(results.len()),
            ..Default::default()
        };
        self.save_counters(research_id, counters).await?;

        let relevant = self.scrutinize(&vars, &results, observer).await?;
        counters.relevant_results_count = count(relevant.len());
        self.save_counters(research_id, counters).await?;
        if let Some(id) = research_id {
            self.store.save_item_contexts(id, item_contexts(&results, &relevant)).await?;
        }

        let opportunities = self.extract(&vars, &relevant, observer).await?;
        counters.opportunities_found_count = count(opportunities.len());
        self.save_counters(research_id, counters).await?;
        if let Some(id) = research_id {
            self.store.save_opportunities(id, opportunities.clone()).await?;
        }

        info!(
            queries = queries.len(),
            initial = counters.initial_results_count,
            relevant = counters.relevant_results_count,
            opportunities = counters.opportunities_found_count,
            "Discovery finished"
        );

        Ok(FlowOutput::new(json!({
            "content": render_report(&opportunities),
            "queries": queries,
            "opportunities": opportunities,
        })))
    }
}

fn research_id(inputs: &FlowInputs) -> AppResult<Option<Uuid>> {
    match inputs.get("research_id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Uuid::parse_str(id)
            .map(Some)
            .map_err(|e| AppError::PipelineExecution(format!("Invalid research_id '{}': {}", id, e))),
        Some(other) => Err(AppError::PipelineExecution(format!("Invalid research_id {}", other))),
    }
}

/// Every search result, flagged with whether scrutiny kept it.
fn item_contexts(results: &[Value], relevant: &[Value]) -> Vec<NewItemContext> {
    let kept: HashSet<&str> = relevant
        .iter()
        .filter_map(|r| r.get("url").and_then(Value::as_str))
        .collect();
    let field = |item: &Value, key: &str| item.get(key).and_then(Value::as_str).unwrap_or_default().to_string();

    results
        .iter()
        .filter_map(|item| {
            let url = item.get("url").and_then(Value::as_str)?;
            Some(NewItemContext {
                title: field(item, "title"),
                url: url.to_string(),
                content: field(item, "content"),
                is_relevant: kept.contains(url),
            })
        })
        .collect()
}

fn with_results(vars: &Value, results: &[Value]) -> AppResult<Value> {
    let mut vars = vars.clone();
    if let Value::Object(object) = &mut vars {
        object.insert("results".to_string(), Value::String(serde_json::to_string_pretty(results)?));
    }
    Ok(vars)
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Pull the JSON value out of a model reply, tolerating markdown code fences
/// and prose around it.
pub fn extract_json(reply: &str) -> AppResult<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    let start = unfenced.find(['[', '{']);
    let end = unfenced.rfind([']', '}']);
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&unfenced[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(AppError::PipelineExecution(format!(
        "Model reply is not valid JSON: {}",
        truncate(trimmed, 200)
    )))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else { return text };
    // Drop the language tag line, e.g. ```json
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn render_report(opportunities: &[NewOpportunity]) -> String {
    if opportunities.is_empty() {
        return "No funding opportunities found for this project.".to_string();
    }

    let mut report = format!("Found {} funding opportunities:\n", opportunities.len());
    for (i, opp) in opportunities.iter().enumerate() {
        report.push_str(&format!("\n{}. {}", i + 1, opp.title));
        if let Some(funder) = &opp.funder {
            report.push_str(&format!(" ({})", funder));
        }
        if let Some(deadline) = &opp.deadline {
            report.push_str(&format!("\n   Deadline: {}", deadline));
        }
        if let Some(amount) = &opp.amount {
            report.push_str(&format!("\n   Amount: {}", amount));
        }
        if let Some(url) = &opp.url {
            report.push_str(&format!("\n   {}", url));
        }
        if let Some(summary) = &opp.summary {
            report.push_str(&format!("\n   {}", summary));
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::flows::testing::{scripted_llm, FailingTool, RecordingObserver, StaticTool};
    use crate::models::NewProject;

    const SEARCH_OUTPUT: &str = r#"[
        {"title": "Ocean Grant", "url": "https://grants.example/ocean", "content": "Open call"},
        {"title": "Blog post", "url": "https://blog.example/post", "content": "Opinion"},
        {"title": "Coastal Fund", "url": "https://fund.example/coast", "content": "Deadline May"}
    ]"#;

    fn project_fields() -> FlowInputs {
        let mut inputs = FlowInputs::new();
        inputs.insert("title".to_string(), json!("Reef monitoring"));
        inputs.insert("description".to_string(), json!("Low-cost sensors for coral reefs"));
        inputs.insert("keywords".to_string(), json!(["ocean", " sensors ", ""]));
        inputs
    }

    fn scripted_replies() -> Vec<&'static str> {
        vec![
            "```json\n[\"reef monitoring grant\", \"ocean sensors funding\"]\n```",
            r#"["https://grants.example/ocean", "https://fund.example/coast"]"#,
            r#"Here you go: [{"title": "Ocean Grant", "funder": "Sea Trust", "deadline": "2026-12-01", "url": "https://grants.example/ocean"}]"#,
        ]
    }

    #[test]
    fn test_project_inputs() {
        let inputs = project_inputs(project_fields()).unwrap();
        assert_eq!(
            inputs["project_context"],
            "Title: Reef monitoring\nDescription: Low-cost sensors for coral reefs\nKeywords: ocean, sensors"
        );
        assert!(inputs["format_instructions"].as_str().unwrap().contains("JSON array"));
        assert_eq!(inputs["title"], "Reef monitoring");
    }

    #[test]
    fn test_project_inputs_requires_title() {
        let err = project_inputs(FlowInputs::new()).unwrap_err();
        assert_eq!(err.kind(), "PipelineExecutionError");
    }

    #[test]
    fn test_keyword_string_is_split() {
        assert_eq!(keyword_list(Some(&json!("a, b,,c"))), vec!["a", "b", "c"]);
        assert!(keyword_list(Some(&json!(3))).is_empty());
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```").unwrap(), json!({"a": 1}));
        assert_eq!(extract_json("```\n[\"q\"]\n```").unwrap(), json!(["q"]));
        assert_eq!(extract_json("Sure! [\"x\"] Hope it helps.").unwrap(), json!(["x"]));
        assert_eq!(extract_json("nothing here").unwrap_err().kind(), "PipelineExecutionError");
    }

    #[tokio::test]
    async fn test_discovery_writes_counters() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                title: "Reef monitoring".to_string(),
                description: String::new(),
                keywords: vec![],
            })
            .await
            .unwrap();
        let research = store.create_research(project.id).await.unwrap();

        let tool = Arc::new(StaticTool::new("web_search", SEARCH_OUTPUT));
        let pipeline = DiscoveryPipeline::new(scripted_llm(&scripted_replies()), tool.clone(), store.clone());

        let mut inputs = project_inputs(project_fields()).unwrap();
        inputs.insert("research_id".to_string(), json!(research.id.to_string()));

        let observer = Arc::new(RecordingObserver::default());
        let output = pipeline.invoke(inputs, observer.clone()).await.unwrap();

        assert_eq!(tool.calls(), vec!["reef monitoring grant", "ocean sensors funding"]);
        let stored = store.get_research(research.id).await.unwrap().unwrap();
        // Both queries return the same three URLs; duplicates are dropped.
        assert_eq!(stored.initial_results_count, 3);
        assert_eq!(stored.relevant_results_count, 2);
        assert_eq!(stored.opportunities_found_count, 1);
        assert_eq!(stored.status, crate::models::ResearchStatus::Running);

        let contexts = store.list_item_contexts(research.id).await.unwrap();
        let flags: Vec<(&str, bool)> = contexts.iter().map(|c| (c.url.as_str(), c.is_relevant)).collect();
        assert_eq!(
            flags,
            vec![
                ("https://grants.example/ocean", true),
                ("https://blog.example/post", false),
                ("https://fund.example/coast", true),
            ]
        );
        assert_eq!(contexts[0].content, "Open call");

        let opportunities = store.list_opportunities(research.id).await.unwrap();
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].details.title, "Ocean Grant");
        assert_eq!(opportunities[0].details.funder.as_deref(), Some("Sea Trust"));
        assert_eq!(opportunities[0].details.deadline.as_deref(), Some("2026-12-01"));

        let text = output.final_text();
        assert!(text.starts_with("Found 1 funding opportunities:"));
        assert!(text.contains("Ocean Grant (Sea Trust)"));

        let events = observer.events();
        assert_eq!(events[0], format!("step:{}", FLOW_NAME));
        assert_eq!(
            events.iter().filter(|e| e.starts_with("tool:")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_discovery_without_research_id() {
        let store = Arc::new(MemoryStore::new());
        let tool = Arc::new(StaticTool::new("web_search", "[]"));
        let pipeline = DiscoveryPipeline::new(scripted_llm(&[r#"["q1"]"#]), tool, store);

        let output = pipeline
            .invoke(project_inputs(project_fields()).unwrap(), Arc::new(RecordingObserver::default()))
            .await
            .unwrap();
        assert_eq!(output.final_text(), "No funding opportunities found for this project.");
    }

    #[tokio::test]
    async fn test_search_failure_keeps_partial_counters() {
        let store = Arc::new(MemoryStore::new());
        let project = store
            .create_project(NewProject {
                title: "t".to_string(),
                description: String::new(),
                keywords: vec![],
            })
            .await
            .unwrap();
        let research = store.create_research(project.id).await.unwrap();

        let pipeline = DiscoveryPipeline::new(scripted_llm(&[r#"["q1"]"#]), Arc::new(FailingTool), store.clone());
        let mut inputs = project_inputs(project_fields()).unwrap();
        inputs.insert("research_id".to_string(), json!(research.id.to_string()));

        let err = pipeline
            .invoke(inputs, Arc::new(RecordingObserver::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PipelineExecutionError");

        let stored = store.get_research(research.id).await.unwrap().unwrap();
        assert_eq!(stored.initial_results_count, 0);
        assert!(store.list_item_contexts(research.id).await.unwrap().is_empty());
        assert!(store.list_opportunities(research.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_research_id() {
        let pipeline = DiscoveryPipeline::new(
            scripted_llm(&[]),
            Arc::new(StaticTool::new("web_search", "[]")),
            Arc::new(MemoryStore::new()),
        );
        let mut inputs = project_inputs(project_fields()).unwrap();
        inputs.insert("research_id".to_string(), json!("not-a-uuid"));

        let err = pipeline
            .invoke(inputs, Arc::new(RecordingObserver::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("research_id"));
    }
}
