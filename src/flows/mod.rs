//! Flows
//!
//! A flow is a named pipeline of model and tool steps. The registry maps
//! flow names to factories; the generic flow task resolves a name, builds
//! the pipeline with an LLM handle and invokes it with a progress observer.
//!
//! Built-in flows:
//!
//! - `poem_flow`: suggests a theme, then writes a poem about it
//! - `web_search_flow`: answers `question` from web search results
//! - `discovery_opportunities_flow`: searches for funding opportunities
//!   matching a project and records research metrics

pub mod chain;
pub mod discovery;
pub mod observer;
pub mod poem;
pub mod registry;
pub mod web_search;

#[cfg(test)]
pub(crate) mod testing;

pub use chain::{Chain, Step};
pub use observer::{FlowObserver, ProgressObserver};
pub use registry::{default_registry, FlowFactory, FlowRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::search::SerpApiClient;
use crate::types::{AppError, AppResult};

/// Caller-supplied inputs; the shape is up to each flow.
pub type FlowInputs = serde_json::Map<String, Value>;

/// Whatever a pipeline produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutput(Value);

impl FlowOutput {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The output as text: its `content` field when it has one, otherwise
    /// its string form.
    pub fn final_text(&self) -> String {
        chain::text_of(&self.0)
    }
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn invoke(&self, inputs: FlowInputs, observer: Arc<dyn FlowObserver>) -> AppResult<FlowOutput>;
}

/// An external capability a step can call with text input.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;

    /// Raw tool output; may or may not be JSON.
    async fn run(&self, input: &str) -> AppResult<String>;
}

pub const WEB_SEARCH_TOOL: &str = "web_search_results_json";

/// Web search as a tool: JSON array of `{title, url, content}`.
pub struct WebSearchTool {
    client: SerpApiClient,
}

impl WebSearchTool {
    pub fn new(client: SerpApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn id(&self) -> &str {
        WEB_SEARCH_TOOL
    }

    async fn run(&self, input: &str) -> AppResult<String> {
        let results = self
            .client
            .search(input)
            .await
            .map_err(|e| AppError::PipelineExecution(e.to_string()))?;

        let items: Vec<Value> = results
            .into_iter()
            .map(|r| serde_json::json!({ "title": r.title, "url": r.link, "content": r.snippet }))
            .collect();
        Ok(serde_json::to_string(&items)?)
    }
}
