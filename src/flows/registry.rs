//! Flow registry: flow name → pipeline factory.

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::ProjectStore;
use crate::flows::{discovery, poem, web_search, FlowInputs, Pipeline};
use crate::llm::LlmHandle;
use crate::search::SerpApiClient;
use crate::types::{AppError, AppResult};

pub const POEM_FLOW: &str = "poem_flow";
pub const WEB_SEARCH_FLOW: &str = "web_search_flow";
pub const DISCOVERY_FLOW: &str = "discovery_opportunities_flow";

/// Builds a flow's pipeline around an LLM handle.
pub trait FlowFactory: Send + Sync {
    fn build(&self, llm: LlmHandle) -> AppResult<Box<dyn Pipeline>>;

    /// Reshape caller inputs before the pipeline sees them.
    fn transform_inputs(&self, inputs: FlowInputs) -> AppResult<FlowInputs> {
        Ok(inputs)
    }
}

impl<F> FlowFactory for F
where
    F: Fn(LlmHandle) -> AppResult<Box<dyn Pipeline>> + Send + Sync,
{
    fn build(&self, llm: LlmHandle) -> AppResult<Box<dyn Pipeline>> {
        self(llm)
    }
}

#[derive(Default, Clone)]
pub struct FlowRegistry {
    factories: HashMap<String, Arc<dyn FlowFactory>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: impl FlowFactory + 'static) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn resolve(&self, name: &str) -> AppResult<Arc<dyn FlowFactory>> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::UnknownFlow(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

/// The built-in flows. Search-backed flows fail at build time with a
/// configuration error when `search` is `None`.
pub fn default_registry(search: Option<SerpApiClient>, store: Arc<dyn ProjectStore>) -> FlowRegistry {
    let mut registry = FlowRegistry::new();
    registry
        .register(POEM_FLOW, poem::create_poem_flow)
        .register(WEB_SEARCH_FLOW, web_search::WebSearchFlowFactory::new(search.clone()))
        .register(DISCOVERY_FLOW, discovery::DiscoveryFlowFactory::new(search, store));
    registry
}
