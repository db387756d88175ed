//! `web_search_flow`: answers `question` from web search results.

use std::sync::Arc;

use serde_json::Value;

use crate::flows::chain::{Chain, Step};
use crate::flows::{FlowFactory, Pipeline, Tool, WebSearchTool};
use crate::llm::LlmHandle;
use crate::search::SerpApiClient;
use crate::types::{AppError, AppResult};

const ANSWER_PROMPT: &str = "Based on these search results:\n\n---\n{context}\n---\n\n\
Please answer the following question: {question}";

pub fn create_web_search_flow(llm: LlmHandle, search: Arc<dyn Tool>) -> Chain {
    Chain::new()
        .named("Web Search and Summary Flow")
        .then(
            Step::assign(
                "context",
                Chain::new()
                    .then(Step::map(extract_question).named("Extracting Question"))
                    .then(Step::tool(search)),
            )
            .named("Search and Context Assignment"),
        )
        .then(Step::prompt(ANSWER_PROMPT).named("Building Final Prompt with Context"))
        .then(Step::model(llm).named("LLM Answering the Question"))
}

fn extract_question(inputs: Value) -> AppResult<Value> {
    match inputs.get("question") {
        Some(Value::String(q)) if !q.trim().is_empty() => Ok(Value::String(q.clone())),
        _ => Err(AppError::PipelineExecution(
            "Input 'question' is required".to_string(),
        )),
    }
}

pub struct WebSearchFlowFactory {
    search: Option<SerpApiClient>,
}

impl WebSearchFlowFactory {
    pub fn new(search: Option<SerpApiClient>) -> Self {
        Self { search }
    }
}

impl FlowFactory for WebSearchFlowFactory {
    fn build(&self, llm: LlmHandle) -> AppResult<Box<dyn Pipeline>> {
        let client = self.search.clone().ok_or_else(|| {
            AppError::Configuration("SERPAPI_API_KEY is not configured".to_string())
        })?;
        let tool: Arc<dyn Tool> = Arc::new(WebSearchTool::new(client));
        Ok(Box::new(create_web_search_flow(llm, tool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::testing::{scripted_llm, FailingTool, RecordingObserver, StaticTool};
    use crate::flows::FlowInputs;
    use serde_json::json;

    fn inputs(question: &str) -> FlowInputs {
        let mut inputs = FlowInputs::new();
        inputs.insert("question".to_string(), json!(question));
        inputs
    }

    #[tokio::test]
    async fn test_answers_from_search_context() {
        let tool = Arc::new(StaticTool::new("web_search", r#"[{"title": "EU Horizon call"}]"#));
        let chain = create_web_search_flow(scripted_llm(&["Horizon Europe is open."]), tool.clone());

        let observer = Arc::new(RecordingObserver::default());
        let output = chain.invoke(inputs("Which calls are open?"), observer.clone()).await.unwrap();

        assert_eq!(output.final_text(), "Horizon Europe is open.");
        assert_eq!(tool.calls(), vec!["Which calls are open?"]);
        assert!(observer
            .events()
            .contains(&"tool:web_search:web_search".to_string()));
    }

    #[tokio::test]
    async fn test_missing_question() {
        let tool = Arc::new(StaticTool::new("web_search", "[]"));
        let chain = create_web_search_flow(scripted_llm(&["unused"]), tool);

        let err = chain
            .invoke(FlowInputs::new(), Arc::new(RecordingObserver::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PipelineExecutionError");
    }

    #[tokio::test]
    async fn test_search_failure_propagates() {
        let chain = create_web_search_flow(scripted_llm(&["unused"]), Arc::new(FailingTool));
        let err = chain
            .invoke(inputs("grants?"), Arc::new(RecordingObserver::default()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("search backend unavailable"));
    }
}
