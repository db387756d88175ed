//! Test doubles for flows and the flow task.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::flows::{FlowObserver, Tool};
use crate::llm::{LLMAdapter, LlmHandle, LLM};
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};

/// Records named events as `step:<name>`, `model:<name>` and
/// `tool:<step>:<tool>`.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl FlowObserver for RecordingObserver {
    async fn on_step_start(&self, step_name: Option<&str>) {
        if let Some(name) = step_name {
            self.push(format!("step:{}", name));
        }
    }

    async fn on_model_call_start(&self, step_name: Option<&str>) {
        if let Some(name) = step_name {
            self.push(format!("model:{}", name));
        }
    }

    async fn on_tool_result(&self, step_name: &str, tool: &str, _raw_output: &str) {
        self.push(format!("tool:{}:{}", step_name, tool));
    }
}

/// Replies with canned answers in order; fails once they run out.
pub struct ScriptedAdapter {
    replies: Mutex<VecDeque<String>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedAdapter {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared view of every prompt the adapter received.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        self.prompts.clone()
    }
}

#[async_trait]
impl LLMAdapter for ScriptedAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AppError::LLMApi("scripted replies exhausted".to_string()))?;

        Ok(LLMResponse {
            content: reply,
            finish_reason: "stop".to_string(),
            usage: TokenUsage::default(),
        })
    }
}

pub fn scripted_llm(replies: &[&str]) -> LlmHandle {
    Arc::new(LLM::from_adapter(Box::new(ScriptedAdapter::new(replies)), "test-model"))
}

/// Tool returning the same output for any input.
pub struct StaticTool {
    id: String,
    output: String,
    calls: Mutex<Vec<String>>,
}

impl StaticTool {
    pub fn new(id: &str, output: &str) -> Self {
        Self {
            id: id.to_string(),
            output: output.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, input: &str) -> AppResult<String> {
        self.calls.lock().unwrap().push(input.to_string());
        Ok(self.output.clone())
    }
}

/// Tool that always fails.
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn id(&self) -> &str {
        "failing_tool"
    }

    async fn run(&self, _input: &str) -> AppResult<String> {
        Err(AppError::PipelineExecution("search backend unavailable".to_string()))
    }
}
