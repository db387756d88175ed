//! Sequential step runtime for flows.
//!
//! A [`Chain`] feeds a JSON value through its steps in order. Named steps are
//! reported to the observer; unnamed ones run silently.
//!
//! ```text
//! input ─▶ Prompt ─▶ Model ─▶ Map ─▶ Prompt ─▶ Model ─▶ output
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use crate::flows::observer::{parse_tool_output, FlowObserver};
use crate::flows::{FlowInputs, FlowOutput, Pipeline, Tool};
use crate::llm::LlmHandle;
use crate::types::{AppError, AppResult};

type MapFn = Arc<dyn Fn(Value) -> AppResult<Value> + Send + Sync>;

pub enum StepKind {
    /// Render a template, substituting `{key}` with fields of the input object.
    Prompt(String),
    /// Send the input text to a model; yields `{"content": <reply>}`.
    Model(LlmHandle),
    /// Run a tool on the input text; yields its output, parsed when it is JSON.
    Tool(Arc<dyn Tool>),
    /// Pure transformation of the value.
    Map(MapFn),
    /// Run a sub-chain on the input and store its output under `key`,
    /// passing every other field through.
    Assign { key: String, chain: Chain },
}

pub struct Step {
    name: Option<String>,
    kind: StepKind,
}

impl Step {
    pub fn prompt(template: impl Into<String>) -> Self {
        Self { name: None, kind: StepKind::Prompt(template.into()) }
    }

    pub fn model(llm: LlmHandle) -> Self {
        Self { name: None, kind: StepKind::Model(llm) }
    }

    pub fn tool(tool: Arc<dyn Tool>) -> Self {
        Self { name: None, kind: StepKind::Tool(tool) }
    }

    pub fn map<F>(f: F) -> Self
    where
        F: Fn(Value) -> AppResult<Value> + Send + Sync + 'static,
    {
        Self { name: None, kind: StepKind::Map(Arc::new(f)) }
    }

    pub fn assign(key: impl Into<String>, chain: Chain) -> Self {
        Self { name: None, kind: StepKind::Assign { key: key.into(), chain } }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Default)]
pub struct Chain {
    name: Option<String>,
    steps: Vec<Step>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    fn run_boxed<'a>(&'a self, input: Value, observer: &'a dyn FlowObserver) -> BoxFuture<'a, AppResult<Value>> {
        Box::pin(self.run(input, observer))
    }

    pub async fn run(&self, input: Value, observer: &dyn FlowObserver) -> AppResult<Value> {
        observer.on_step_start(self.name.as_deref()).await;

        let mut value = input;
        for step in &self.steps {
            observer.on_step_start(step.name()).await;
            value = match &step.kind {
                StepKind::Prompt(template) => Value::String(render_template(template, &value)?),
                StepKind::Model(llm) => {
                    let content = run_model_step(step.name(), llm, &text_of(&value), observer).await?;
                    json!({ "content": content })
                }
                StepKind::Tool(tool) => {
                    let raw = run_tool_step(step.name(), tool.as_ref(), &text_of(&value), observer).await?;
                    parse_tool_output(&raw)
                }
                StepKind::Map(f) => f(value)?,
                StepKind::Assign { key, chain } => {
                    let assigned = chain.run_boxed(value.clone(), observer).await?;
                    let mut object = into_object(value)?;
                    object.insert(key.clone(), assigned);
                    Value::Object(object)
                }
            };
        }
        Ok(value)
    }
}

#[async_trait]
impl Pipeline for Chain {
    async fn invoke(&self, inputs: FlowInputs, observer: Arc<dyn FlowObserver>) -> AppResult<FlowOutput> {
        let output = self.run(Value::Object(inputs), observer.as_ref()).await?;
        Ok(FlowOutput::new(output))
    }
}

/// Call `llm` with `prompt`, announcing the call first. Returns the reply text.
pub async fn run_model_step(
    step_name: Option<&str>,
    llm: &LlmHandle,
    prompt: &str,
    observer: &dyn FlowObserver,
) -> AppResult<String> {
    observer.on_model_call_start(step_name).await;
    let response = llm.complete(prompt).await?;
    Ok(response.content)
}

/// Run `tool` on `input` and report its raw output. Unnamed steps are
/// reported under the tool's id.
pub async fn run_tool_step(
    step_name: Option<&str>,
    tool: &dyn Tool,
    input: &str,
    observer: &dyn FlowObserver,
) -> AppResult<String> {
    let raw = tool.run(input).await?;
    observer
        .on_tool_result(step_name.unwrap_or(tool.id()), tool.id(), &raw)
        .await;
    Ok(raw)
}

/// Text form of a step value: strings as-is, `content` of model replies,
/// JSON for anything else.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(object) => match object.get("content") {
            Some(Value::String(content)) => content.clone(),
            _ => value.to_string(),
        },
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn into_object(value: Value) -> AppResult<Map<String, Value>> {
    match value {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(AppError::PipelineExecution(format!(
            "Expected an object input, got {}",
            other
        ))),
    }
}

/// Substitute `{key}` placeholders from `vars`. `{{` and `}}` are literal braces.
pub fn render_template(template: &str, vars: &Value) -> AppResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for k in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(AppError::PipelineExecution(format!(
                        "Unclosed placeholder in prompt template: {{{}",
                        key
                    )));
                }
                let value = vars.get(key.trim()).ok_or_else(|| {
                    AppError::PipelineExecution(format!("Missing prompt variable '{}'", key.trim()))
                })?;
                out.push_str(&text_of(value));
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::testing::{RecordingObserver, ScriptedAdapter, StaticTool};
    use crate::llm::LLM;

    fn llm(replies: &[&str]) -> LlmHandle {
        Arc::new(LLM::from_adapter(Box::new(ScriptedAdapter::new(replies)), "test-model"))
    }

    #[test]
    fn test_render_template() {
        let vars = json!({"theme": "tides", "n": 3, "reply": {"content": "hi"}});
        assert_eq!(
            render_template("Write {n} lines about {theme}.", &vars).unwrap(),
            "Write 3 lines about tides."
        );
        assert_eq!(render_template("{reply}", &vars).unwrap(), "hi");
        assert_eq!(render_template("{{\"a\": 1}}", &vars).unwrap(), "{\"a\": 1}");
        assert_eq!(render_template("No vars.", &Value::Null).unwrap(), "No vars.");
    }

    #[test]
    fn test_render_template_missing_variable() {
        let err = render_template("About {topic}", &json!({})).unwrap_err();
        assert_eq!(err.kind(), "PipelineExecutionError");
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn test_text_of() {
        assert_eq!(text_of(&json!("plain")), "plain");
        assert_eq!(text_of(&json!({"content": "reply"})), "reply");
        assert_eq!(text_of(&json!({"other": 1})), r#"{"other":1}"#);
        assert_eq!(text_of(&json!([1, 2])), "[1,2]");
    }

    #[tokio::test]
    async fn test_chain_runs_steps_in_order() {
        let chain = Chain::new()
            .named("Flow")
            .then(Step::prompt("Theme please").named("Prompt"))
            .then(Step::model(llm(&["the sea"])).named("Model"))
            .then(Step::map(|v| Ok(json!({ "theme": text_of(&v) }))))
            .then(Step::prompt("Poem about {theme}").named("Second prompt"));

        let observer = RecordingObserver::default();
        let output = chain.run(json!({}), &observer).await.unwrap();

        assert_eq!(output, json!("Poem about the sea"));
        assert_eq!(
            observer.events(),
            vec![
                "step:Flow",
                "step:Prompt",
                "step:Model",
                "model:Model",
                "step:Second prompt",
            ]
        );
    }

    #[tokio::test]
    async fn test_assign_keeps_input_fields() {
        let tool: Arc<dyn Tool> = Arc::new(StaticTool::new("web_search", r#"[{"title": "Fund"}]"#));
        let chain = Chain::new().then(Step::assign(
            "context",
            Chain::new()
                .then(Step::map(|v| Ok(v["question"].clone())).named("Extract"))
                .then(Step::tool(tool)),
        ));

        let observer = RecordingObserver::default();
        let output = chain.run(json!({"question": "grants?"}), &observer).await.unwrap();

        assert_eq!(output["question"], "grants?");
        assert_eq!(output["context"], json!([{"title": "Fund"}]));
        assert_eq!(observer.events(), vec!["step:Extract", "tool:web_search:web_search"]);
    }

    #[tokio::test]
    async fn test_model_error_stops_chain() {
        let chain = Chain::new()
            .then(Step::model(llm(&[])).named("Model"))
            .then(Step::prompt("never").named("After"));

        let observer = RecordingObserver::default();
        let err = chain.run(json!("hi"), &observer).await.unwrap_err();

        assert_eq!(err.kind(), "LLMApiError");
        assert!(!observer.events().contains(&"step:After".to_string()));
    }
}
