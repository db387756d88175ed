use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::LLMConfig;
use crate::types::{AppError, AppResult, LLMMessage, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Configuration for one LLM provider (renamed to avoid conflict with LLMProvider enum in types.rs)
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
}

/// A ready-to-call model: an adapter plus the model and sampling settings
/// it should be called with.
pub struct LLM {
    adapter: Box<dyn LLMAdapter>,
    provider_name: String,
    model: String,
    temperature: Option<f32>,
}

/// Shared handle passed to flow factories.
pub type LlmHandle = Arc<LLM>;

impl LLM {
    pub fn new(provider: LLMProviderConfig, model: impl Into<String>) -> AppResult<Self> {
        let kind = LLMProvider::from_id(&provider.name).ok_or_else(|| {
            AppError::Configuration(format!("Unsupported LLM provider '{}'", provider.name))
        })?;

        if provider.api_key.trim().is_empty() {
            return Err(AppError::Configuration(format!(
                "No API key configured for LLM provider '{}'",
                kind
            )));
        }

        let adapter: Box<dyn LLMAdapter> = match kind {
            LLMProvider::Google => Box::new(crate::llm::google::GoogleAdapter::new(&provider.api_key)),
            LLMProvider::OpenAI => Box::new(crate::llm::openai::OpenAIAdapter::new(&provider.api_key)),
            LLMProvider::OpenRouter => {
                Box::new(crate::llm::openrouter::OpenRouterAdapter::new(&provider.api_key))
            }
        };

        Ok(Self {
            adapter,
            provider_name: kind.to_string(),
            model: model.into(),
            temperature: None,
        })
    }

    /// Wrap an already-built adapter, e.g. a scripted one in tests.
    pub fn from_adapter(adapter: Box<dyn LLMAdapter>, model: impl Into<String>) -> Self {
        Self {
            adapter,
            provider_name: "custom".to_string(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }

    /// Send a single user prompt with this handle's model and temperature.
    pub async fn complete(&self, prompt: &str) -> AppResult<LLMResponse> {
        let request = LLMRequest {
            model: self.model.clone(),
            messages: vec![LLMMessage::user(prompt)],
            max_tokens: None,
            temperature: self.temperature,
            system_instruction: None,
        };
        debug!(provider = %self.provider_name, model = %self.model, prompt_len = prompt.len(), "LLM call");
        self.create_chat_completion(&request).await
    }
}

/// Builds LLM handles by logical role ("general", ...).
pub trait LlmFactory: Send + Sync {
    fn build(&self, role: &str) -> AppResult<LlmHandle>;
}

pub const ROLE_GENERAL: &str = "general";

/// Builds every role from the provider and model in [`LLMConfig`].
pub struct ConfiguredLlmFactory {
    config: LLMConfig,
}

impl ConfiguredLlmFactory {
    pub fn new(config: LLMConfig) -> Self {
        Self { config }
    }
}

impl LlmFactory for ConfiguredLlmFactory {
    fn build(&self, role: &str) -> AppResult<LlmHandle> {
        if role != ROLE_GENERAL {
            return Err(AppError::Configuration(format!("Unknown LLM role '{}'", role)));
        }

        let api_key = self
            .config
            .api_key_for(&self.config.provider)
            .unwrap_or_default()
            .to_string();

        let llm = LLM::new(
            LLMProviderConfig {
                name: self.config.provider.clone(),
                api_key,
            },
            self.config.model.clone(),
        )?
        .with_temperature(self.config.temperature);

        Ok(Arc::new(llm))
    }
}
