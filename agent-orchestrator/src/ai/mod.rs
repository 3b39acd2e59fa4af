pub mod credentials;
pub mod gemini;
pub mod models;
pub mod openai;
pub mod types;

pub use gemini::GeminiClient;
pub use models::{Backend, ModelTable};
pub use openai::OpenAIClient;
pub use types::{GenerateRequest, GenerateResponse, ToolCall, ToolDeclaration, Turn};

use crate::config::Config;
use crate::error::Result;
use async_trait::async_trait;

/// One call shape over every language-model backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse>;

    /// Reject model ids that cannot be served, before any network call
    fn validate_model(&self, _model: &str) -> Result<()> {
        Ok(())
    }
}

/// Dispatches requests to the backend selected by the model table
pub struct ProviderAdapter {
    models: ModelTable,
    gemini: GeminiClient,
    openai: OpenAIClient,
}

impl ProviderAdapter {
    pub fn new(models: ModelTable, gemini: GeminiClient, openai: OpenAIClient) -> Self {
        Self { models, gemini, openai }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            ModelTable::new(config.model_backends.clone()),
            GeminiClient::new(
                &config.gemini_endpoint,
                &config.gemini_token_path,
                config.llm_request_timeout,
            )?,
            OpenAIClient::new(
                config.openai_api_key.as_deref(),
                Some(&config.openai_endpoint),
                config.llm_request_timeout,
            )?,
        ))
    }
}

#[async_trait]
impl LlmProvider for ProviderAdapter {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let backend = self.models.resolve(&request.model)?;
        log::info!(
            "[AI] Model {} → {} backend ({} turns, prompt length {})",
            request.model,
            backend,
            request.transcript.len(),
            request.system_prompt.as_ref().map(|s| s.len()).unwrap_or(0)
        );

        match backend {
            Backend::Gemini => self.gemini.generate(&request).await,
            Backend::OpenAI => self.openai.generate(&request).await,
        }
    }

    fn validate_model(&self, model: &str) -> Result<()> {
        self.models.resolve(model).map(|_| ())
    }
}
