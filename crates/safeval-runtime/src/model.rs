//! The language-model capability consumed by the pipeline stages.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use safeval_core::config::LlmConfig;

use crate::error::ModelError;
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, TokenUsage};

/// Per-call generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub temperature: f32,
    pub max_tokens: u32,

    /// Ask for a JSON object response
    pub json_output: bool,

    /// Optional system instruction
    pub system: Option<String>,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 512,
            json_output: false,
            system: None,
        }
    }
}

impl ModelParams {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Reply from a model, with token usage when the backend reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    pub usage: Option<TokenUsage>,
    pub model: String,
}

/// Prompt in, text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, params: &ModelParams) -> Result<String, ModelError>;

    /// Like `generate`, also reporting token usage. Backends that know
    /// their usage override this.
    async fn generate_with_usage(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Generation, ModelError> {
        let text = self.generate(prompt, params).await?;
        Ok(Generation {
            text,
            usage: None,
            model: self.model_id().to_string(),
        })
    }

    /// Model identifier, used for cache keys and cost estimates.
    fn model_id(&self) -> &str;
}

/// Adapts an [`LlmProvider`] to [`LanguageModel`].
pub struct ProviderModel {
    provider: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout: Duration::from_secs(30),
        }
    }

    /// HTTP-level timeout; the invoker applies its own per-call timeout on top.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl LanguageModel for ProviderModel {
    async fn generate(&self, prompt: &str, params: &ModelParams) -> Result<String, ModelError> {
        Ok(self.generate_with_usage(prompt, params).await?.text)
    }

    async fn generate_with_usage(
        &self,
        prompt: &str,
        params: &ModelParams,
    ) -> Result<Generation, ModelError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &params.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let config = CompletionConfig {
            model: self.model.clone(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            timeout: self.timeout,
            json_output: params.json_output,
        };

        let response = self.provider.complete(messages, &config).await?;

        Ok(Generation {
            text: response.content,
            usage: Some(response.usage),
            model: response.model,
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CompletionResponse, ProviderError};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<(Vec<ChatMessage>, bool)>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn complete(
            &self,
            messages: Vec<ChatMessage>,
            config: &CompletionConfig,
        ) -> Result<CompletionResponse, ProviderError> {
            self.seen.lock().push((messages, config.json_output));
            Ok(CompletionResponse {
                content: "{\"ok\": true}".to_string(),
                usage: TokenUsage {
                    prompt_tokens: 12,
                    completion_tokens: 4,
                },
                model: config.model.clone(),
                stop_reason: None,
            })
        }

        async fn health_check(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[tokio::test]
    async fn test_provider_model_builds_messages() {
        let provider = Arc::new(RecordingProvider::default());
        let model = ProviderModel::new(provider.clone(), "gpt-4o-mini");

        let params = ModelParams::default().json().with_system("Answer in JSON.");
        let generation = model
            .generate_with_usage("Classify this.", &params)
            .await
            .unwrap();

        assert_eq!(generation.text, "{\"ok\": true}");
        assert_eq!(generation.usage.map(|u| u.total()), Some(16));

        let seen = provider.seen.lock();
        let (messages, json_output) = &seen[0];
        assert!(*json_output);
        assert_eq!(messages[0], ChatMessage::system("Answer in JSON."));
        assert_eq!(messages[1], ChatMessage::user("Classify this."));
    }
}
