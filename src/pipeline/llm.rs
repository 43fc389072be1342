//! `edgequake-llm` adapter for the [`VisionModel`] seam.
//!
//! [`LlmVisionModel`] turns one `invoke` into one chat request: an optional
//! JSON-only system message followed by a user message carrying the prompt
//! and the page image. Parsing and fallback policy live in the analyzer and
//! classifier, not here.
//!
//! ## Retry Strategy
//!
//! Retries are off by default (`max_retries = 0`): a failed page simply falls
//! back. When enabled, transient failures back off exponentially
//! (`retry_backoff_ms * 2^attempt`), 500 ms → 1 s → 2 s with the defaults.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, ModelError};
use crate::model::VisionModel;
use crate::pipeline::encode::PageImage;
use crate::prompts::JSON_ONLY_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// A [`VisionModel`] backed by an `edgequake-llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmVisionModel {
    /// Wrap `provider` with default sampling and no retries.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            temperature: 0.1,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }

    /// Wrap `provider` using the sampling and retry settings of `config`.
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &ExtractionConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    fn build_messages(prompt: &str, image: Option<&PageImage>, json_response: bool) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if json_response {
            messages.push(ChatMessage::system(JSON_ONLY_SYSTEM_PROMPT));
        }
        match image {
            Some(img) => messages.push(ChatMessage::user_with_images(prompt, vec![img.data.clone()])),
            None => messages.push(ChatMessage::user(prompt)),
        }
        messages
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    async fn invoke(
        &self,
        prompt: &str,
        image: Option<&PageImage>,
        json_response: bool,
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        let start = Instant::now();
        let messages = Self::build_messages(prompt, image, json_response);
        let options = build_options(self.temperature, max_tokens);
        let label = image
            .map(|i| format!("page {}", i.page_number))
            .unwrap_or_else(|| "text-only request".to_string());

        let mut last_err = ModelError::EmptyResponse;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) if response.content.trim().is_empty() => {
                    warn!("{}: attempt {} returned no content", label, attempt + 1);
                    last_err = ModelError::EmptyResponse;
                }
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        label,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                    last_err = ModelError::Provider(e.to_string());
                }
            }
        }

        Err(last_err)
    }
}

/// Build `CompletionOptions` for one request.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Instantiate a named provider with the given model.
fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ExtractionError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ExtractionError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI** when `OPENAI_API_KEY` is set.
/// 5. **Full auto-detection** via `ProviderFactory::from_env`.
pub fn resolve_provider(config: &ExtractionConfig) -> Result<Arc<dyn LLMProvider>, ExtractionError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ExtractionError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

/// Resolve the provider for `config` and wrap it as a [`VisionModel`].
pub fn vision_model_from_config(
    config: &ExtractionConfig,
) -> Result<Arc<dyn VisionModel>, ExtractionError> {
    let provider = resolve_provider(config)?;
    Ok(Arc::new(LlmVisionModel::from_config(provider, config)))
}
