//! Configuration types for comic extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Callers set only the knobs they care
//! about and rely on documented defaults for the rest.

use crate::error::ExtractionError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Linear upscale applied to every page before it is sent to the model.
///
/// Comic lettering is small relative to the page; doubling both axes keeps
/// speech-bubble text legible for the vision model.
pub const RENDER_SCALE: f32 = 2.0;

/// Configuration for a comic extraction.
///
/// # Example
/// ```rust
/// use comic_extract::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .concurrency(4)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Number of page analyses in flight at once. Default: 1 (sequential).
    ///
    /// Pages have no cross-page dependency, so raising this only trades API
    /// rate-limit headroom for wall-clock time. Results are always reassembled
    /// in page order.
    pub concurrency: usize,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Output token cap for one page analysis. Default: 2000.
    ///
    /// A dense page with a dozen panels produces roughly 1 500 tokens of JSON;
    /// a truncated response is unparseable and falls back, so err high.
    pub page_max_tokens: usize,

    /// Output token cap for the style classification. Default: 200.
    pub style_max_tokens: usize,

    /// Per-model-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Provider-level retries on a failed call. Default: 0.
    ///
    /// The analyzer and classifier never retry on their own; a failed call
    /// selects their fallback. Setting this enables bounded exponential
    /// backoff inside the provider adapter.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Receives per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            page_max_tokens: 2000,
            style_max_tokens: 200,
            api_timeout_secs: 60,
            max_retries: 0,
            retry_backoff_ms: 500,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("concurrency", &self.concurrency)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("page_max_tokens", &self.page_max_tokens)
            .field("style_max_tokens", &self.style_max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn callback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn page_max_tokens(mut self, n: usize) -> Self {
        self.config.page_max_tokens = n;
        self
    }

    pub fn style_max_tokens(mut self, n: usize) -> Self {
        self.config.style_max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractionError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(ExtractionError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.page_max_tokens == 0 || c.style_max_tokens == 0 {
            return Err(ExtractionError::InvalidConfig(
                "Token limits must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(ExtractionError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
