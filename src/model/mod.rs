//! The model-invocation seam.
//!
//! [`VisionModel`] is the only way the analyzer and classifier talk to a
//! language model: one prompt, at most one inline image, a JSON-only flag and
//! an output token cap in; raw response text or a [`ModelError`] out.
//! [`crate::pipeline::llm::LlmVisionModel`] implements it over an
//! `edgequake-llm` provider; [`mock::MockVisionModel`] implements it from a
//! script for tests.

pub mod mock;

use crate::error::ModelError;
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use std::time::Duration;

/// A vision-capable language model.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Send one request and return the raw response text.
    ///
    /// When `json_response` is set the model is instructed to answer with a
    /// single JSON object; the caller still validates what comes back.
    async fn invoke(
        &self,
        prompt: &str,
        image: Option<&PageImage>,
        json_response: bool,
        max_tokens: usize,
    ) -> Result<String, ModelError>;
}

/// Invoke `model` for a JSON answer, giving up after `timeout`.
///
/// The pending call is dropped on timeout; providers see a cancelled request.
pub(crate) async fn invoke_json_with_timeout(
    model: &dyn VisionModel,
    prompt: &str,
    image: Option<&PageImage>,
    max_tokens: usize,
    timeout: Duration,
) -> Result<String, ModelError> {
    match tokio::time::timeout(timeout, model.invoke(prompt, image, true, max_tokens)).await {
        Ok(result) => result,
        Err(_) => Err(ModelError::Timeout { after: timeout }),
    }
}
