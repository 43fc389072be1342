//! Scripted [`VisionModel`] for tests and offline runs.
//!
//! Each rule pairs a prompt substring with a canned reply. The first rule
//! whose needle occurs in the prompt wins; a prompt matching no rule fails
//! with [`ModelError::Provider`]. Page prompts contain `(page N)`, which makes
//! per-page scripting straightforward:
//!
//! ```rust
//! use comic_extract::model::mock::MockVisionModel;
//! use comic_extract::ModelError;
//!
//! let model = MockVisionModel::new()
//!     .respond_when("(page 1)", r#"{"page_number":1,"panels":[],"characters_on_page":[]}"#)
//!     .fail_when("(page 2)", ModelError::Provider("HTTP 503".into()));
//! assert_eq!(model.call_count(), 0);
//! ```

use super::VisionModel;
use crate::error::ModelError;
use crate::pipeline::encode::PageImage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

struct Rule {
    needle: String,
    reply: Result<String, ModelError>,
    delay: Option<Duration>,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    /// Page number of the attached image, if any.
    pub image_page: Option<usize>,
    pub json_response: bool,
    pub max_tokens: usize,
}

/// A [`VisionModel`] that answers from a script.
#[derive(Default)]
pub struct MockVisionModel {
    rules: Vec<Rule>,
    calls: AtomicUsize,
    log: Mutex<Vec<RecordedCall>>,
}

impl MockVisionModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` when the prompt contains `needle`.
    pub fn respond_when(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Ok(response.into()),
            delay: None,
        });
        self
    }

    /// Fail with `error` when the prompt contains `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, error: ModelError) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Err(error),
            delay: None,
        });
        self
    }

    /// Sleep for `delay` before replying with `response`.
    pub fn respond_slowly_when(
        mut self,
        needle: impl Into<String>,
        delay: Duration,
        response: impl Into<String>,
    ) -> Self {
        self.rules.push(Rule {
            needle: needle.into(),
            reply: Ok(response.into()),
            delay: Some(delay),
        });
        self
    }

    /// Number of invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every invocation so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VisionModel for MockVisionModel {
    async fn invoke(
        &self,
        prompt: &str,
        image: Option<&PageImage>,
        json_response: bool,
        max_tokens: usize,
    ) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(RecordedCall {
                prompt: prompt.to_string(),
                image_page: image.map(|i| i.page_number),
                json_response,
                max_tokens,
            });
        }

        let Some(rule) = self.rules.iter().find(|r| prompt.contains(&r.needle)) else {
            return Err(ModelError::Provider("no scripted response".into()));
        };
        if let Some(delay) = rule.delay {
            tokio::time::sleep(delay).await;
        }
        rule.reply.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_matching_rule_wins() {
        let model = MockVisionModel::new()
            .respond_when("page 1", "first")
            .respond_when("page", "second");
        assert_eq!(model.invoke("page 1", None, true, 10).await.unwrap(), "first");
        assert_eq!(model.invoke("page 9", None, true, 10).await.unwrap(), "second");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn unmatched_prompt_fails() {
        let model = MockVisionModel::new();
        let err = model.invoke("anything", None, false, 1).await.unwrap_err();
        assert!(matches!(err, ModelError::Provider(_)));
    }

    #[tokio::test]
    async fn records_calls() {
        let model = MockVisionModel::new().fail_when("x", ModelError::EmptyResponse);
        let _ = model.invoke("x marks", None, true, 200).await;
        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].max_tokens, 200);
        assert!(calls[0].json_response);
        assert_eq!(calls[0].image_page, None);
    }
}
