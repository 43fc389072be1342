//! Style classification: reading direction and art style for a whole comic.
//!
//! One request, made with the first page only, decides the profile for the
//! entire document. An empty document never reaches the model, and any
//! failure yields the default profile `{ltr, western}`.
//!
//! The answer is accepted or rejected as a whole: an unknown style such as
//! `"hybrid"` resets the reading direction to `ltr` too, even when the model
//! said `rtl`.

use crate::config::ExtractionConfig;
use crate::error::StyleClassificationError;
use crate::model::{invoke_json_with_timeout, VisionModel};
use crate::output::StyleProfile;
use crate::pipeline::encode::PageImage;
use crate::pipeline::repair::parse_model_json;
use crate::prompts::style_classification_prompt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of a classification, with the reason when the default was used.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleClassification {
    pub profile: StyleProfile,
    pub failure: Option<StyleClassificationError>,
    /// Whether the model was consulted at all.
    pub invoked: bool,
}

/// Classifies reading direction and art style through a [`VisionModel`].
pub struct StyleClassifier {
    model: Arc<dyn VisionModel>,
    max_tokens: usize,
    timeout: Duration,
}

impl StyleClassifier {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self {
            model,
            max_tokens: 200,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            max_tokens: config.style_max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Profile for the comic `title`, judged from its first page.
    pub async fn classify(&self, first_page: Option<&PageImage>, title: &str) -> StyleProfile {
        self.classify_detailed(first_page, title).await.profile
    }

    /// Like [`classify`](Self::classify), keeping the failure reason.
    pub async fn classify_detailed(
        &self,
        first_page: Option<&PageImage>,
        title: &str,
    ) -> StyleClassification {
        let Some(image) = first_page else {
            debug!("No pages; using default style profile");
            return StyleClassification {
                profile: StyleProfile::default(),
                failure: None,
                invoked: false,
            };
        };

        match self.try_classify(image, title).await {
            Ok(profile) => {
                debug!("Style profile: {:?}", profile);
                StyleClassification {
                    profile,
                    failure: None,
                    invoked: true,
                }
            }
            Err(e) => {
                warn!("Using default style profile: {}", e);
                StyleClassification {
                    profile: StyleProfile::default(),
                    failure: Some(e),
                    invoked: true,
                }
            }
        }
    }

    async fn try_classify(
        &self,
        image: &PageImage,
        title: &str,
    ) -> Result<StyleProfile, StyleClassificationError> {
        let prompt = style_classification_prompt(title);
        let raw = invoke_json_with_timeout(
            self.model.as_ref(),
            &prompt,
            Some(image),
            self.max_tokens,
            self.timeout,
        )
        .await?;
        parse_style_response(&raw)
    }
}

/// Parse a raw `{reading_direction, style}` response.
pub fn parse_style_response(raw: &str) -> Result<StyleProfile, StyleClassificationError> {
    parse_model_json::<StyleProfile>(raw)
        .map_err(|e| StyleClassificationError::InvalidResponse(e.to_string()))
}
