//! Page analysis: one page image → panels and bubbles in reading order.
//!
//! [`PageAnalyzer::analyze`] never fails. Every way a page can go wrong
//! (provider error, timeout, unparseable JSON, schema violation) is a
//! [`PageAnalysisError`] from [`PageAnalyzer::try_analyze`], and `analyze`
//! turns any of them into the fallback page from [`Page::fallback`]. One bad
//! page therefore never costs the rest of the document.
//!
//! ## Validation
//!
//! The response is deserialised strictly: every field of the page schema is
//! required and typed, enum values must match exactly. On top of the types,
//! the analyzer enforces the structural invariants of the output model:
//!
//! - panel ids are unique within the page
//! - bubble ids are unique within their panel
//! - bubble `order` runs 1, 2, 3, … in the order the bubbles were emitted
//!
//! The `page_number` in the response must be present but is ignored in favour
//! of the caller's page number, so a confused model cannot reorder pages.

use crate::config::ExtractionConfig;
use crate::error::PageAnalysisError;
use crate::model::{invoke_json_with_timeout, VisionModel};
use crate::output::{Page, Panel, FALLBACK_CHARACTER};
use crate::pipeline::encode::PageImage;
use crate::pipeline::repair::parse_model_json;
use crate::prompts::page_analysis_prompt;
use serde::Deserialize;
use serde_json::error::Category;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of analysing one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageAnalysis {
    pub page: Page,
    /// Names from the model's `characters_on_page`, exact strings.
    pub characters: BTreeSet<String>,
    /// Why the fallback page was substituted, if it was.
    pub failure: Option<PageAnalysisError>,
}

impl PageAnalysis {
    /// The deterministic substitute for a page that could not be analysed.
    pub fn fallback(page_number: usize, failure: PageAnalysisError) -> Self {
        Self {
            page: Page::fallback(page_number),
            characters: BTreeSet::from([FALLBACK_CHARACTER.to_string()]),
            failure: Some(failure),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.failure.is_some()
    }
}

/// Wire shape of the page analysis response.
#[derive(Debug, Deserialize)]
struct PageResponse {
    page_number: usize,
    panels: Vec<Panel>,
    characters_on_page: Vec<String>,
}

/// Analyses single pages through a [`VisionModel`].
pub struct PageAnalyzer {
    model: Arc<dyn VisionModel>,
    max_tokens: usize,
    timeout: Duration,
}

impl PageAnalyzer {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        Self {
            model,
            max_tokens: 2000,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            model,
            max_tokens: config.page_max_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Analyse `image` as page `page_number` of `title`, falling back on any failure.
    pub async fn analyze(&self, image: &PageImage, title: &str, page_number: usize) -> PageAnalysis {
        match self.try_analyze(image, title, page_number).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!("Falling back for page {}: {}", page_number, e);
                PageAnalysis::fallback(page_number, e)
            }
        }
    }

    /// Analyse `image`, reporting why it failed instead of falling back.
    pub async fn try_analyze(
        &self,
        image: &PageImage,
        title: &str,
        page_number: usize,
    ) -> Result<PageAnalysis, PageAnalysisError> {
        let prompt = page_analysis_prompt(title, page_number);
        let raw = invoke_json_with_timeout(
            self.model.as_ref(),
            &prompt,
            Some(image),
            self.max_tokens,
            self.timeout,
        )
        .await
        .map_err(|source| PageAnalysisError::Model {
            page: page_number,
            source,
        })?;

        let page = parse_page_response(&raw, page_number)?;
        debug!(
            "Page {}: {} panels, {} bubbles",
            page_number,
            page.page.panels.len(),
            page.page.bubble_count()
        );
        Ok(page)
    }
}

/// Parse and validate a raw page analysis response for `page_number`.
pub fn parse_page_response(raw: &str, page_number: usize) -> Result<PageAnalysis, PageAnalysisError> {
    let response: PageResponse = parse_model_json(raw).map_err(|e| match e.classify() {
        Category::Data => PageAnalysisError::Schema {
            page: page_number,
            detail: e.to_string(),
        },
        _ => PageAnalysisError::MalformedJson {
            page: page_number,
            detail: e.to_string(),
        },
    })?;

    if response.page_number != page_number {
        debug!(
            "Page {}: model reported page_number {}, keeping {}",
            page_number, response.page_number, page_number
        );
    }

    validate_panels(&response.panels).map_err(|detail| PageAnalysisError::Schema {
        page: page_number,
        detail,
    })?;

    Ok(PageAnalysis {
        page: Page {
            page_number,
            panels: response.panels,
        },
        characters: response.characters_on_page.into_iter().collect(),
        failure: None,
    })
}

fn validate_panels(panels: &[Panel]) -> Result<(), String> {
    let mut panel_ids = HashSet::new();
    for panel in panels {
        if !panel_ids.insert(panel.panel_id.as_str()) {
            return Err(format!("duplicate panel_id '{}'", panel.panel_id));
        }

        let mut bubble_ids = HashSet::new();
        for (position, bubble) in panel.bubbles.iter().enumerate() {
            if !bubble_ids.insert(bubble.bubble_id.as_str()) {
                return Err(format!(
                    "duplicate bubble_id '{}' in panel '{}'",
                    bubble.bubble_id, panel.panel_id
                ));
            }
            let expected = position as u32 + 1;
            if bubble.order != expected {
                return Err(format!(
                    "bubble '{}' in panel '{}' has order {}, expected {}",
                    bubble.bubble_id, panel.panel_id, bubble.order, expected
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::model::mock::MockVisionModel;
    use crate::output::BubbleType;
    use image::{DynamicImage, Rgba, RgbaImage};

    const ALICE_PAGE: &str = r#"{"page_number":1,"panels":[{"panel_id":"p1_1","order":1,"bubbles":[{"bubble_id":"b1_1_1","text":"Hello!","order":1,"character":"Alice","bubble_type":"speech"}]}],"characters_on_page":["Alice"]}"#;

    fn image(page_number: usize) -> PageImage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 6, Rgba([255, 255, 255, 255])));
        PageImage::encode(page_number, &img).unwrap()
    }

    fn analyzer(model: MockVisionModel) -> PageAnalyzer {
        PageAnalyzer::new(Arc::new(model))
    }

    #[tokio::test]
    async fn accepts_well_formed_page() {
        let a = analyzer(MockVisionModel::new().respond_when("(page 1)", ALICE_PAGE));
        let result = a.analyze(&image(1), "Night Market", 1).await;

        assert!(!result.is_fallback());
        assert_eq!(result.page.page_number, 1);
        assert_eq!(result.page.panels.len(), 1);
        let bubble = &result.page.panels[0].bubbles[0];
        assert_eq!(bubble.text, "Hello!");
        assert_eq!(bubble.character, "Alice");
        assert_eq!(bubble.bubble_type, BubbleType::Speech);
        assert_eq!(result.characters, BTreeSet::from(["Alice".to_string()]));
    }

    #[tokio::test]
    async fn request_carries_image_and_token_cap() {
        let model = Arc::new(MockVisionModel::new().respond_when("(page 3)", ALICE_PAGE));
        let a = PageAnalyzer::new(model.clone());
        let _ = a.analyze(&image(3), "Night Market", 3).await;

        let calls = model.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].image_page, Some(3));
        assert!(calls[0].json_response);
        assert_eq!(calls[0].max_tokens, 2000);
        assert!(calls[0].prompt.contains("\"Night Market\""));
    }

    #[tokio::test]
    async fn model_error_falls_back() {
        let a = analyzer(
            MockVisionModel::new().fail_when("(page 2)", ModelError::Provider("HTTP 500".into())),
        );
        let result = a.analyze(&image(2), "T", 2).await;

        assert_eq!(result.page, Page::fallback(2));
        assert_eq!(result.characters, BTreeSet::from(["Narrator".to_string()]));
        assert!(matches!(
            result.failure,
            Some(PageAnalysisError::Model { page: 2, .. })
        ));
    }

    #[tokio::test]
    async fn timeout_falls_back() {
        let model = MockVisionModel::new().respond_slowly_when(
            "(page 1)",
            Duration::from_secs(5),
            ALICE_PAGE,
        );
        let a = analyzer(model).with_timeout(Duration::from_millis(50));
        let result = a.analyze(&image(1), "T", 1).await;

        assert!(matches!(
            result.failure,
            Some(PageAnalysisError::Model {
                source: ModelError::Timeout { .. },
                ..
            })
        ));
        assert_eq!(result.page, Page::fallback(1));
    }

    #[tokio::test]
    async fn prose_answer_falls_back_as_malformed() {
        let a = analyzer(MockVisionModel::new().respond_when("(page 1)", "I see two panels."));
        let result = a.analyze(&image(1), "T", 1).await;
        assert!(matches!(
            result.failure,
            Some(PageAnalysisError::MalformedJson { .. })
        ));
    }

    #[test]
    fn model_page_number_is_ignored() {
        let raw = ALICE_PAGE.replace("\"page_number\":1", "\"page_number\":9");
        let result = parse_page_response(&raw, 1).unwrap();
        assert_eq!(result.page.page_number, 1);
    }

    #[test]
    fn missing_characters_on_page_is_schema_error() {
        let raw = r#"{"page_number":1,"panels":[]}"#;
        let err = parse_page_response(raw, 1).unwrap_err();
        assert!(matches!(err, PageAnalysisError::Schema { page: 1, .. }));
    }

    #[test]
    fn missing_page_number_is_schema_error() {
        let raw = r#"{"panels":[],"characters_on_page":[]}"#;
        assert!(matches!(
            parse_page_response(raw, 4),
            Err(PageAnalysisError::Schema { page: 4, .. })
        ));
    }

    #[test]
    fn wrong_field_type_is_schema_error() {
        let raw = ALICE_PAGE.replace("\"order\":1,\"bubbles\"", "\"order\":\"first\",\"bubbles\"");
        assert!(matches!(
            parse_page_response(&raw, 1),
            Err(PageAnalysisError::Schema { .. })
        ));
    }

    #[test]
    fn unknown_bubble_type_is_schema_error() {
        let raw = ALICE_PAGE.replace("\"speech\"", "\"shout\"");
        assert!(matches!(
            parse_page_response(&raw, 1),
            Err(PageAnalysisError::Schema { .. })
        ));
    }

    #[test]
    fn non_contiguous_bubble_order_rejected() {
        let raw = r#"{"page_number":1,"panels":[{"panel_id":"p1_1","order":1,"bubbles":[
            {"bubble_id":"b1","text":"a","order":1,"character":"A","bubble_type":"speech"},
            {"bubble_id":"b2","text":"b","order":3,"character":"A","bubble_type":"speech"}
        ]}],"characters_on_page":["A"]}"#;
        let err = parse_page_response(raw, 1).unwrap_err();
        assert!(err.to_string().contains("expected 2"), "got: {err}");
    }

    #[test]
    fn duplicate_panel_ids_rejected() {
        let raw = r#"{"page_number":1,"panels":[
            {"panel_id":"p1_1","order":1,"bubbles":[]},
            {"panel_id":"p1_1","order":2,"bubbles":[]}
        ],"characters_on_page":[]}"#;
        assert!(parse_page_response(raw, 1).is_err());
    }

    #[test]
    fn duplicate_bubble_ids_rejected() {
        let raw = r#"{"page_number":1,"panels":[{"panel_id":"p1_1","order":1,"bubbles":[
            {"bubble_id":"b1","text":"a","order":1,"character":"A","bubble_type":"speech"},
            {"bubble_id":"b1","text":"b","order":2,"character":"A","bubble_type":"thought"}
        ]}],"characters_on_page":["A"]}"#;
        assert!(parse_page_response(raw, 1).is_err());
    }

    #[test]
    fn characters_are_exact_and_deduplicated() {
        let raw = r#"{"page_number":1,"panels":[],"characters_on_page":["Bob","bob","Bob"]}"#;
        let result = parse_page_response(raw, 1).unwrap();
        assert_eq!(
            result.characters,
            BTreeSet::from(["Bob".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn fenced_response_is_repaired() {
        let raw = format!("```json\n{ALICE_PAGE}\n```");
        assert!(parse_page_response(&raw, 1).is_ok());
    }

    #[test]
    fn panel_order_is_preserved_as_emitted() {
        let raw = r#"{"page_number":2,"panels":[
            {"panel_id":"p2_2","order":2,"bubbles":[]},
            {"panel_id":"p2_1","order":1,"bubbles":[]}
        ],"characters_on_page":[]}"#;
        let result = parse_page_response(raw, 2).unwrap();
        let ids: Vec<_> = result.page.panels.iter().map(|p| p.panel_id.as_str()).collect();
        assert_eq!(ids, ["p2_2", "p2_1"]);
    }
}
