//! Output types: the comic structure produced by extraction.
//!
//! The nesting is `DocumentMetadata → Page → Panel → Bubble`. Field names are
//! the persisted wire format, so every struct derives `Serialize` and
//! `Deserialize` with no renaming: a stored record can be read back into an
//! identical structure. Enum values serialise as lowercase strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Character attributed to a bubble when the model cannot tell who speaks.
pub const UNKNOWN_CHARACTER: &str = "unknown";

/// Character used for synthesised fallback pages.
pub const FALLBACK_CHARACTER: &str = "Narrator";

/// Kind of text container a bubble represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BubbleType {
    Speech,
    Thought,
    Narration,
    /// Sound effect lettering.
    Sound,
}

/// Panel traversal convention for the whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingDirection {
    #[default]
    Ltr,
    Rtl,
}

/// Visual style of the artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Western,
    Manga,
}

/// One unit of dialogue, thought, narration or sound-effect text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bubble {
    /// Unique within the owning panel.
    pub bubble_id: String,
    /// Verbatim text, or an action description when the panel has no text.
    pub text: String,
    /// 1-based reading position within the panel.
    pub order: u32,
    /// Speaker or thinker, or [`UNKNOWN_CHARACTER`].
    pub character: String,
    pub bubble_type: BubbleType,
}

/// A framed illustration on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    /// Unique within the owning page. Conventionally `p{page}_{n}`.
    pub panel_id: String,
    /// Reading position within the page.
    pub order: u32,
    pub bubbles: Vec<Bubble>,
}

/// One PDF page worth of panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based position in the source PDF.
    pub page_number: usize,
    pub panels: Vec<Panel>,
}

impl Page {
    /// The page substituted when analysis of `page_number` fails.
    ///
    /// One panel holding one narration bubble whose text flags the failure.
    pub fn fallback(page_number: usize) -> Self {
        Self {
            page_number,
            panels: vec![Panel {
                panel_id: format!("p{page_number}_1"),
                order: 1,
                bubbles: vec![Bubble {
                    bubble_id: format!("b{page_number}_1_1"),
                    text: format!("Page {page_number} content (AI processing failed)"),
                    order: 1,
                    character: FALLBACK_CHARACTER.to_string(),
                    bubble_type: BubbleType::Narration,
                }],
            }],
        }
    }

    /// Total number of bubbles across all panels.
    pub fn bubble_count(&self) -> usize {
        self.panels.iter().map(|p| p.bubbles.len()).sum()
    }
}

/// Reading direction and art style for a whole document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyleProfile {
    pub reading_direction: ReadingDirection,
    pub style: Style,
}

/// Everything extracted from one comic PDF.
///
/// `pages` always has one entry per source page, in PDF order; pages whose
/// analysis failed are present as [`Page::fallback`] entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: String,
    /// Union of the character names seen on every page (exact match).
    pub characters: BTreeSet<String>,
    pub reading_direction: ReadingDirection,
    pub style: Style,
    pub pages: Vec<Page>,
}

/// Timing and outcome counters for one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// Pages rasterised from the PDF.
    pub total_pages: usize,
    /// Pages whose model output was accepted.
    pub analyzed_pages: usize,
    /// Pages replaced by the fallback narration page.
    pub fallback_pages: usize,
    /// Distinct character names in the final roster.
    pub character_count: usize,
    /// Whether the style profile came from the model rather than the default.
    pub style_classified: bool,
    /// Wall-clock time for rasterisation plus page analysis.
    pub pages_duration_ms: u64,
    /// Wall-clock time for the whole extraction.
    pub total_duration_ms: u64,
}

/// Result of [`crate::extract::extract_with_stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub metadata: DocumentMetadata,
    pub stats: ExtractionStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> DocumentMetadata {
        DocumentMetadata {
            title: "Night Market".into(),
            characters: ["Alice", "Bob", "Narrator"]
                .into_iter()
                .map(String::from)
                .collect(),
            reading_direction: ReadingDirection::Rtl,
            style: Style::Manga,
            pages: vec![
                Page {
                    page_number: 1,
                    panels: vec![
                        Panel {
                            panel_id: "p1_1".into(),
                            order: 1,
                            bubbles: vec![
                                Bubble {
                                    bubble_id: "b1_1_1".into(),
                                    text: "Hello!".into(),
                                    order: 1,
                                    character: "Alice".into(),
                                    bubble_type: BubbleType::Speech,
                                },
                                Bubble {
                                    bubble_id: "b1_1_2".into(),
                                    text: "KRAK".into(),
                                    order: 2,
                                    character: UNKNOWN_CHARACTER.into(),
                                    bubble_type: BubbleType::Sound,
                                },
                            ],
                        },
                        Panel {
                            panel_id: "p1_2".into(),
                            order: 2,
                            bubbles: vec![],
                        },
                    ],
                },
                Page::fallback(2),
            ],
        }
    }

    #[test]
    fn fallback_page_shape() {
        let page = Page::fallback(3);
        assert_eq!(page.page_number, 3);
        assert_eq!(page.panels.len(), 1);
        assert_eq!(page.bubble_count(), 1);

        let panel = &page.panels[0];
        assert_eq!(panel.panel_id, "p3_1");
        assert_eq!(panel.order, 1);

        let bubble = &panel.bubbles[0];
        assert_eq!(bubble.bubble_id, "b3_1_1");
        assert_eq!(bubble.order, 1);
        assert_eq!(bubble.text, "Page 3 content (AI processing failed)");
        assert_eq!(bubble.character, "Narrator");
        assert_eq!(bubble.bubble_type, BubbleType::Narration);
    }

    #[test]
    fn document_json_round_trip() {
        let doc = sample_document();
        let json = serde_json::to_string(&doc).unwrap();
        let back: DocumentMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn wire_field_names() {
        let value = serde_json::to_value(sample_document()).unwrap();
        assert_eq!(value["reading_direction"], "rtl");
        assert_eq!(value["style"], "manga");
        assert!(value["characters"].is_array());

        let bubble = &value["pages"][0]["panels"][0]["bubbles"][1];
        assert_eq!(bubble["bubble_id"], "b1_1_2");
        assert_eq!(bubble["bubble_type"], "sound");
        assert_eq!(bubble["character"], "unknown");
        assert_eq!(value["pages"][0]["panels"][0]["panel_id"], "p1_1");
        assert_eq!(value["pages"][1]["page_number"], 2);
    }

    #[test]
    fn style_defaults_are_ltr_western() {
        let profile = StyleProfile::default();
        assert_eq!(profile.reading_direction, ReadingDirection::Ltr);
        assert_eq!(profile.style, Style::Western);
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let err = serde_json::from_str::<Style>("\"hybrid\"");
        assert!(err.is_err());
    }
}
