//! Prompts for the page analysis and style classification model calls.
//!
//! Every prompt lives here so wording changes never touch the parsing or
//! fallback logic, and so tests can assert on prompt content directly.
//!
//! The JSON shapes described in these prompts are the contract enforced by
//! [`crate::pipeline::analyze`] and [`crate::pipeline::style`]; change both
//! together.

/// System instruction sent with every request that must answer in JSON.
pub const JSON_ONLY_SYSTEM_PROMPT: &str = "You are a comic book analysis engine. \
Respond with exactly one JSON object and nothing else: no prose, no comments, \
no Markdown code fences.";

/// Build the page analysis prompt for `page_number` of the comic `title`.
pub fn page_analysis_prompt(title: &str, page_number: usize) -> String {
    format!(
        r#"Analyze this comic page from "{title}" (page {page_number}).

Please identify:
1. All panels in reading order
2. All speech bubbles, thought bubbles, narration boxes, and sound effects
3. Which character is speaking or thinking, or "unknown" if it cannot be identified
4. The exact text in each bubble

If a panel contains no text, describe the action in that panel as a narration bubble.

Return a JSON object with this structure:
{{
    "page_number": {page_number},
    "panels": [
        {{
            "panel_id": "p{page_number}_1",
            "order": 1,
            "bubbles": [
                {{
                    "bubble_id": "b{page_number}_1_1",
                    "text": "exact text here",
                    "order": 1,
                    "character": "character name or 'unknown'",
                    "bubble_type": "speech|thought|narration|sound"
                }}
            ]
        }}
    ],
    "characters_on_page": ["list", "of", "character", "names"]
}}

Number bubble "order" from 1 within each panel, in reading order."#
    )
}

/// Build the reading-direction and style prompt for the comic `title`.
pub fn style_classification_prompt(title: &str) -> String {
    format!(
        r#"Analyze this page from the comic "{title}" and determine:
1. Is this a Western comic (left-to-right reading) or Manga (right-to-left reading)?
2. What is the art style: western or manga?

Return a JSON object:
{{
    "reading_direction": "ltr" or "rtl",
    "style": "western" or "manga"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_prompt_names_title_and_page() {
        let p = page_analysis_prompt("Night Market", 3);
        assert!(p.contains("\"Night Market\" (page 3)"));
        assert!(p.contains("\"panel_id\": \"p3_1\""));
        assert!(p.contains("\"bubble_id\": \"b3_1_1\""));
    }

    #[test]
    fn page_prompt_lists_every_required_field() {
        let p = page_analysis_prompt("T", 1);
        for field in [
            "page_number",
            "panels",
            "panel_id",
            "order",
            "bubbles",
            "bubble_id",
            "text",
            "character",
            "bubble_type",
            "characters_on_page",
        ] {
            assert!(p.contains(&format!("\"{field}\"")), "missing {field}");
        }
    }

    #[test]
    fn style_prompt_lists_fields() {
        let p = style_classification_prompt("Night Market");
        assert!(p.contains("\"reading_direction\""));
        assert!(p.contains("\"style\""));
        assert!(p.contains("right-to-left"));
        // Only the two styles the classifier accepts are offered.
        assert!(!p.contains("hybrid"));
    }
}
