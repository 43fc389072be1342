//! Repair: deterministic cleanup of model output before strict parsing.
//!
//! Even in JSON mode, vision models regularly wrap an otherwise valid object
//! in artefacts:
//!
//! - a ` ```json ... ``` ` fence despite the instruction not to
//! - a sentence of prose before or after the object
//! - a byte-order mark or zero-width characters between tokens
//! - a trailing comma before `}` or `]`
//!
//! These rules fix only the envelope, never content: the invisible-character
//! and trailing-comma rules skip everything inside JSON string literals, so
//! bubble text such as `"Wait, ]"` or an emoji ZWJ sequence comes through
//! untouched. The result is then deserialised strictly; anything still wrong
//! is a real failure.
//!
//! ## Rule Order
//!
//! Invisible characters go first so fence detection sees clean input; fences
//! are stripped before the object is sliced out; trailing commas are removed
//! only when the first strict parse has already failed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

/// Clean `raw` and deserialise it as `T`.
///
/// Returns the error from the first strict parse when every repair fails, so
/// callers can classify it with [`serde_json::Error::classify`].
pub fn parse_model_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    let cleaned = clean_json(raw);
    match serde_json::from_str::<T>(&cleaned) {
        Ok(value) => Ok(value),
        Err(first) => {
            let relaxed = remove_trailing_commas(&cleaned);
            if relaxed != cleaned {
                if let Ok(value) = serde_json::from_str::<T>(&relaxed) {
                    return Ok(value);
                }
            }
            Err(first)
        }
    }
}

/// Apply the envelope rules (1–3) to raw model output.
pub fn clean_json(input: &str) -> String {
    let s = remove_invisible_chars(input);
    let s = strip_code_fences(&s);
    extract_object(&s).to_string()
}

// ── Rule 1: Strip invisible Unicode ──────────────────────────────────────────

fn is_invisible(c: char) -> bool {
    matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}')
}

fn remove_invisible_chars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut scan = StringScan::default();
    for c in input.chars() {
        let in_string = scan.step(c);
        if in_string || !is_invisible(c) {
            out.push(c);
        }
    }
    out
}

/// Tracks whether the characters of a JSON text fall inside a string literal.
#[derive(Debug, Default)]
struct StringScan {
    in_string: bool,
    escaped: bool,
}

impl StringScan {
    /// Advance past `c`; true when `c` belongs to a string literal, quotes included.
    fn step(&mut self, c: char) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
            true
        } else if c == '"' {
            self.in_string = true;
            true
        } else {
            false
        }
    }
}

// ── Rule 2: Strip code fences ────────────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 3: Slice out the outermost object ───────────────────────────────────

fn extract_object(input: &str) -> &str {
    match (input.find('{'), input.rfind('}')) {
        (Some(start), Some(end)) if start < end => &input[start..=end],
        _ => input,
    }
}

// ── Rule 4: Remove trailing commas ───────────────────────────────────────────

fn remove_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut scan = StringScan::default();
    for (idx, c) in input.char_indices() {
        if !scan.step(c) && c == ',' && closes_next(&input[idx + 1..]) {
            continue;
        }
        out.push(c);
    }
    out
}

/// True when the next non-whitespace character closes an object or array.
fn closes_next(rest: &str) -> bool {
    matches!(rest.trim_start().chars().next(), Some('}' | ']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::error::Category;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: Vec<u32>,
    }

    #[test]
    fn plain_object_parses() {
        let p: Sample = parse_model_json(r#"{"a":1,"b":[2]}"#).unwrap();
        assert_eq!(p, Sample { a: 1, b: vec![2] });
    }

    #[test]
    fn fenced_object_parses() {
        let raw = "```json\n{\"a\": 1, \"b\": []}\n```";
        let p: Sample = parse_model_json(raw).unwrap();
        assert_eq!(p.a, 1);
    }

    #[test]
    fn surrounding_prose_is_dropped() {
        let raw = "Here is the analysis:\n{\"a\": 3, \"b\": [1]}\nHope this helps!";
        let p: Sample = parse_model_json(raw).unwrap();
        assert_eq!(p.a, 3);
    }

    #[test]
    fn bom_and_zero_width_removed() {
        let raw = "\u{FEFF}{\"a\":\u{200B} 5, \"b\": []}";
        let p: Sample = parse_model_json(raw).unwrap();
        assert_eq!(p.a, 5);
    }

    #[test]
    fn trailing_commas_repaired() {
        let raw = "{\"a\": 1, \"b\": [1, 2,],}";
        let p: Sample = parse_model_json(raw).unwrap();
        assert_eq!(p.b, vec![1, 2]);
    }

    #[test]
    fn truncated_output_is_syntax_error() {
        let err = parse_model_json::<Sample>("{\"a\": 1, \"b\": [1, 2").unwrap_err();
        assert!(matches!(err.classify(), Category::Eof | Category::Syntax));
    }

    #[test]
    fn missing_field_is_data_error() {
        let err = parse_model_json::<Sample>("{\"a\": 1}").unwrap_err();
        assert_eq!(err.classify(), Category::Data);
    }

    #[test]
    fn commas_inside_strings_survive_when_valid() {
        #[derive(Deserialize)]
        struct Text {
            t: String,
        }
        let p: Text = parse_model_json(r#"{"t": "Wait, ]"}"#).unwrap();
        assert_eq!(p.t, "Wait, ]");
    }

    #[test]
    fn trailing_comma_repair_leaves_string_contents_alone() {
        #[derive(Deserialize)]
        struct Text {
            t: String,
            b: Vec<u32>,
        }
        let p: Text = parse_model_json(r#"{"t": "Wait, ] No, }", "b": [1,],}"#).unwrap();
        assert_eq!(p.t, "Wait, ] No, }");
        assert_eq!(p.b, vec![1]);
    }

    #[test]
    fn escaped_quote_does_not_end_the_string() {
        #[derive(Deserialize)]
        struct Text {
            t: String,
        }
        let p: Text = parse_model_json(r#"{"t": "He said \"so, ]\"",}"#).unwrap();
        assert_eq!(p.t, r#"He said "so, ]""#);
    }

    #[test]
    fn zero_width_joiners_inside_text_survive() {
        #[derive(Deserialize)]
        struct Text {
            t: String,
            b: Vec<u32>,
        }
        let raw = "\u{FEFF}{\"t\": \"\u{1F468}\u{200D}\u{1F467} \u{0645}\u{200C}\u{06CC}\",\u{200B} \"b\": []}";
        let p: Text = parse_model_json(raw).unwrap();
        assert_eq!(p.t, "\u{1F468}\u{200D}\u{1F467} \u{0645}\u{200C}\u{06CC}");
        assert!(p.b.is_empty());
    }
}
