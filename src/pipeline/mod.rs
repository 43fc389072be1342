//! Pipeline stages for comic extraction.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own; the analyzer and classifier never see pdfium, and the rasteriser
//! never sees a model.
//!
//! ## Data Flow
//!
//! ```text
//!                              ┌──▶ analyze (per page, bounded concurrency) ──┐
//! input ──▶ render ──▶ encode ─┤                                              ├──▶ DocumentMetadata
//! (path)    (pdfium)  (base64) └──▶ style   (first page only) ────────────────┘
//! ```
//!
//! 1. [`input`]: check the path and `%PDF` magic, or stage uploaded bytes
//! 2. [`render`]: rasterise pages at 2× on a blocking thread, exposed as a
//!    lazy stream
//! 3. [`encode`]: PNG-encode and base64-wrap each page for the request body
//! 4. [`llm`]: `edgequake-llm` adapter behind [`crate::model::VisionModel`]
//! 5. [`repair`]: strip fences and prose from model output before strict parsing
//! 6. [`analyze`]: page → panels and bubbles, or the fallback page
//! 7. [`style`]: reading direction and art style, or `{ltr, western}`

pub mod analyze;
pub mod encode;
pub mod input;
pub mod llm;
pub mod render;
pub mod repair;
pub mod style;
