//! # comic-extract
//!
//! Turn comic book PDFs into structured, reading-ordered data using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Comic text lives in hand-lettered speech bubbles, thought clouds, captions
//! and sound effects scattered across panels. Text extraction gives nothing
//! back for scanned pages and the wrong order for everything else. Instead
//! this crate rasterises each page and asks a VLM to read it as a person
//! would: panels in reading order, bubbles in reading order, who says what.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input    check the path (or stage uploaded bytes)
//!  ├─ 2. Render   rasterise pages at 2× via pdfium (blocking thread → stream)
//!  ├─ 3. Encode   PNG → base64 ImageData
//!  ├─ 4. Analyze  one VLM call per page → panels + bubbles, or a fallback page
//!  ├─ 5. Style    one VLM call on page 1 → reading direction + art style
//!  └─ 6. Output   DocumentMetadata: title, characters, style, pages
//! ```
//!
//! A page the model cannot read becomes a single narration bubble saying so;
//! only input and rasterisation problems fail the whole extraction.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use comic_extract::{extract, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let comic = extract("issue-01.pdf", "Issue #1", &config).await?;
//!     println!("{} pages, cast: {:?}", comic.pages.len(), comic.characters);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `comic2json` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! comic-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{
    ExtractionError, ModelError, PageAnalysisError, StorageError, StyleClassificationError,
};
pub use extract::{extract, extract_from_bytes, extract_sync, extract_with_stats, ExtractionPipeline};
pub use model::mock::MockVisionModel;
pub use model::VisionModel;
pub use output::{
    Bubble, BubbleType, DocumentMetadata, ExtractionOutput, ExtractionStats, Page, Panel,
    ReadingDirection, Style, StyleProfile,
};
pub use pipeline::analyze::{PageAnalysis, PageAnalyzer};
pub use pipeline::encode::PageImage;
pub use pipeline::llm::LlmVisionModel;
pub use pipeline::render::{PageRasterizer, RasterPages};
pub use pipeline::style::StyleClassifier;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use storage::{
    BlobStore, ComicLibrary, ComicRecord, ComicRepository, JsonFileRepository, LocalBlobStore,
};
