//! Whole-document extraction: PDF → [`DocumentMetadata`].
//!
//! [`ExtractionPipeline`] wires the stages together. Pages flow from the
//! rasteriser into the analyzer with at most `concurrency` model calls in
//! flight, are put back into page order, and the first page is then used once
//! for style classification.
//!
//! The result is all-or-nothing: either one `DocumentMetadata` with exactly
//! as many pages as the PDF has, or one fatal [`ExtractionError`]. Model
//! failures never reach this level; they were already turned into fallback
//! pages or the default style profile.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::model::VisionModel;
use crate::output::{DocumentMetadata, ExtractionOutput, ExtractionStats};
use crate::pipeline::analyze::{PageAnalysis, PageAnalyzer};
use crate::pipeline::encode::PageImage;
use crate::pipeline::input;
use crate::pipeline::llm::vision_model_from_config;
use crate::pipeline::render::{PageRasterizer, RasterPages};
use crate::pipeline::style::StyleClassifier;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use futures::{StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The extraction pipeline for one model and configuration.
///
/// Holds no per-document state; one pipeline can extract many comics,
/// including concurrently.
pub struct ExtractionPipeline {
    rasterizer: PageRasterizer,
    analyzer: PageAnalyzer,
    classifier: StyleClassifier,
    concurrency: usize,
    progress: ProgressCallback,
}

impl ExtractionPipeline {
    /// Build a pipeline around an explicit model.
    pub fn new(model: Arc<dyn VisionModel>, config: &ExtractionConfig) -> Self {
        Self {
            rasterizer: PageRasterizer::from_config(config),
            analyzer: PageAnalyzer::from_config(Arc::clone(&model), config),
            classifier: StyleClassifier::from_config(model, config),
            concurrency: config.concurrency.max(1),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    /// Build a pipeline whose model is resolved from `config` and the environment.
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let model = vision_model_from_config(config)?;
        Ok(Self::new(model, config))
    }

    /// Extract the comic at `pdf_path`.
    pub async fn extract(
        &self,
        pdf_path: &Path,
        title: &str,
    ) -> Result<DocumentMetadata, ExtractionError> {
        Ok(self.extract_with_stats(pdf_path, title).await?.metadata)
    }

    /// Extract the comic at `pdf_path`, with timing and fallback counts.
    pub async fn extract_with_stats(
        &self,
        pdf_path: &Path,
        title: &str,
    ) -> Result<ExtractionOutput, ExtractionError> {
        let total_start = Instant::now();
        info!("Starting extraction: {} ({:?})", pdf_path.display(), title);

        let resolved = input::resolve_local(pdf_path)?;
        let pages = self.rasterizer.rasterize(resolved.path()).await?;
        let mut output = self.extract_pages(pages, title).await?;

        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Extract a comic uploaded as bytes.
    ///
    /// The bytes are staged in a temp file that is removed before returning.
    pub async fn extract_bytes(
        &self,
        bytes: &[u8],
        title: &str,
    ) -> Result<ExtractionOutput, ExtractionError> {
        let total_start = Instant::now();
        let staged = input::stage_bytes(bytes).await?;
        let pages = self.rasterizer.rasterize(staged.path()).await?;
        let mut output = self.extract_pages(pages, title).await?;

        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        Ok(output)
    }

    /// Analyse an already-open page stream and classify its style.
    ///
    /// The first error in `pages` aborts the extraction and cancels any page
    /// analyses still in flight.
    pub async fn extract_pages(
        &self,
        pages: RasterPages,
        title: &str,
    ) -> Result<ExtractionOutput, ExtractionError> {
        let start = Instant::now();
        let total_pages = pages.total_pages();
        self.progress.on_extraction_start(total_pages);

        let mut first_page: Option<PageImage> = None;
        let mut analyses: Vec<PageAnalysis> = pages
            .map(|item| {
                item.inspect(|image| {
                    if first_page.is_none() {
                        first_page = Some(image.clone());
                    }
                })
            })
            .map_ok(|image| async move {
                Ok::<_, ExtractionError>(self.analyze_page(image, title, total_pages).await)
            })
            .try_buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        analyses.sort_by_key(|a| a.page.page_number);
        let pages_duration_ms = start.elapsed().as_millis() as u64;

        let classification = self
            .classifier
            .classify_detailed(first_page.as_ref(), title)
            .await;

        let fallback_pages = analyses.iter().filter(|a| a.is_fallback()).count();
        let mut characters = BTreeSet::new();
        let mut document_pages = Vec::with_capacity(analyses.len());
        for analysis in analyses {
            characters.extend(analysis.characters);
            document_pages.push(analysis.page);
        }

        self.progress.on_extraction_complete(total_pages, fallback_pages);

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let stats = ExtractionStats {
            total_pages: document_pages.len(),
            analyzed_pages: document_pages.len() - fallback_pages,
            fallback_pages,
            character_count: characters.len(),
            style_classified: classification.invoked && classification.failure.is_none(),
            pages_duration_ms,
            total_duration_ms: elapsed_ms,
        };

        info!(
            "Extraction complete: {} pages ({} fallback), {} characters, {}ms",
            stats.total_pages, fallback_pages, stats.character_count, elapsed_ms
        );

        Ok(ExtractionOutput {
            metadata: DocumentMetadata {
                title: title.to_string(),
                characters,
                reading_direction: classification.profile.reading_direction,
                style: classification.profile.style,
                pages: document_pages,
            },
            stats,
        })
    }

    async fn analyze_page(&self, image: PageImage, title: &str, total_pages: usize) -> PageAnalysis {
        let page_number = image.page_number;
        self.progress.on_page_start(page_number, total_pages);

        let analysis = self.analyzer.analyze(&image, title, page_number).await;
        match &analysis.failure {
            None => {
                debug!("Page {}/{} analysed", page_number, total_pages);
                self.progress
                    .on_page_complete(page_number, total_pages, analysis.page.bubble_count());
            }
            Some(reason) => {
                self.progress
                    .on_page_fallback(page_number, total_pages, &reason.to_string());
            }
        }
        analysis
    }
}

/// Extract the comic at `pdf_path` with the model resolved from `config`.
///
/// # Example
/// ```rust,no_run
/// use comic_extract::{extract, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ExtractionConfig::default();
/// let metadata = extract("issue-01.pdf", "Issue #1", &config).await?;
/// println!("{}", serde_json::to_string_pretty(&metadata)?);
/// # Ok(())
/// # }
/// ```
pub async fn extract(
    pdf_path: impl AsRef<Path>,
    title: &str,
    config: &ExtractionConfig,
) -> Result<DocumentMetadata, ExtractionError> {
    ExtractionPipeline::from_config(config)?
        .extract(pdf_path.as_ref(), title)
        .await
}

/// Like [`extract`], also returning [`ExtractionStats`].
pub async fn extract_with_stats(
    pdf_path: impl AsRef<Path>,
    title: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractionError> {
    ExtractionPipeline::from_config(config)?
        .extract_with_stats(pdf_path.as_ref(), title)
        .await
}

/// Extract a comic held in memory, e.g. straight from an upload.
pub async fn extract_from_bytes(
    bytes: &[u8],
    title: &str,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, ExtractionError> {
    ExtractionPipeline::from_config(config)?
        .extract_bytes(bytes, title)
        .await
}

/// Synchronous wrapper around [`extract`].
///
/// Creates a temporary tokio runtime internally; do not call from async code.
pub fn extract_sync(
    pdf_path: impl AsRef<Path>,
    title: &str,
    config: &ExtractionConfig,
) -> Result<DocumentMetadata, ExtractionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ExtractionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract(pdf_path, title, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockVisionModel;
    use crate::output::{ReadingDirection, Style};
    use crate::progress::ExtractionProgressCallback;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn image(page_number: usize) -> PageImage {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 3, Rgba([1, 2, 3, 255])));
        PageImage::encode(page_number, &img).unwrap()
    }

    fn page_json(page: usize, who: &str) -> String {
        format!(
            r#"{{"page_number": {page}, "panels": [{{"panel_id": "p{page}_1", "order": 1,
            "bubbles": [{{"bubble_id": "b{page}_1_1", "text": "Hi from {who}", "order": 1,
            "character": "{who}", "bubble_type": "speech"}}]}}],
            "characters_on_page": ["{who}"]}}"#
        )
    }

    #[derive(Default)]
    struct Counting {
        started: AtomicUsize,
        completed: AtomicUsize,
        fallbacks: AtomicUsize,
        finished_with: AtomicUsize,
    }

    impl ExtractionProgressCallback for Counting {
        fn on_page_start(&self, _page: usize, _total: usize) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_complete(&self, _page: usize, _total: usize, _bubbles: usize) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_fallback(&self, _page: usize, _total: usize, _reason: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_extraction_complete(&self, _total: usize, fallback_count: usize) {
            self.finished_with.store(fallback_count, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn progress_events_cover_every_page() {
        let model = Arc::new(
            MockVisionModel::new()
                .respond_when("(page 1)", page_json(1, "Ana"))
                .respond_when("(page 3)", page_json(3, "Bo")),
        );
        let counting = Arc::new(Counting::default());
        let config = ExtractionConfig::builder()
            .progress_callback(counting.clone())
            .build()
            .unwrap();
        let pipeline = ExtractionPipeline::new(model, &config);

        let output = pipeline
            .extract_pages(RasterPages::from_images(vec![image(1), image(2), image(3)]), "T")
            .await
            .unwrap();

        assert_eq!(output.stats.total_pages, 3);
        assert_eq!(output.stats.fallback_pages, 1);
        assert_eq!(output.stats.analyzed_pages, 2);
        assert_eq!(counting.started.load(Ordering::SeqCst), 3);
        assert_eq!(counting.completed.load(Ordering::SeqCst), 2);
        assert_eq!(counting.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(counting.finished_with.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn style_uses_first_page_only() {
        let model = Arc::new(
            MockVisionModel::new()
                .respond_when("right-to-left", r#"{"reading_direction":"rtl","style":"manga"}"#)
                .respond_when("(page 1)", page_json(1, "Ana"))
                .respond_when("(page 2)", page_json(2, "Ana")),
        );
        let pipeline = ExtractionPipeline::new(model.clone(), &ExtractionConfig::default());

        let output = pipeline
            .extract_pages(RasterPages::from_images(vec![image(1), image(2)]), "T")
            .await
            .unwrap();

        assert_eq!(output.metadata.reading_direction, ReadingDirection::Rtl);
        assert_eq!(output.metadata.style, Style::Manga);
        assert!(output.stats.style_classified);
        let style_calls: Vec<_> = model
            .calls()
            .into_iter()
            .filter(|c| c.prompt.contains("right-to-left"))
            .collect();
        assert_eq!(style_calls.len(), 1);
        assert_eq!(style_calls[0].image_page, Some(1));
    }

    #[tokio::test]
    async fn page_timing_excludes_style_call() {
        let model = Arc::new(
            MockVisionModel::new()
                .respond_slowly_when(
                    "right-to-left",
                    Duration::from_millis(400),
                    r#"{"reading_direction":"ltr","style":"western"}"#,
                )
                .respond_when("(page 1)", page_json(1, "Ana")),
        );
        let pipeline = ExtractionPipeline::new(model, &ExtractionConfig::default());

        let stats = pipeline
            .extract_pages(RasterPages::from_images(vec![image(1)]), "T")
            .await
            .unwrap()
            .stats;

        assert!(stats.pages_duration_ms < 400, "pages took {}ms", stats.pages_duration_ms);
        assert!(stats.total_duration_ms >= 400, "total took {}ms", stats.total_duration_ms);
    }

    #[tokio::test]
    async fn missing_file_is_fatal() {
        let pipeline =
            ExtractionPipeline::new(Arc::new(MockVisionModel::new()), &ExtractionConfig::default());
        let err = pipeline
            .extract(Path::new("/no/such/comic.pdf"), "T")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::FileNotFound { .. }));
    }
}
