//! Progress-callback trait for per-page extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to hear about
//! each page as it is analysed. Events carry counts and reasons only; the
//! extracted structure is returned once, at the end, by the pipeline.
//!
//! # Example
//!
//! ```rust
//! use comic_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FallbackCounter {
//!     fallbacks: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for FallbackCounter {
//!     fn on_page_fallback(&self, page_num: usize, _total: usize, reason: &str) {
//!         self.fallbacks.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("page {page_num} fell back: {reason}");
//!     }
//! }
//!
//! let counter = Arc::new(FallbackCounter { fallbacks: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline as it processes each page.
///
/// Implementations must be `Send + Sync`: with `concurrency > 1` the page
/// events for different pages may arrive concurrently and out of order.
/// All methods default to no-ops.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once, after the PDF has been opened and its page count is known.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the model request is sent for a page.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when the model's answer for a page was accepted.
    ///
    /// `bubble_count` is the number of bubbles across all panels of the page.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, bubble_count: usize) {
        let _ = (page_num, total_pages, bubble_count);
    }

    /// Called when a page was replaced by the fallback narration page.
    fn on_page_fallback(&self, page_num: usize, total_pages: usize, reason: &str) {
        let _ = (page_num, total_pages, reason);
    }

    /// Called once after every page has been analysed.
    fn on_extraction_complete(&self, total_pages: usize, fallback_count: usize) {
        let _ = (total_pages, fallback_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        starts: AtomicUsize,
        completes: AtomicUsize,
        fallbacks: AtomicUsize,
        bubbles: AtomicUsize,
    }

    impl ExtractionProgressCallback for TrackingCallback {
        fn on_page_start(&self, _page_num: usize, _total_pages: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_page_complete(&self, _page_num: usize, _total_pages: usize, bubble_count: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
            self.bubbles.fetch_add(bubble_count, Ordering::SeqCst);
        }

        fn on_page_fallback(&self, _page_num: usize, _total_pages: usize, _reason: &str) {
            self.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_extraction_start(5);
        cb.on_page_start(1, 5);
        cb.on_page_complete(1, 5, 7);
        cb.on_page_fallback(2, 5, "timeout");
        cb.on_extraction_complete(5, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_page_start(1, 2);
        tracker.on_page_complete(1, 2, 4);
        tracker.on_page_start(2, 2);
        tracker.on_page_fallback(2, 2, "malformed JSON");

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.fallbacks.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.bubbles.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_extraction_start(10);
        cb.on_page_start(1, 10);
    }
}
