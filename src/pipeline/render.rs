//! PDF rasterisation: render every page at 2× to a [`PageImage`] via pdfium.
//!
//! ## Why a blocking thread and a channel?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! safe to drive from async contexts, and a `PdfDocument` borrows the
//! `Pdfium` binding that opened it. One `spawn_blocking` thread therefore owns
//! both for the whole render and hands finished pages to the async side
//! through a bounded channel. The consumer sees [`RasterPages`], a lazy,
//! ordered, one-shot stream; rendering stays strictly sequential and at most
//! [`RASTER_BUFFER`] pages wait in memory.
//!
//! The document and the binding are dropped when the render thread's scope
//! ends, whether it finished, hit an error, or the consumer went away.

use crate::config::{ExtractionConfig, RENDER_SCALE};
use crate::error::ExtractionError;
use crate::pipeline::encode::PageImage;
use futures::Stream;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Rendered pages allowed to wait for the consumer.
pub const RASTER_BUFFER: usize = 2;

type PageResult = Result<PageImage, ExtractionError>;

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system library.
pub fn bind_pdfium() -> Result<Pdfium, ExtractionError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| ExtractionError::PdfiumBindingFailed(e.to_string()))
}

/// Opens PDFs and streams their pages as images.
#[derive(Debug, Clone, Default)]
pub struct PageRasterizer {
    password: Option<String>,
}

impl PageRasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            password: config.password.clone(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Open `pdf_path` and start rendering its pages in document order.
    ///
    /// Errors opening the document are returned here; errors rendering a page
    /// arrive as the last item of the stream.
    pub async fn rasterize(&self, pdf_path: &Path) -> Result<RasterPages, ExtractionError> {
        let path = pdf_path.to_path_buf();
        let password = self.password.clone();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (page_tx, page_rx) = mpsc::channel(RASTER_BUFFER);

        tokio::task::spawn_blocking(move || {
            render_pages_blocking(&path, password.as_deref(), opened_tx, page_tx)
        });

        let total_pages = opened_rx.await.map_err(|_| {
            ExtractionError::Internal("Render task ended before opening the PDF".into())
        })??;

        Ok(RasterPages::new(total_pages, page_rx))
    }
}

/// Blocking side of [`PageRasterizer::rasterize`].
fn render_pages_blocking(
    pdf_path: &Path,
    password: Option<&str>,
    opened: oneshot::Sender<Result<usize, ExtractionError>>,
    pages_tx: mpsc::Sender<PageResult>,
) {
    let pdfium = match bind_pdfium() {
        Ok(p) => p,
        Err(e) => {
            let _ = opened.send(Err(e));
            return;
        }
    };

    let document = match pdfium.load_pdf_from_file(pdf_path, password) {
        Ok(d) => d,
        Err(e) => {
            let _ = opened.send(Err(map_load_error(pdf_path, password, e)));
            return;
        }
    };

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("PDF loaded: {} pages", total_pages);
    if opened.send(Ok(total_pages)).is_err() {
        return;
    }

    let render_config = PdfRenderConfig::new().scale_page_by_factor(RENDER_SCALE);

    for idx in 0..total_pages {
        let page_number = idx + 1;
        let result = pages
            .get(idx as u16)
            .map_err(|e| ExtractionError::RasterisationFailed {
                page: page_number,
                detail: format!("{:?}", e),
            })
            .and_then(|page| render_page(&page, &render_config, page_number));

        let failed = result.is_err();
        if pages_tx.blocking_send(result).is_err() {
            debug!("Page consumer dropped; stopping render at page {}", page_number);
            return;
        }
        if failed {
            return;
        }
    }
}

fn render_page(
    page: &PdfPage,
    render_config: &PdfRenderConfig,
    page_number: usize,
) -> Result<PageImage, ExtractionError> {
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| ExtractionError::RasterisationFailed {
            page: page_number,
            detail: format!("{:?}", e),
        })?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_number,
        image.width(),
        image.height()
    );

    PageImage::encode(page_number, &image).map_err(|e| ExtractionError::RasterisationFailed {
        page: page_number,
        detail: format!("Image encoding failed: {}", e),
    })
}

fn map_load_error(pdf_path: &Path, password: Option<&str>, e: PdfiumError) -> ExtractionError {
    let err_str = format!("{:?}", e);
    let path: PathBuf = pdf_path.to_path_buf();
    if err_str.contains("Password") || err_str.contains("password") {
        if password.is_some() {
            ExtractionError::WrongPassword { path }
        } else {
            ExtractionError::PasswordRequired { path }
        }
    } else {
        ExtractionError::CorruptPdf {
            path,
            detail: err_str,
        }
    }
}

/// Lazy, ordered stream of rendered pages.
///
/// Yields exactly `total_pages` images, or stops after the first error. If
/// the render thread disappears early the stream reports that as an error
/// rather than ending short.
pub struct RasterPages {
    total_pages: usize,
    delivered: usize,
    finished: bool,
    pages: ReceiverStream<PageResult>,
}

impl RasterPages {
    fn new(total_pages: usize, rx: mpsc::Receiver<PageResult>) -> Self {
        Self {
            total_pages,
            delivered: 0,
            finished: false,
            pages: ReceiverStream::new(rx),
        }
    }

    /// Stream already-rendered items, e.g. from another rasteriser or a test.
    ///
    /// `total_pages` is the count the items claim to cover; if fewer `Ok`
    /// items arrive without an error, the stream ends with one.
    pub fn from_results(total_pages: usize, items: Vec<PageResult>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item.
            let _ = tx.try_send(item);
        }
        Self::new(total_pages, rx)
    }

    /// Stream a complete set of page images.
    pub fn from_images(images: Vec<PageImage>) -> Self {
        let total = images.len();
        Self::from_results(total, images.into_iter().map(Ok).collect())
    }

    /// Page count of the source document.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }
}

impl Stream for RasterPages {
    type Item = PageResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.pages).poll_next(cx) {
            Poll::Ready(Some(Ok(image))) => {
                self.delivered += 1;
                Poll::Ready(Some(Ok(image)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                if self.delivered < self.total_pages {
                    Poll::Ready(Some(Err(ExtractionError::Internal(format!(
                        "Render task stopped after {} of {} pages",
                        self.delivered, self.total_pages
                    )))))
                } else {
                    Poll::Ready(None)
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
