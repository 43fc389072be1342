//! Error types for the comic-extract library.
//!
//! Failures fall into two families that are handled very differently:
//!
//! * [`ExtractionError`] is **fatal**: the document cannot be extracted at all
//!   (missing file, corrupt PDF, a page that will not rasterise, no provider).
//!   Returned as `Err(ExtractionError)` from the top-level `extract*`
//!   functions. No partial output accompanies it.
//!
//! * [`PageAnalysisError`] and [`StyleClassificationError`] are **local**: one
//!   model call went wrong. These never leave the library; the analyzer and
//!   classifier turn them into their deterministic fallbacks and log them.
//!
//! [`ModelError`] is the failure type of the model-invocation seam
//! ([`crate::model::VisionModel`]) and [`StorageError`] covers the blob store
//! and repository collaborators used by [`crate::storage::ComicLibrary`].

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the extraction pipeline.
#[derive(Debug, Error)]
pub enum ExtractionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// pdfium could not render a page, or the bitmap could not be encoded.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library in the working\n\
directory, or install it system-wide.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure reported by a [`crate::model::VisionModel`] invocation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    /// The provider rejected or failed the request.
    #[error("provider error: {0}")]
    Provider(String),

    /// The call did not finish within the configured timeout.
    #[error("model call timed out after {after:?}")]
    Timeout { after: Duration },

    /// The provider answered with no content.
    #[error("model returned an empty response")]
    EmptyResponse,
}

/// Why a single page could not be analysed.
///
/// Never propagated out of [`crate::pipeline::analyze::PageAnalyzer::analyze`];
/// it selects the fallback page instead.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PageAnalysisError {
    #[error("page {page}: {source}")]
    Model {
        page: usize,
        #[source]
        source: ModelError,
    },

    #[error("page {page}: response is not valid JSON: {detail}")]
    MalformedJson { page: usize, detail: String },

    /// JSON parsed but does not satisfy the page schema or its invariants.
    #[error("page {page}: response violates the page schema: {detail}")]
    Schema { page: usize, detail: String },
}

/// Why the reading-direction/style classification failed.
///
/// Never propagated; the classifier falls back to `{ltr, western}`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StyleClassificationError {
    #[error("style classification: {0}")]
    Model(#[from] ModelError),

    #[error("style classification: invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from the blob store and comic repository.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Stored record '{id}' is unreadable: {source}")]
    CorruptRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialise record: {0}")]
    Serialise(#[from] serde_json::Error),

    /// Extraction failed during an upload; nothing was stored.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}
