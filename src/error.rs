//! Error types for the pdf-catalog library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`CatalogError`]: **Fatal** for the operation that raised it: the upload
//!   is rejected, a ledger write failed, the original PDF could not be stored.
//!   Returned as `Err(CatalogError)` from repository, store, and lifecycle
//!   calls, and wrapped in [`crate::model::IngestFailure`] by the orchestrator.
//!
//! * [`PageError`]: **Non-fatal**: a single page could not be rendered,
//!   encoded, uploaded, or registered. The catalog still reaches `active`
//!   with fewer pages; the error is reported in
//!   [`crate::model::IngestReport::skipped_pages`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse failure class, as reported to callers and stored in catalog metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Persistence,
    Storage,
    Processing,
    NotFound,
    Internal,
}

/// All fatal errors returned by the pdf-catalog library.
#[derive(Debug, Error)]
pub enum CatalogError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The upload was rejected before any write happened.
    #[error("Invalid upload: {0}")]
    Validation(String),

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// A relational write or read failed.
    #[error("Ledger error: {0}")]
    Persistence(String),

    /// The requested catalog or asset does not exist.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    // ── Object store errors ───────────────────────────────────────────────
    /// An object write, delete, or listing failed.
    #[error("Storage error for '{key}': {reason}")]
    Storage { key: String, reason: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document (or a page of it) could not be rasterised.
    #[error("Processing error: {0}")]
    Processing(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set CATALOG_PDFIUM_LIB to the directory containing libpdfium, \
or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CatalogError {
    /// Build a storage error for an object key.
    pub fn storage(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Storage {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn catalog_not_found(id: i64) -> Self {
        Self::NotFound {
            entity: "Catalog",
            id,
        }
    }

    /// The taxonomy class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Validation(_) => ErrorKind::Validation,
            CatalogError::Persistence(_) => ErrorKind::Persistence,
            CatalogError::NotFound { .. } => ErrorKind::NotFound,
            CatalogError::Storage { .. } => ErrorKind::Storage,
            CatalogError::Processing(_) | CatalogError::PdfiumBindingFailed(_) => {
                ErrorKind::Processing
            }
            CatalogError::InvalidConfig(_) | CatalogError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        CatalogError::Persistence(e.to_string())
    }
}

/// A non-fatal error for a single page.
///
/// The page is skipped and ingestion continues with the next page.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PageError {
    /// Page rasterisation failed (corrupt page, unsupported content, OOM).
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// The rendered bitmap could not be encoded.
    #[error("Page {page}: image encoding failed: {detail}")]
    EncodeFailed { page: usize, detail: String },

    /// The encoded page could not be written to the object store.
    #[error("Page {page}: upload failed: {detail}")]
    UploadFailed { page: usize, detail: String },

    /// The object was stored but its ledger row could not be written.
    #[error("Page {page}: ledger registration failed: {detail}")]
    RegisterFailed { page: usize, detail: String },
}

impl PageError {
    /// 1-based page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::RenderFailed { page, .. }
            | PageError::EncodeFailed { page, .. }
            | PageError::UploadFailed { page, .. }
            | PageError::RegisterFailed { page, .. } => *page,
        }
    }
}
