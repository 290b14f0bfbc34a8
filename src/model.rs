//! Ledger records and pipeline result types.

use crate::error::{CatalogError, ErrorKind, PageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Enums ────────────────────────────────────────────────────────────────

/// Lifecycle state of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogState {
    /// Upload accepted; pipeline running.
    Processing,
    /// Pipeline finished; pages available.
    Active,
    /// A fatal step failed; see `processing_metadata.error`.
    Error,
    /// Hidden by an operator.
    Inactive,
}

/// What a stored object is to its catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    PdfOriginal,
    Page,
    Thumbnail,
}

/// State of a single stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Available,
    Processing,
    Error,
    Deleted,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CatalogError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(CatalogError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(CatalogState {
    Processing => "processing",
    Active => "active",
    Error => "error",
    Inactive => "inactive",
});

string_enum!(AssetKind {
    PdfOriginal => "pdf_original",
    Page => "page",
    Thumbnail => "thumbnail",
});

string_enum!(AssetState {
    Available => "available",
    Processing => "processing",
    Error => "error",
    Deleted => "deleted",
});

// ── Ledger records ───────────────────────────────────────────────────────

/// One uploaded PDF and its derived assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub category: String,
    pub state: CatalogState,
    pub total_pages: u32,
    pub file_size: u64,
    pub original_filename: String,
    pub version: String,
    pub tags: BTreeMap<String, String>,
    /// Timing, config snapshot, page counts, last error.
    pub processing_metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for a catalog insert; the ledger assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewCatalog {
    pub name: String,
    pub description: String,
    pub category: String,
    pub file_size: u64,
    pub original_filename: String,
    pub version: String,
    pub tags: BTreeMap<String, String>,
    pub created_by: Option<String>,
}

/// Partial update of the editable catalog fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub state: Option<CatalogState>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl CatalogUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.state.is_none()
            && self.version.is_none()
            && self.tags.is_none()
    }
}

/// One stored object belonging to a catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAsset {
    pub id: i64,
    pub catalog_id: i64,
    pub kind: AssetKind,
    pub filename: String,
    pub url: String,
    pub object_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub size_bytes: u64,
    pub mime_type: String,
    /// MD5 of the stored bytes, lowercase hex.
    pub checksum: String,
    /// Pixel dimensions, encode quality, zoom factor.
    pub metadata: serde_json::Value,
    pub state: AssetState,
    pub created_at: DateTime<Utc>,
}

/// Fields for an asset insert.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub catalog_id: i64,
    pub kind: AssetKind,
    pub filename: String,
    pub url: String,
    pub object_key: String,
    pub page_number: Option<u32>,
    pub size_bytes: u64,
    pub mime_type: String,
    pub checksum: String,
    pub metadata: serde_json::Value,
}

// ── Queries and aggregates ───────────────────────────────────────────────

/// Filters for a catalog listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogQuery {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub state: Option<CatalogState>,
    /// Matched against name and description.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

impl Default for CatalogQuery {
    fn default() -> Self {
        Self {
            category: None,
            state: None,
            search: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// One page of a catalog listing, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogListing {
    pub catalogs: Vec<Catalog>,
    /// Rows matching the filters, ignoring limit/offset.
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

/// Ledger-wide statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_catalogs: u64,
    pub processing: u64,
    pub active: u64,
    pub error: u64,
    pub inactive: u64,
    pub total_pages: u64,
    /// Sum of original upload sizes.
    pub total_original_bytes: u64,
    /// Sum of every stored asset, including pages and thumbnails.
    pub total_asset_bytes: u64,
}

/// A catalog together with its original, thumbnail, and ordered pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDetail {
    pub catalog: Catalog,
    pub original: Option<CatalogAsset>,
    pub thumbnail: Option<CatalogAsset>,
    pub pages: Vec<CatalogAsset>,
}

// ── Ingestion ────────────────────────────────────────────────────────────

/// An upload handed to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub bytes: Vec<u8>,
    /// Client-supplied name; used for display only.
    pub filename: String,
    pub description: String,
    pub category: String,
    pub user_id: Option<String>,
    /// Declared MIME type, if the transport provided one.
    pub content_type: Option<String>,
    pub version: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Pipeline step, recorded with failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStep {
    Validate,
    CreateCatalog,
    UploadOriginal,
    RasterizePages,
    Thumbnail,
    Finalize,
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestStep::Validate => "validate",
            IngestStep::CreateCatalog => "create_catalog",
            IngestStep::UploadOriginal => "upload_original",
            IngestStep::RasterizePages => "rasterize_pages",
            IngestStep::Thumbnail => "thumbnail",
            IngestStep::Finalize => "finalize",
        };
        f.write_str(s)
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub catalog_id: i64,
    pub job_id: Uuid,
    /// Page assets registered in the ledger.
    pub total_pages: u32,
    /// Pages in the source PDF.
    pub requested_pages: u32,
    /// Pages that were skipped, with the reason.
    pub skipped_pages: Vec<PageError>,
    pub elapsed_ms: u64,
    pub original_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_error: Option<String>,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.skipped_pages.is_empty() && self.total_pages == self.requested_pages
    }
}

/// Outcome of a failed ingestion.
///
/// `catalog_id` is set when the failure happened after the catalog row was
/// created; that row is left in state `error` with the failure recorded.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("ingestion failed at {step}: {error}")]
pub struct IngestFailure {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
    pub job_id: Uuid,
    pub step: IngestStep,
    pub kind: ErrorKind,
    pub error: String,
}
