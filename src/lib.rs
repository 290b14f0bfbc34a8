//! # pdf-catalog
//!
//! Ingest PDF catalogs: rasterise every page to a fixed-width JPEG, derive a
//! thumbnail, store every asset in an object store, and keep a relational
//! ledger of catalogs and assets in agreement with what was actually stored.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate   size, extension, content type, %PDF magic
//!  ├─ 2. Catalog    ledger row in state `processing`
//!  ├─ 3. Original   store the PDF, register `pdf_original`
//!  ├─ 4. Pages      render in batches via pdfium (spawn_blocking),
//!  │                store + register each page; failed pages are skipped
//!  ├─ 5. Thumbnail  downscale page 1 (non-fatal)
//!  └─ 6. Finalize   page count from the ledger, state `active`
//! ```
//!
//! Any fatal step moves the catalog to `error` with the failing step recorded
//! in its processing metadata. [`CatalogLifecycle`] deletes catalogs and
//! reconciles the store with the ledger afterwards.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_catalog::{
//!     FilesystemAssetStore, IngestRequest, Ingestor, NoopProgressCallback, PdfiumRasterizer,
//!     PipelineConfig, SqliteLedger,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let rasterizer = Arc::new(PdfiumRasterizer::new(&config));
//!     let ingestor = Ingestor::new(
//!         config,
//!         Arc::new(SqliteLedger::new("catalogs.db".as_ref())?),
//!         Arc::new(FilesystemAssetStore::new("assets", "http://localhost:8080/assets")),
//!         rasterizer,
//!     );
//!
//!     let request = IngestRequest {
//!         bytes: std::fs::read("brochure.pdf")?,
//!         filename: "brochure.pdf".into(),
//!         category: "ropa".into(),
//!         ..Default::default()
//!     };
//!     let report = ingestor
//!         .ingest(request, &NoopProgressCallback, uuid::Uuid::new_v4())
//!         .await?;
//!     println!("catalog {} has {} pages", report.catalog_id, report.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on (via `cli`) | axum HTTP API in [`server`] |
//! | `cli`    | on      | The `catalogd` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable default features when using only the library:
//! ```toml
//! pdf-catalog = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod store;
pub mod testing;

#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{CatalogError, ErrorKind, PageError};
pub use ingest::Ingestor;
pub use ledger::{CatalogRepository, SqliteLedger};
pub use lifecycle::{CatalogLifecycle, DeleteReport, OrphanReport, ReconcileOptions};
pub use model::{
    AssetKind, AssetState, Catalog, CatalogAsset, CatalogDetail, CatalogListing, CatalogQuery,
    CatalogState, CatalogStats, CatalogUpdate, IngestFailure, IngestReport, IngestRequest,
    IngestStep,
};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{
    IngestProgressCallback, IngestStage, JobProgress, NoopProgressCallback, ProgressCallback,
    ProgressTracker,
};
pub use store::{AssetStore, FilesystemAssetStore, MemoryAssetStore};
