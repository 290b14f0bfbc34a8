//! Pipeline stages for catalog ingestion.
//!
//! Each submodule implements exactly one transformation step and does no
//! ledger or store I/O; the orchestrator in [`crate::ingest`] strings them
//! together and owns every write.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ thumbnail
//! (checks)  (pdfium)   (JPEG)    (first page)
//! ```
//!
//! 1. [`input`]: reject empty/oversized/non-PDF uploads, derive safe names
//! 2. [`render`]: rasterise pages at a fixed width; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: RGB JPEG encoding at a configured quality
//! 4. [`thumbnail`]: downscale the first rendered page

pub mod encode;
pub mod input;
pub mod render;
pub mod thumbnail;
