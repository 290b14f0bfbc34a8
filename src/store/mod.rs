//! Asset Store Client: durable key/value storage for catalog objects.
//!
//! The store is authoritative for bytes; the ledger is authoritative for
//! which objects should exist. Keys are deterministic:
//!
//! ```text
//! {key_prefix}/{catalog_id}/{stored filename}
//! catalogs/42/summer-2024.pdf
//! catalogs/42/page_0001.jpg
//! catalogs/42/thumbnail.jpg
//! ```
//!
//! Because the catalog id is part of every key, two concurrent ingestions can
//! never write to the same object, even for identical filenames.

mod fs;
mod memory;

pub use fs::FilesystemAssetStore;
pub use memory::MemoryAssetStore;

use crate::error::CatalogError;
use crate::pipeline::encode::RASTER_EXTENSION;
use async_trait::async_trait;

/// Filename of the catalog thumbnail object.
pub const THUMBNAIL_FILENAME: &str = "thumbnail.jpg";

/// Content type of the original upload.
pub const PDF_MIME: &str = "application/pdf";

/// Durable blob storage addressed by object key.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Write `bytes` under `key`, replacing any previous object, and return
    /// the object's public URL.
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CatalogError>;

    /// Remove the object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), CatalogError>;

    /// Whether an object exists under `key`.
    async fn exists(&self, key: &str) -> Result<bool, CatalogError>;

    /// Every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, CatalogError>;

    /// Public URL of `key`; deterministic, no I/O.
    fn url_for(&self, key: &str) -> String;
}

/// Object key for a catalog asset.
pub fn object_key(prefix: &str, catalog_id: i64, filename: &str) -> String {
    format!("{}/{}/{}", prefix, catalog_id, filename)
}

/// Key prefix under which every object of a catalog lives (trailing slash).
pub fn catalog_prefix(prefix: &str, catalog_id: i64) -> String {
    format!("{}/{}/", prefix, catalog_id)
}

/// Stored filename of a rendered page (1-based).
pub fn page_filename(page_number: usize) -> String {
    format!("page_{:04}.{}", page_number, RASTER_EXTENSION)
}

/// Catalog id encoded in `key`, if it follows the key scheme under `prefix`.
pub fn parse_catalog_id(prefix: &str, key: &str) -> Option<i64> {
    let rest = key.strip_prefix(prefix)?.strip_prefix('/')?;
    let (id, filename) = rest.split_once('/')?;
    if filename.is_empty() {
        return None;
    }
    id.parse().ok()
}

/// Reject keys that could address something outside the store root.
pub(crate) fn check_key(key: &str) -> Result<(), CatalogError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(CatalogError::storage(key, "invalid object key"));
    }
    Ok(())
}
