//! Catalog Repository: the relational ledger of catalogs and their assets.
//!
//! The ledger describes what *should* exist in the asset store. An asset row
//! is only written after its object was stored, and the catalog page count is
//! always re-derivable from [`CatalogRepository::count_assets`].

mod sqlite;

pub use sqlite::SqliteLedger;

use crate::error::CatalogError;
use crate::model::{
    AssetKind, AssetState, Catalog, CatalogAsset, CatalogDetail, CatalogListing, CatalogQuery,
    CatalogState, CatalogStats, CatalogUpdate, NewAsset, NewCatalog,
};
use chrono::{DateTime, Utc};

/// Persistence for [`Catalog`] and [`CatalogAsset`] records.
///
/// Calls are blocking and short; async callers invoke them directly.
/// Write operations return the number of affected rows so callers can tell a
/// no-op (`0`) from a failure (`Err`).
pub trait CatalogRepository: Send + Sync {
    // ── Catalogs ──────────────────────────────────────────────────────────

    /// Insert a catalog in state `processing` with zero pages.
    fn create_catalog(&self, new: &NewCatalog) -> Result<Catalog, CatalogError>;

    fn get_catalog(&self, id: i64) -> Result<Option<Catalog>, CatalogError>;

    /// Apply the fields set in `update`.
    fn update_catalog(&self, id: i64, update: &CatalogUpdate) -> Result<usize, CatalogError>;

    /// Move a catalog to `state`, merging `metadata_patch` (a JSON object)
    /// into its processing metadata when given.
    fn update_catalog_state(
        &self,
        id: i64,
        state: CatalogState,
        metadata_patch: Option<&serde_json::Value>,
    ) -> Result<usize, CatalogError>;

    /// Set page count, state and merge metadata in one write.
    fn finalize_catalog(
        &self,
        id: i64,
        total_pages: u32,
        state: CatalogState,
        metadata_patch: &serde_json::Value,
    ) -> Result<usize, CatalogError>;

    /// Overwrite the stored page count.
    fn set_total_pages(&self, id: i64, total_pages: u32) -> Result<usize, CatalogError>;

    /// Bump `updated_at` without changing anything else. Long ingestions
    /// call this per batch so they are not mistaken for stale ones.
    fn touch_catalog(&self, id: i64) -> Result<usize, CatalogError>;

    /// Delete a catalog; its asset rows go with it.
    fn delete_catalog(&self, id: i64) -> Result<usize, CatalogError>;

    /// Filtered listing, newest first, with the total matching count.
    fn list_catalogs(&self, query: &CatalogQuery) -> Result<CatalogListing, CatalogError>;

    /// Catalogs in `state` not updated since `updated_before`.
    fn list_stale_catalogs(
        &self,
        state: CatalogState,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<Catalog>, CatalogError>;

    /// Catalog with its original, thumbnail, and ordered pages.
    fn complete_catalog(&self, id: i64) -> Result<Option<CatalogDetail>, CatalogError>;

    fn stats(&self) -> Result<CatalogStats, CatalogError>;

    // ── Assets ────────────────────────────────────────────────────────────

    /// Insert an asset row in state `available`.
    ///
    /// Fails if a page with the same number is already registered.
    fn create_asset(&self, new: &NewAsset) -> Result<CatalogAsset, CatalogError>;

    fn get_asset(&self, id: i64) -> Result<Option<CatalogAsset>, CatalogError>;

    /// Every asset of a catalog: original, pages by number, thumbnail.
    fn list_assets(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError>;

    /// Page assets of a catalog ordered by page number.
    fn list_pages(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError>;

    /// Every asset in the ledger.
    fn list_all_assets(&self) -> Result<Vec<CatalogAsset>, CatalogError>;

    fn delete_asset(&self, id: i64) -> Result<usize, CatalogError>;

    fn count_assets(
        &self,
        catalog_id: i64,
        kind: AssetKind,
        state: AssetState,
    ) -> Result<u64, CatalogError>;

    // ── Health ────────────────────────────────────────────────────────────

    /// Round-trip a trivial query.
    fn ping(&self) -> Result<(), CatalogError>;
}
