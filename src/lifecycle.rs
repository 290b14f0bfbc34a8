//! Catalog Lifecycle Manager: deletion, re-finalization, orphan reconciliation.
//!
//! The ledger wins over the store. Deletion removes the catalog row even when
//! some objects could not be deleted; those objects become orphans, and
//! [`CatalogLifecycle::reconcile_orphans`] is the compensating sweep that
//! brings the two sides back into agreement:
//!
//! 1. catalogs stuck in `processing` past a deadline move to `error`;
//! 2. asset rows whose object is verified missing are deleted, and their
//!    catalogs' page counts re-derived;
//! 3. objects under the key prefix with no asset row are deleted, including
//!    every object of a catalog that no longer exists (failed first attempts
//!    that were retried under a new catalog id).
//!
//! Objects of catalogs still in `processing` are never treated as orphans: an
//! ingestion writes the object before its row.

use crate::error::CatalogError;
use crate::ledger::CatalogRepository;
use crate::model::{AssetKind, AssetState, CatalogState};
use crate::store::{catalog_prefix, parse_catalog_id, AssetStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Store calls in flight at once during deletes and sweeps.
const STORE_CONCURRENCY: usize = 8;

/// A store object that could not be deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDeleteError {
    pub key: String,
    pub error: String,
}

/// Outcome of a catalog deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReport {
    pub catalog_id: i64,
    /// Asset rows removed with the catalog.
    pub assets_removed: usize,
    /// Objects left behind in the store; reconciliation will retry them.
    pub store_errors: Vec<StoreDeleteError>,
}

/// Settings for one reconciliation sweep.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Report what would change without touching either side.
    pub dry_run: bool,
    /// Move catalogs still `processing` after this long to `error`.
    /// `None` skips the check.
    pub stale_after: Option<chrono::Duration>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            stale_after: Some(chrono::Duration::hours(1)),
        }
    }
}

/// An asset row whose object is missing from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingObject {
    pub asset_id: i64,
    pub catalog_id: i64,
    pub object_key: String,
}

/// What a reconciliation sweep found and repaired.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanReport {
    pub dry_run: bool,
    /// Asset rows pointing at objects that do not exist.
    pub missing_objects: Vec<MissingObject>,
    /// Store keys with no asset row.
    pub orphan_objects: Vec<String>,
    /// Catalogs moved from `processing` to `error`.
    pub stale_catalogs: Vec<i64>,
    /// Catalogs whose page count was re-derived.
    pub refinalized: Vec<i64>,
    /// Individual repairs that failed; the sweep carries on past them.
    pub errors: Vec<String>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.missing_objects.is_empty()
            && self.orphan_objects.is_empty()
            && self.stale_catalogs.is_empty()
    }
}

/// Keeps the asset store and the ledger in agreement.
#[derive(Clone)]
pub struct CatalogLifecycle {
    repo: Arc<dyn CatalogRepository>,
    store: Arc<dyn AssetStore>,
    key_prefix: String,
}

impl CatalogLifecycle {
    pub fn new(
        repo: Arc<dyn CatalogRepository>,
        store: Arc<dyn AssetStore>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo,
            store,
            key_prefix: key_prefix.into(),
        }
    }

    /// Delete a catalog, its asset rows, and every object under its prefix.
    ///
    /// Store failures are collected, not fatal: the catalog row is deleted
    /// regardless and the report lists what was left behind.
    pub async fn delete_catalog(&self, catalog_id: i64) -> Result<DeleteReport, CatalogError> {
        if self.repo.get_catalog(catalog_id)?.is_none() {
            return Err(CatalogError::catalog_not_found(catalog_id));
        }
        let assets = self.repo.list_assets(catalog_id)?;

        let mut store_errors = Vec::new();
        let mut keys: BTreeSet<String> = assets.iter().map(|a| a.object_key.clone()).collect();
        let prefix = catalog_prefix(&self.key_prefix, catalog_id);
        match self.store.list(&prefix).await {
            Ok(listed) => keys.extend(listed),
            Err(e) => store_errors.push(StoreDeleteError {
                key: prefix,
                error: e.to_string(),
            }),
        }

        store_errors.extend(self.delete_objects(keys.into_iter().collect()).await);

        let removed = self.repo.delete_catalog(catalog_id)?;
        if removed == 0 {
            return Err(CatalogError::catalog_not_found(catalog_id));
        }

        if store_errors.is_empty() {
            info!("Catalog {} deleted with {} assets", catalog_id, assets.len());
        } else {
            warn!(
                "Catalog {} deleted; {} store objects could not be removed",
                catalog_id,
                store_errors.len()
            );
        }

        Ok(DeleteReport {
            catalog_id,
            assets_removed: assets.len(),
            store_errors,
        })
    }

    /// Recompute a catalog's page count from its registered page rows.
    pub fn refinalize(&self, catalog_id: i64) -> Result<u32, CatalogError> {
        let count =
            self.repo
                .count_assets(catalog_id, AssetKind::Page, AssetState::Available)? as u32;
        if self.repo.set_total_pages(catalog_id, count)? == 0 {
            return Err(CatalogError::catalog_not_found(catalog_id));
        }
        debug!("Catalog {} re-finalized with {} pages", catalog_id, count);
        Ok(count)
    }

    /// Find and repair disagreements between the store and the ledger.
    pub async fn reconcile_orphans(
        &self,
        options: &ReconcileOptions,
    ) -> Result<OrphanReport, CatalogError> {
        let mut report = OrphanReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        if let Some(stale_after) = options.stale_after {
            self.fail_stale(stale_after, options.dry_run, &mut report)?;
        }
        self.sweep_missing_objects(options.dry_run, &mut report).await?;
        self.sweep_orphan_objects(options.dry_run, &mut report).await?;

        info!(
            "Reconciliation{}: {} missing objects, {} orphan objects, {} stale catalogs, {} errors",
            if options.dry_run { " (dry run)" } else { "" },
            report.missing_objects.len(),
            report.orphan_objects.len(),
            report.stale_catalogs.len(),
            report.errors.len()
        );
        Ok(report)
    }

    fn fail_stale(
        &self,
        stale_after: chrono::Duration,
        dry_run: bool,
        report: &mut OrphanReport,
    ) -> Result<(), CatalogError> {
        let cutoff = Utc::now() - stale_after;
        for catalog in self
            .repo
            .list_stale_catalogs(CatalogState::Processing, cutoff)?
        {
            report.stale_catalogs.push(catalog.id);
            if dry_run {
                continue;
            }
            let patch = json!({
                "failed_step": "stale_processing",
                "error": format!(
                    "still processing after {} minutes",
                    stale_after.num_minutes()
                ),
                "failed_at": Utc::now(),
            });
            if let Err(e) = self
                .repo
                .update_catalog_state(catalog.id, CatalogState::Error, Some(&patch))
            {
                report
                    .errors
                    .push(format!("catalog {}: could not mark stale: {}", catalog.id, e));
            } else {
                warn!("Catalog {} was stuck in processing; moved to error", catalog.id);
            }
        }
        Ok(())
    }

    async fn sweep_missing_objects(
        &self,
        dry_run: bool,
        report: &mut OrphanReport,
    ) -> Result<(), CatalogError> {
        let assets = self.repo.list_all_assets()?;
        let store = &self.store;

        let checks: Vec<_> = stream::iter(assets)
            .map(|asset| async move {
                let exists = store.exists(&asset.object_key).await;
                (asset, exists)
            })
            .buffer_unordered(STORE_CONCURRENCY)
            .collect()
            .await;

        let mut affected = BTreeSet::new();
        for (asset, exists) in checks {
            match exists {
                Ok(true) => {}
                Ok(false) => {
                    report.missing_objects.push(MissingObject {
                        asset_id: asset.id,
                        catalog_id: asset.catalog_id,
                        object_key: asset.object_key.clone(),
                    });
                    if dry_run {
                        continue;
                    }
                    match self.repo.delete_asset(asset.id) {
                        Ok(_) => {
                            affected.insert(asset.catalog_id);
                        }
                        Err(e) => report
                            .errors
                            .push(format!("asset {}: could not delete row: {}", asset.id, e)),
                    }
                }
                Err(e) => report.errors.push(e.to_string()),
            }
        }
        report.missing_objects.sort_by_key(|m| m.asset_id);

        for catalog_id in affected {
            match self.refinalize(catalog_id) {
                Ok(_) => report.refinalized.push(catalog_id),
                Err(e) => report
                    .errors
                    .push(format!("catalog {}: could not re-finalize: {}", catalog_id, e)),
            }
        }
        Ok(())
    }

    async fn sweep_orphan_objects(
        &self,
        dry_run: bool,
        report: &mut OrphanReport,
    ) -> Result<(), CatalogError> {
        // Order matters: store keys, then catalog states, then asset rows.
        // A catalog seen as `processing` is skipped; any catalog that left
        // `processing` before its state was read had registered every asset
        // row by then, so the later row read sees them as known.
        let keys = self.store.list(&format!("{}/", self.key_prefix)).await?;

        let mut states: HashMap<i64, Option<CatalogState>> = HashMap::new();
        for catalog_id in keys
            .iter()
            .filter_map(|key| parse_catalog_id(&self.key_prefix, key))
        {
            if !states.contains_key(&catalog_id) {
                let state = self.repo.get_catalog(catalog_id)?.map(|c| c.state);
                states.insert(catalog_id, state);
            }
        }

        let known: HashSet<String> = self
            .repo
            .list_all_assets()?
            .into_iter()
            .map(|a| a.object_key)
            .collect();

        let mut orphans = Vec::new();
        for key in keys {
            if known.contains(&key) {
                continue;
            }
            if let Some(catalog_id) = parse_catalog_id(&self.key_prefix, &key) {
                if states.get(&catalog_id).copied().flatten() == Some(CatalogState::Processing) {
                    debug!("Leaving {} alone: catalog {} is still processing", key, catalog_id);
                    continue;
                }
            }
            orphans.push(key);
        }

        if !dry_run {
            for failed in self.delete_objects(orphans.clone()).await {
                report
                    .errors
                    .push(format!("{}: could not delete: {}", failed.key, failed.error));
            }
        }
        report.orphan_objects = orphans;
        Ok(())
    }

    async fn delete_objects(&self, keys: Vec<String>) -> Vec<StoreDeleteError> {
        let store = &self.store;
        let mut errors: Vec<StoreDeleteError> = stream::iter(keys)
            .map(|key| async move {
                store
                    .delete(&key)
                    .await
                    .map_err(|e| StoreDeleteError {
                        key,
                        error: e.to_string(),
                    })
            })
            .buffer_unordered(STORE_CONCURRENCY)
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;
        for e in &errors {
            warn!("Store delete failed for {}: {}", e.key, e.error);
        }
        errors.sort_by(|a, b| a.key.cmp(&b.key));
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SqliteLedger;
    use crate::model::{
        Catalog, CatalogAsset, CatalogDetail, CatalogListing, CatalogQuery, CatalogStats,
        CatalogUpdate, NewAsset, NewCatalog,
    };
    use crate::store::{object_key, page_filename, MemoryAssetStore};
    use crate::testing::FlakyStore;

    const PREFIX: &str = "catalogs";

    struct Fixture {
        repo: Arc<SqliteLedger>,
        store: Arc<MemoryAssetStore>,
        lifecycle: CatalogLifecycle,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(SqliteLedger::in_memory().unwrap());
        let store = Arc::new(MemoryAssetStore::default());
        let lifecycle = CatalogLifecycle::new(repo.clone(), store.clone(), PREFIX);
        Fixture {
            repo,
            store,
            lifecycle,
        }
    }

    /// An active catalog with `pages` stored and registered pages.
    async fn seed(f: &Fixture, pages: u32) -> i64 {
        let catalog = f
            .repo
            .create_catalog(&NewCatalog {
                name: "seed".into(),
                original_filename: "seed.pdf".into(),
                version: "1.0.0".into(),
                ..Default::default()
            })
            .unwrap();
        for p in 1..=pages {
            let filename = page_filename(p as usize);
            let key = object_key(PREFIX, catalog.id, &filename);
            let url = f.store.put(&key, b"jpeg", "image/jpeg").await.unwrap();
            f.repo
                .create_asset(&NewAsset {
                    catalog_id: catalog.id,
                    kind: AssetKind::Page,
                    filename,
                    url,
                    object_key: key,
                    page_number: Some(p),
                    size_bytes: 4,
                    mime_type: "image/jpeg".into(),
                    checksum: "x".into(),
                    metadata: json!({}),
                })
                .unwrap();
        }
        f.repo
            .finalize_catalog(catalog.id, pages, CatalogState::Active, &json!({}))
            .unwrap();
        catalog.id
    }

    #[tokio::test]
    async fn delete_removes_rows_and_objects() {
        let f = fixture();
        let id = seed(&f, 3).await;
        let stray = object_key(PREFIX, id, "stray.jpg");
        f.store.put(&stray, b"x", "image/jpeg").await.unwrap();

        let report = f.lifecycle.delete_catalog(id).await.unwrap();
        assert_eq!(report.assets_removed, 3);
        assert!(report.store_errors.is_empty());
        assert!(f.store.is_empty());
        assert!(f.repo.get_catalog(id).unwrap().is_none());
        assert!(f.repo.list_assets(id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_catalog_is_not_found() {
        let f = fixture();
        let err = f.lifecycle.delete_catalog(404).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_reports_store_failures_but_removes_ledger_rows() {
        let f = fixture();
        let id = seed(&f, 3).await;
        let flaky = Arc::new(FlakyStore::new());
        flaky.fail_deletes_matching("page_0002");
        for key in f.store.keys() {
            flaky.put(&key, b"jpeg", "image/jpeg").await.unwrap();
        }
        let lifecycle = CatalogLifecycle::new(f.repo.clone(), flaky.clone(), PREFIX);

        let report = lifecycle.delete_catalog(id).await.unwrap();
        assert_eq!(report.assets_removed, 3);
        assert_eq!(report.store_errors.len(), 1);
        assert!(report.store_errors[0].key.ends_with("page_0002.jpg"));
        assert!(f.repo.get_catalog(id).unwrap().is_none());
        assert_eq!(flaky.inner().len(), 1);
    }

    #[tokio::test]
    async fn refinalize_rederives_page_count() {
        let f = fixture();
        let id = seed(&f, 4).await;
        f.repo.set_total_pages(id, 0).unwrap();
        assert_eq!(f.lifecycle.refinalize(id).unwrap(), 4);
        assert_eq!(f.repo.get_catalog(id).unwrap().unwrap().total_pages, 4);
        assert!(f.lifecycle.refinalize(id + 1).is_err());
    }

    #[tokio::test]
    async fn reconcile_removes_rows_for_missing_objects() {
        let f = fixture();
        let id = seed(&f, 3).await;
        f.store
            .delete(&object_key(PREFIX, id, &page_filename(2)))
            .await
            .unwrap();

        let report = f
            .lifecycle
            .reconcile_orphans(&ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(report.missing_objects.len(), 1);
        assert_eq!(report.refinalized, vec![id]);
        let catalog = f.repo.get_catalog(id).unwrap().unwrap();
        assert_eq!(catalog.total_pages, 2);
        assert_eq!(f.repo.list_pages(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reconcile_deletes_objects_of_vanished_catalogs() {
        let f = fixture();
        let kept = seed(&f, 1).await;
        let orphan = object_key(PREFIX, 999, "page_0001.jpg");
        f.store.put(&orphan, b"x", "image/jpeg").await.unwrap();
        let unregistered = object_key(PREFIX, kept, "page_0009.jpg");
        f.store.put(&unregistered, b"x", "image/jpeg").await.unwrap();

        let report = f
            .lifecycle
            .reconcile_orphans(&ReconcileOptions::default())
            .await
            .unwrap();
        assert_eq!(report.orphan_objects.len(), 2);
        assert!(!f.store.exists(&orphan).await.unwrap());
        assert!(!f.store.exists(&unregistered).await.unwrap());
        assert!(f
            .store
            .exists(&object_key(PREFIX, kept, &page_filename(1)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reconcile_leaves_processing_catalogs_alone() {
        let f = fixture();
        let c = f
            .repo
            .create_catalog(&NewCatalog {
                name: "busy".into(),
                original_filename: "busy.pdf".into(),
                version: "1.0.0".into(),
                ..Default::default()
            })
            .unwrap();
        let key = object_key(PREFIX, c.id, "busy.pdf");
        f.store.put(&key, b"%PDF", "application/pdf").await.unwrap();

        let report = f
            .lifecycle
            .reconcile_orphans(&ReconcileOptions::default())
            .await
            .unwrap();
        assert!(report.orphan_objects.is_empty());
        assert!(report.stale_catalogs.is_empty());
        assert!(f.store.exists(&key).await.unwrap());
    }

    /// Ledger that registers page 1 of `catalog_id` and finalizes the catalog
    /// right after the orphan sweep reads the asset rows, the way a
    /// concurrent ingestion finishing mid-sweep would.
    struct FinishesDuringSweep {
        inner: SqliteLedger,
        catalog_id: i64,
        asset_reads: std::sync::atomic::AtomicUsize,
    }

    impl FinishesDuringSweep {
        fn finish_ingestion(&self) {
            let filename = page_filename(1);
            self.inner
                .create_asset(&NewAsset {
                    catalog_id: self.catalog_id,
                    kind: AssetKind::Page,
                    object_key: object_key(PREFIX, self.catalog_id, &filename),
                    url: format!("mem://{}", filename),
                    filename,
                    page_number: Some(1),
                    size_bytes: 4,
                    mime_type: "image/jpeg".into(),
                    checksum: "x".into(),
                    metadata: json!({}),
                })
                .unwrap();
            self.inner
                .finalize_catalog(self.catalog_id, 1, CatalogState::Active, &json!({}))
                .unwrap();
        }
    }

    impl CatalogRepository for FinishesDuringSweep {
        fn create_catalog(&self, new: &NewCatalog) -> Result<Catalog, CatalogError> {
            self.inner.create_catalog(new)
        }
        fn get_catalog(&self, id: i64) -> Result<Option<Catalog>, CatalogError> {
            self.inner.get_catalog(id)
        }
        fn update_catalog(&self, id: i64, update: &CatalogUpdate) -> Result<usize, CatalogError> {
            self.inner.update_catalog(id, update)
        }
        fn update_catalog_state(
            &self,
            id: i64,
            state: CatalogState,
            metadata_patch: Option<&serde_json::Value>,
        ) -> Result<usize, CatalogError> {
            self.inner.update_catalog_state(id, state, metadata_patch)
        }
        fn finalize_catalog(
            &self,
            id: i64,
            total_pages: u32,
            state: CatalogState,
            metadata_patch: &serde_json::Value,
        ) -> Result<usize, CatalogError> {
            self.inner
                .finalize_catalog(id, total_pages, state, metadata_patch)
        }
        fn set_total_pages(&self, id: i64, total_pages: u32) -> Result<usize, CatalogError> {
            self.inner.set_total_pages(id, total_pages)
        }
        fn touch_catalog(&self, id: i64) -> Result<usize, CatalogError> {
            self.inner.touch_catalog(id)
        }
        fn delete_catalog(&self, id: i64) -> Result<usize, CatalogError> {
            self.inner.delete_catalog(id)
        }
        fn list_catalogs(&self, query: &CatalogQuery) -> Result<CatalogListing, CatalogError> {
            self.inner.list_catalogs(query)
        }
        fn list_stale_catalogs(
            &self,
            state: CatalogState,
            updated_before: chrono::DateTime<Utc>,
        ) -> Result<Vec<Catalog>, CatalogError> {
            self.inner.list_stale_catalogs(state, updated_before)
        }
        fn complete_catalog(&self, id: i64) -> Result<Option<CatalogDetail>, CatalogError> {
            self.inner.complete_catalog(id)
        }
        fn stats(&self) -> Result<CatalogStats, CatalogError> {
            self.inner.stats()
        }
        fn create_asset(&self, new: &NewAsset) -> Result<CatalogAsset, CatalogError> {
            self.inner.create_asset(new)
        }
        fn get_asset(&self, id: i64) -> Result<Option<CatalogAsset>, CatalogError> {
            self.inner.get_asset(id)
        }
        fn list_assets(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError> {
            self.inner.list_assets(catalog_id)
        }
        fn list_pages(&self, catalog_id: i64) -> Result<Vec<CatalogAsset>, CatalogError> {
            self.inner.list_pages(catalog_id)
        }
        fn list_all_assets(&self) -> Result<Vec<CatalogAsset>, CatalogError> {
            let rows = self.inner.list_all_assets()?;
            // First read belongs to the missing-object sweep, second to the orphan sweep.
            let reads = self
                .asset_reads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if reads == 1 {
                self.finish_ingestion();
            }
            Ok(rows)
        }
        fn delete_asset(&self, id: i64) -> Result<usize, CatalogError> {
            self.inner.delete_asset(id)
        }
        fn count_assets(
            &self,
            catalog_id: i64,
            kind: AssetKind,
            state: AssetState,
        ) -> Result<u64, CatalogError> {
            self.inner.count_assets(catalog_id, kind, state)
        }
        fn ping(&self) -> Result<(), CatalogError> {
            self.inner.ping()
        }
    }

    #[tokio::test]
    async fn reconcile_keeps_page_of_ingestion_finishing_mid_sweep() {
        let inner = SqliteLedger::in_memory().unwrap();
        let catalog = inner
            .create_catalog(&NewCatalog {
                name: "racing".into(),
                original_filename: "racing.pdf".into(),
                version: "1.0.0".into(),
                ..Default::default()
            })
            .unwrap();
        let repo = Arc::new(FinishesDuringSweep {
            inner,
            catalog_id: catalog.id,
            asset_reads: Default::default(),
        });
        let store = Arc::new(MemoryAssetStore::default());
        let key = object_key(PREFIX, catalog.id, &page_filename(1));
        store.put(&key, b"jpeg", "image/jpeg").await.unwrap();
        let lifecycle = CatalogLifecycle::new(repo.clone(), store.clone(), PREFIX);

        let report = lifecycle
            .reconcile_orphans(&ReconcileOptions::default())
            .await
            .unwrap();

        assert!(report.orphan_objects.is_empty(), "{:?}", report.orphan_objects);
        assert!(store.exists(&key).await.unwrap());
        let catalog = repo.get_catalog(catalog.id).unwrap().unwrap();
        assert_eq!(catalog.state, CatalogState::Active);
        assert_eq!(repo.list_pages(catalog.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_processing_catalogs_move_to_error() {
        let f = fixture();
        let c = f
            .repo
            .create_catalog(&NewCatalog {
                name: "stuck".into(),
                original_filename: "stuck.pdf".into(),
                version: "1.0.0".into(),
                ..Default::default()
            })
            .unwrap();
        let options = ReconcileOptions {
            dry_run: false,
            stale_after: Some(chrono::Duration::seconds(-60)),
        };
        let report = f.lifecycle.reconcile_orphans(&options).await.unwrap();
        assert_eq!(report.stale_catalogs, vec![c.id]);
        let c = f.repo.get_catalog(c.id).unwrap().unwrap();
        assert_eq!(c.state, CatalogState::Error);
        assert_eq!(c.processing_metadata["failed_step"], "stale_processing");
    }

    #[tokio::test]
    async fn dry_run_changes_nothing() {
        let f = fixture();
        let id = seed(&f, 2).await;
        f.store
            .delete(&object_key(PREFIX, id, &page_filename(1)))
            .await
            .unwrap();
        let orphan = object_key(PREFIX, 777, "thumbnail.jpg");
        f.store.put(&orphan, b"x", "image/jpeg").await.unwrap();

        let options = ReconcileOptions {
            dry_run: true,
            stale_after: None,
        };
        let report = f.lifecycle.reconcile_orphans(&options).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.missing_objects.len(), 1);
        assert_eq!(report.orphan_objects, vec![orphan.clone()]);
        assert!(report.refinalized.is_empty());
        assert!(f.store.exists(&orphan).await.unwrap());
        assert_eq!(f.repo.list_pages(id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clean_store_reports_clean() {
        let f = fixture();
        seed(&f, 2).await;
        let report = f
            .lifecycle
            .reconcile_orphans(&ReconcileOptions::default())
            .await
            .unwrap();
        assert!(report.is_clean());
        assert!(report.errors.is_empty());
    }
}
