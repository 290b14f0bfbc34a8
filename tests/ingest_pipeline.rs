//! Pipeline scenarios against an in-memory ledger, a fault-injecting store
//! and a fake rasterizer. No pdfium library is needed.

use pdf_catalog::pipeline::input::checksum;
use pdf_catalog::testing::{sample_pdf, FakeRasterizer, FlakyStore};
use pdf_catalog::{
    AssetKind, AssetState, AssetStore, CatalogLifecycle, CatalogQuery, CatalogRepository,
    CatalogState, ErrorKind, IngestFailure, IngestReport, IngestRequest, IngestStage, IngestStep,
    Ingestor, NoopProgressCallback, PageError, PipelineConfig, ProgressTracker, ReconcileOptions,
    SqliteLedger,
};
use std::sync::Arc;
use uuid::Uuid;

// ── Test helpers ─────────────────────────────────────────────────────────────

struct Harness {
    ingestor: Ingestor,
    repo: Arc<SqliteLedger>,
    store: Arc<FlakyStore>,
    rasterizer: Arc<FakeRasterizer>,
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig::builder()
        .target_width_px(400)
        .thumbnail_width_px(100)
        .batch_size(batch_size)
        .max_upload_bytes(1024 * 1024)
        .build()
        .unwrap()
}

fn harness_with(rasterizer: FakeRasterizer, batch_size: usize) -> Harness {
    let repo = Arc::new(SqliteLedger::in_memory().unwrap());
    let store = Arc::new(FlakyStore::new());
    let rasterizer = Arc::new(rasterizer.with_target_width(400));
    let ingestor = Ingestor::new(
        config(batch_size),
        repo.clone(),
        store.clone(),
        rasterizer.clone(),
    );
    Harness {
        ingestor,
        repo,
        store,
        rasterizer,
    }
}

fn harness(rasterizer: FakeRasterizer) -> Harness {
    harness_with(rasterizer, 5)
}

fn upload(name: &str, pages: usize) -> IngestRequest {
    IngestRequest {
        bytes: sample_pdf(pages),
        filename: name.to_string(),
        description: "Spring collection".into(),
        category: "ropa".into(),
        user_id: Some("u-17".into()),
        content_type: Some("application/pdf".into()),
        ..Default::default()
    }
}

impl Harness {
    async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, IngestFailure> {
        self.ingestor
            .ingest(request, &NoopProgressCallback, Uuid::new_v4())
            .await
    }

    fn page_numbers(&self, catalog_id: i64) -> Vec<u32> {
        self.repo
            .list_pages(catalog_id)
            .unwrap()
            .into_iter()
            .filter_map(|a| a.page_number)
            .collect()
    }

    fn lifecycle(&self) -> CatalogLifecycle {
        CatalogLifecycle::new(self.repo.clone(), self.store.clone(), "catalogs")
    }
}

// ── Success paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn three_page_pdf_becomes_active_catalog() {
    let h = harness(FakeRasterizer::new(3));
    let report = h.ingest(upload("Catálogo Primavera.pdf", 3)).await.unwrap();

    assert_eq!(report.total_pages, 3);
    assert_eq!(report.requested_pages, 3);
    assert!(report.is_complete());
    assert!(report.thumbnail_url.is_some());

    let catalog = h.repo.get_catalog(report.catalog_id).unwrap().unwrap();
    assert_eq!(catalog.state, CatalogState::Active);
    assert_eq!(catalog.total_pages, 3);
    assert_eq!(catalog.name, "Catálogo Primavera");
    assert_eq!(catalog.category, "ropa");
    assert_eq!(catalog.version, "1.0.0");
    assert_eq!(catalog.created_by.as_deref(), Some("u-17"));

    let meta = &catalog.processing_metadata;
    assert_eq!(meta["requested_pages"], 3);
    assert_eq!(meta["generated_pages"], 3);
    assert_eq!(meta["config"]["target_width_px"], 400);
    assert_eq!(meta["submitted_by"], "u-17");
    assert!(meta["elapsed_ms"].is_u64());

    let detail = h.repo.complete_catalog(report.catalog_id).unwrap().unwrap();
    assert!(detail.original.is_some());
    assert!(detail.thumbnail.is_some());
    assert_eq!(detail.pages.len(), 3);

    // original + 3 pages + thumbnail
    assert_eq!(h.store.inner().len(), 5);
}

#[tokio::test]
async fn object_keys_follow_the_catalog_prefix() {
    let h = harness(FakeRasterizer::new(2));
    let report = h
        .ingest(upload("../../etc/Lookbook 2024.PDF", 2))
        .await
        .unwrap();
    let id = report.catalog_id;

    let mut keys: Vec<String> = h
        .repo
        .list_assets(id)
        .unwrap()
        .into_iter()
        .map(|a| a.object_key)
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            format!("catalogs/{id}/Lookbook-2024.pdf"),
            format!("catalogs/{id}/page_0001.jpg"),
            format!("catalogs/{id}/page_0002.jpg"),
            format!("catalogs/{id}/thumbnail.jpg"),
        ]
    );
}

#[tokio::test]
async fn every_asset_checksum_matches_stored_bytes() {
    let h = harness(FakeRasterizer::new(4));
    let report = h.ingest(upload("a.pdf", 4)).await.unwrap();

    for asset in h.repo.list_assets(report.catalog_id).unwrap() {
        let stored = h.store.inner().get(&asset.object_key).unwrap();
        assert_eq!(asset.checksum, checksum(&stored), "{}", asset.object_key);
        assert_eq!(asset.size_bytes, stored.len() as u64);
        assert_eq!(asset.state, AssetState::Available);
    }
}

#[tokio::test]
async fn pages_render_at_the_configured_width() {
    let h = harness(FakeRasterizer::new(2));
    let report = h.ingest(upload("w.pdf", 2)).await.unwrap();
    for page in h.repo.list_pages(report.catalog_id).unwrap() {
        assert_eq!(page.metadata["width"], 400);
        assert_eq!(page.mime_type, "image/jpeg");
    }
}

#[tokio::test]
async fn pages_are_rendered_in_bounded_batches() {
    let h = harness_with(FakeRasterizer::new(12), 5);
    let report = h.ingest(upload("big.pdf", 12)).await.unwrap();

    assert_eq!(
        h.rasterizer.batches(),
        vec![vec![1, 2, 3, 4, 5], vec![6, 7, 8, 9, 10], vec![11, 12]]
    );
    let catalog = h.repo.get_catalog(report.catalog_id).unwrap().unwrap();
    assert_eq!(catalog.processing_metadata["batches"], 3);
    assert_eq!(catalog.total_pages, 12);
}

// ── Partial success ──────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_page_leaves_a_gap_and_is_reported() {
    let h = harness(FakeRasterizer::new(3).with_failing_pages([2]));
    let report = h.ingest(upload("gap.pdf", 3)).await.unwrap();

    assert_eq!(report.total_pages, 2);
    assert_eq!(report.requested_pages, 3);
    assert!(!report.is_complete());
    assert_eq!(report.skipped_pages.len(), 1);
    assert!(matches!(
        report.skipped_pages[0],
        PageError::RenderFailed { page: 2, .. }
    ));

    let catalog = h.repo.get_catalog(report.catalog_id).unwrap().unwrap();
    assert_eq!(catalog.state, CatalogState::Active);
    assert_eq!(catalog.total_pages, 2);
    assert_eq!(h.page_numbers(report.catalog_id), vec![1, 3]);
    assert_eq!(
        catalog.processing_metadata["skipped_pages"][0]["reason"],
        "render_failed"
    );
}

#[tokio::test]
async fn page_upload_failure_skips_only_that_page() {
    let h = harness(FakeRasterizer::new(3));
    h.store.fail_puts_matching("page_0002");
    let report = h.ingest(upload("u.pdf", 3)).await.unwrap();

    assert_eq!(report.total_pages, 2);
    assert!(matches!(
        report.skipped_pages[0],
        PageError::UploadFailed { page: 2, .. }
    ));
    assert_eq!(h.page_numbers(report.catalog_id), vec![1, 3]);
}

#[tokio::test]
async fn thumbnail_comes_from_first_successful_page() {
    let h = harness(FakeRasterizer::new(3).with_failing_pages([1]));
    let report = h.ingest(upload("t.pdf", 3)).await.unwrap();

    let detail = h.repo.complete_catalog(report.catalog_id).unwrap().unwrap();
    let thumb = detail.thumbnail.unwrap();
    assert_eq!(thumb.metadata["source_page"], 2);
    assert_eq!(thumb.metadata["width"], 100);
}

#[tokio::test]
async fn thumbnail_failure_is_not_fatal() {
    let h = harness(FakeRasterizer::new(2));
    h.store.fail_puts_matching("thumbnail");
    let report = h.ingest(upload("nothumb.pdf", 2)).await.unwrap();

    assert!(report.thumbnail_url.is_none());
    assert!(report.thumbnail_error.is_some());

    let catalog = h.repo.get_catalog(report.catalog_id).unwrap().unwrap();
    assert_eq!(catalog.state, CatalogState::Active);
    assert!(catalog.processing_metadata["thumbnail_error"].is_string());
    let detail = h.repo.complete_catalog(report.catalog_id).unwrap().unwrap();
    assert!(detail.thumbnail.is_none());
}

// ── Fatal failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_store_leaves_error_catalog_without_assets() {
    let h = harness(FakeRasterizer::new(3));
    h.store.set_unreachable(true);
    let failure = h.ingest(upload("down.pdf", 3)).await.unwrap_err();

    assert_eq!(failure.step, IngestStep::UploadOriginal);
    assert_eq!(failure.kind, ErrorKind::Storage);
    let id = failure.catalog_id.unwrap();

    let catalog = h.repo.get_catalog(id).unwrap().unwrap();
    assert_eq!(catalog.state, CatalogState::Error);
    assert_eq!(catalog.processing_metadata["failed_step"], "upload_original");
    assert!(catalog.processing_metadata["error"].is_string());
    assert!(catalog.processing_metadata["failed_at"].is_string());
    assert!(h.repo.list_assets(id).unwrap().is_empty());
    assert!(h.rasterizer.batches().is_empty());
}

#[tokio::test]
async fn empty_upload_is_rejected_before_any_write() {
    let h = harness(FakeRasterizer::new(1));
    let request = IngestRequest {
        bytes: Vec::new(),
        ..upload("empty.pdf", 1)
    };
    let failure = h.ingest(request).await.unwrap_err();

    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(failure.step, IngestStep::Validate);
    assert!(failure.catalog_id.is_none());
    assert_eq!(h.repo.stats().unwrap().total_catalogs, 0);
    assert!(h.store.inner().is_empty());
}

#[tokio::test]
async fn non_pdf_bytes_are_rejected() {
    let h = harness(FakeRasterizer::new(1));
    let request = IngestRequest {
        bytes: b"PK\x03\x04 not a pdf".to_vec(),
        ..upload("sneaky.pdf", 1)
    };
    let failure = h.ingest(request).await.unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert_eq!(h.repo.stats().unwrap().total_catalogs, 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = harness(FakeRasterizer::new(1));
    let mut bytes = sample_pdf(1);
    bytes.resize(1024 * 1024 + 1, b' ');
    let request = IngestRequest {
        bytes,
        ..upload("huge.pdf", 1)
    };
    let failure = h.ingest(request).await.unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert!(failure.catalog_id.is_none());
}

#[tokio::test]
async fn unreadable_pdf_moves_catalog_to_error() {
    let h = harness(FakeRasterizer::new(3).with_open_error("trailer not found"));
    let failure = h.ingest(upload("broken.pdf", 3)).await.unwrap_err();

    assert_eq!(failure.step, IngestStep::RasterizePages);
    assert_eq!(failure.kind, ErrorKind::Processing);
    let id = failure.catalog_id.unwrap();
    let catalog = h.repo.get_catalog(id).unwrap().unwrap();
    assert_eq!(catalog.state, CatalogState::Error);
    assert_eq!(catalog.processing_metadata["failed_step"], "rasterize_pages");

    // The original was stored before rasterising started.
    let assets = h.repo.list_assets(id).unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].kind, AssetKind::PdfOriginal);
}

#[tokio::test]
async fn zero_page_pdf_is_an_error() {
    let h = harness(FakeRasterizer::new(0));
    let failure = h.ingest(upload("blank.pdf", 0)).await.unwrap_err();
    assert_eq!(failure.step, IngestStep::RasterizePages);
    let catalog = h
        .repo
        .get_catalog(failure.catalog_id.unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(catalog.state, CatalogState::Error);
}

#[tokio::test]
async fn no_page_stored_is_an_error() {
    let h = harness(FakeRasterizer::new(2).with_failing_pages([1, 2]));
    let failure = h.ingest(upload("dead.pdf", 2)).await.unwrap_err();
    assert_eq!(failure.step, IngestStep::RasterizePages);
    let id = failure.catalog_id.unwrap();
    assert_eq!(
        h.repo.get_catalog(id).unwrap().unwrap().state,
        CatalogState::Error
    );
    assert_eq!(
        h.repo
            .count_assets(id, AssetKind::Page, AssetState::Available)
            .unwrap(),
        0
    );
}

// ── Progress ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_tracker_follows_the_job() {
    let h = harness_with(FakeRasterizer::new(4).with_failing_pages([3]), 2);
    let tracker = ProgressTracker::new();
    let job = tracker.start_job("p.pdf");

    let report = h
        .ingestor
        .ingest(upload("p.pdf", 4), &job, job.job_id())
        .await
        .unwrap();
    assert_eq!(report.job_id, job.job_id());

    let progress = tracker.get(job.job_id()).unwrap();
    assert_eq!(progress.stage, IngestStage::Completed);
    assert_eq!(progress.catalog_id, Some(report.catalog_id));
    assert_eq!(progress.total_pages, 4);
    assert_eq!(progress.total_batches, 2);
    assert_eq!(progress.pages_done, 3);
    assert_eq!(progress.pages_failed, 1);
    assert!(progress.finished_at.is_some());
    assert!(tracker.current().is_none());
}

#[tokio::test]
async fn failed_job_is_marked_failed() {
    let h = harness(FakeRasterizer::new(1));
    h.store.set_unreachable(true);
    let tracker = ProgressTracker::new();
    let job = tracker.start_job("f.pdf");

    let failure = h
        .ingestor
        .ingest(upload("f.pdf", 1), &job, job.job_id())
        .await
        .unwrap_err();

    let progress = tracker.get(job.job_id()).unwrap();
    assert_eq!(progress.stage, IngestStage::Failed);
    assert_eq!(progress.message.as_deref(), Some(failure.error.as_str()));
}

// ── Listing and lifecycle ────────────────────────────────────────────────────

#[tokio::test]
async fn listing_filters_by_category_newest_first() {
    let h = harness(FakeRasterizer::new(1));
    let mut ids = Vec::new();
    for (name, category) in [("a.pdf", "ropa"), ("b.pdf", "hogar"), ("c.pdf", "ropa")] {
        let request = IngestRequest {
            category: category.into(),
            ..upload(name, 1)
        };
        ids.push(h.ingest(request).await.unwrap().catalog_id);
    }

    let listing = h
        .repo
        .list_catalogs(&CatalogQuery {
            category: Some("ropa".into()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(listing.total, 2);
    let listed: Vec<i64> = listing.catalogs.iter().map(|c| c.id).collect();
    assert_eq!(listed, vec![ids[2], ids[0]]);

    let stats = h.repo.stats().unwrap();
    assert_eq!(stats.total_catalogs, 3);
    assert_eq!(stats.active, 3);
    assert_eq!(stats.total_pages, 3);
}

#[tokio::test]
async fn delete_with_store_failures_then_reconcile() {
    let h = harness(FakeRasterizer::new(2));
    let report = h.ingest(upload("d.pdf", 2)).await.unwrap();
    let id = report.catalog_id;
    let lifecycle = h.lifecycle();

    h.store.fail_deletes_matching("page_0001");
    let deleted = lifecycle.delete_catalog(id).await.unwrap();

    assert_eq!(deleted.catalog_id, id);
    assert_eq!(deleted.assets_removed, 4);
    assert_eq!(deleted.store_errors.len(), 1);
    assert!(deleted.store_errors[0].key.ends_with("page_0001.jpg"));
    assert!(h.repo.get_catalog(id).unwrap().is_none());
    assert!(h.repo.list_assets(id).unwrap().is_empty());

    // The leftover object is an orphan now; a later sweep removes it.
    h.store.clear_faults();
    let leftover = h.store.inner().keys();
    assert_eq!(leftover.len(), 1);

    let sweep = lifecycle
        .reconcile_orphans(&ReconcileOptions::default())
        .await
        .unwrap();
    assert_eq!(sweep.orphan_objects, leftover);
    assert!(h.store.inner().is_empty());
}

#[tokio::test]
async fn reconcile_repairs_page_count_after_lost_object() {
    let h = harness(FakeRasterizer::new(3));
    let report = h.ingest(upload("r.pdf", 3)).await.unwrap();
    let id = report.catalog_id;

    h.store
        .inner()
        .delete(&format!("catalogs/{id}/page_0002.jpg"))
        .await
        .unwrap();

    let sweep = h
        .lifecycle()
        .reconcile_orphans(&ReconcileOptions::default())
        .await
        .unwrap();

    assert_eq!(sweep.missing_objects.len(), 1);
    assert_eq!(sweep.refinalized, vec![id]);
    let catalog = h.repo.get_catalog(id).unwrap().unwrap();
    assert_eq!(catalog.total_pages, 2);
    assert_eq!(h.page_numbers(id), vec![1, 3]);
}
