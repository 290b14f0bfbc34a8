//! Ingestion Orchestrator: upload → catalog row → original → pages → thumbnail → finalize.
//!
//! Every step is a commit point against the ledger. There is no transaction
//! spanning the asset store and the ledger, so the order of writes is what
//! keeps them in agreement:
//!
//! * an asset row is written only after its object was stored;
//! * a failed step moves the catalog to `error` and records
//!   `{failed_step, error, failed_at}` in its processing metadata;
//! * a page that fails anywhere (render, encode, upload, register) is skipped
//!   and reported in [`IngestReport::skipped_pages`], never fatal on its own;
//! * the final page count comes from a count query over page rows, not from
//!   an in-process counter, so it can always be re-derived (see
//!   [`crate::lifecycle::CatalogLifecycle::refinalize`]).
//!
//! Pages are rendered in batches of `batch_size`. The rasterizer closes the
//! document after each batch and the batch's encoded pages are dropped before
//! the next one starts, so peak memory is bounded by one batch.

use crate::config::PipelineConfig;
use crate::error::{CatalogError, PageError};
use crate::ledger::CatalogRepository;
use crate::model::{
    AssetKind, AssetState, CatalogState, IngestFailure, IngestReport, IngestRequest, IngestStep,
    NewAsset, NewCatalog,
};
use crate::pipeline::encode::RASTER_MIME;
use crate::pipeline::input::{checksum, display_name, original_object_filename, validate_upload};
use crate::pipeline::render::{self, PageRasterizer, RenderedPage};
use crate::pipeline::thumbnail::generate_thumbnail;
use crate::progress::{IngestProgressCallback, IngestStage};
use crate::store::{object_key, page_filename, AssetStore, PDF_MIME, THUMBNAIL_FILENAME};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Drives one upload through the pipeline.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct Ingestor {
    config: Arc<PipelineConfig>,
    repo: Arc<dyn CatalogRepository>,
    store: Arc<dyn AssetStore>,
    rasterizer: Arc<dyn PageRasterizer>,
}

/// Per-call state threaded through the steps.
struct Job<'a> {
    id: Uuid,
    started: Instant,
    catalog_id: Option<i64>,
    progress: &'a dyn IngestProgressCallback,
}

impl Ingestor {
    pub fn new(
        config: PipelineConfig,
        repo: Arc<dyn CatalogRepository>,
        store: Arc<dyn AssetStore>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            repo,
            store,
            rasterizer,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn CatalogRepository> {
        &self.repo
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Ingest one upload.
    ///
    /// # Returns
    /// `Ok(IngestReport)` once the catalog is `active`. Pages that could not
    /// be produced are listed in `skipped_pages`; the catalog's page count
    /// reflects only the pages actually registered.
    ///
    /// # Errors
    /// `Err(IngestFailure)` when a fatal step failed. If the catalog row had
    /// already been created, `failure.catalog_id` names it and it is left in
    /// state `error`. Validation failures happen before any write.
    pub async fn ingest(
        &self,
        request: IngestRequest,
        progress: &dyn IngestProgressCallback,
        job_id: Uuid,
    ) -> Result<IngestReport, IngestFailure> {
        let mut job = Job {
            id: job_id,
            started: Instant::now(),
            catalog_id: None,
            progress,
        };
        let started_at = Utc::now();
        let IngestRequest {
            bytes,
            filename,
            description,
            category,
            user_id,
            content_type,
            version,
            tags,
        } = request;
        info!("Starting ingestion of '{}' ({} bytes), job {}", filename, bytes.len(), job_id);

        // ── Step 0: Validate ─────────────────────────────────────────────────
        progress.on_stage(IngestStage::Validating);
        if let Err(e) = validate_upload(
            &bytes,
            &filename,
            content_type.as_deref(),
            self.config.max_upload_bytes,
        ) {
            return Err(self.fail(&job, IngestStep::Validate, e));
        }

        // ── Step 1: Create catalog row ───────────────────────────────────────
        let new_catalog = NewCatalog {
            name: display_name(&filename),
            description,
            category,
            file_size: bytes.len() as u64,
            original_filename: filename.clone(),
            version: version
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| self.config.default_version.clone()),
            tags,
            created_by: user_id.clone(),
        };
        let catalog = match self.repo.create_catalog(&new_catalog) {
            Ok(c) => c,
            Err(e) => return Err(self.fail(&job, IngestStep::CreateCatalog, e)),
        };
        let catalog_id = catalog.id;
        job.catalog_id = Some(catalog_id);
        progress.on_catalog_created(catalog_id);
        info!("Catalog {} created for '{}'", catalog_id, catalog.name);

        // ── Step 2: Store original ───────────────────────────────────────────
        progress.on_stage(IngestStage::UploadingOriginal);
        let original_url = match self.store_original(catalog_id, &filename, &bytes).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(&job, IngestStep::UploadOriginal, e)),
        };

        // ── Step 3: Rasterise pages in batches ───────────────────────────────
        progress.on_stage(IngestStage::Rasterizing);
        let pdf = Arc::new(bytes);
        let total = match render::count_pages(Arc::clone(&self.rasterizer), Arc::clone(&pdf)).await
        {
            Ok(0) => {
                let e = CatalogError::Processing("the PDF has no pages".into());
                return Err(self.fail(&job, IngestStep::RasterizePages, e));
            }
            Ok(n) => n,
            Err(e) => return Err(self.fail(&job, IngestStep::RasterizePages, e)),
        };

        let batches = page_batches(total, self.config.batch_size);
        progress.on_pages_discovered(total, batches.len());
        info!(
            "Catalog {}: rasterising {} pages in {} batches of up to {}",
            catalog_id,
            total,
            batches.len(),
            self.config.batch_size
        );

        let mut skipped: Vec<PageError> = Vec::new();
        let mut registered = 0usize;
        let mut first_page: Option<RenderedPage> = None;

        for (batch_idx, pages) in batches.iter().enumerate() {
            progress.on_batch_start(batch_idx + 1, batches.len());
            debug!(
                "Catalog {}: batch {}/{} pages {:?}",
                catalog_id,
                batch_idx + 1,
                batches.len(),
                pages
            );

            let mut outcomes = match render::render_batch(
                Arc::clone(&self.rasterizer),
                Arc::clone(&pdf),
                pages.clone(),
            )
            .await
            {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    warn!("Catalog {}: batch {} could not be rendered: {}", catalog_id, batch_idx + 1, e);
                    pages
                        .iter()
                        .map(|&p| {
                            (
                                p,
                                Err(PageError::RenderFailed {
                                    page: p,
                                    detail: e.to_string(),
                                }),
                            )
                        })
                        .collect()
                }
            };
            outcomes.sort_by_key(|(page, _)| *page);

            for (page_number, outcome) in outcomes {
                let stored = match outcome {
                    Ok(page) => self.store_page(catalog_id, &page).await.map(|()| page),
                    Err(e) => Err(e),
                };
                match stored {
                    Ok(page) => {
                        registered += 1;
                        progress.on_page_complete(page_number, total);
                        if first_page.is_none() {
                            first_page = Some(page);
                        }
                    }
                    Err(e) => {
                        warn!("Catalog {}: skipping page {}: {}", catalog_id, page_number, e);
                        progress.on_page_error(page_number, total, &e.to_string());
                        skipped.push(e);
                    }
                }
            }
            if let Err(e) = self.repo.touch_catalog(catalog_id) {
                warn!("Catalog {}: could not record batch progress: {}", catalog_id, e);
            }
            // The batch's encoded pages are dropped here, before the next batch renders.
        }

        if registered == 0 {
            let detail = skipped
                .first()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string());
            let e = CatalogError::Processing(format!(
                "none of the {} pages could be stored; first error: {}",
                total, detail
            ));
            return Err(self.fail(&job, IngestStep::RasterizePages, e));
        }

        // ── Step 4: Thumbnail (non-fatal) ────────────────────────────────────
        progress.on_stage(IngestStage::GeneratingThumbnail);
        let (thumbnail_url, thumbnail_error) = match first_page {
            Some(page) => match self.store_thumbnail(catalog_id, page).await {
                Ok(url) => (Some(url), None),
                Err(e) => {
                    warn!("Catalog {}: thumbnail skipped: {}", catalog_id, e);
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };

        // ── Step 5: Finalize ─────────────────────────────────────────────────
        progress.on_stage(IngestStage::Finalizing);
        let total_pages = match self
            .repo
            .count_assets(catalog_id, AssetKind::Page, AssetState::Available)
        {
            Ok(n) => n as u32,
            Err(e) => return Err(self.fail(&job, IngestStep::Finalize, e)),
        };

        let elapsed_ms = job.started.elapsed().as_millis() as u64;
        let mut metadata = json!({
            "job_id": job.id,
            "elapsed_ms": elapsed_ms,
            "config": self.config.snapshot(),
            "requested_pages": total,
            "generated_pages": total_pages,
            "skipped_pages": skipped,
            "batches": batches.len(),
            "started_at": started_at,
            "finished_at": Utc::now(),
            "submitted_by": user_id,
        });
        if let Some(err) = &thumbnail_error {
            metadata["thumbnail_error"] = json!(err);
        }

        match self
            .repo
            .finalize_catalog(catalog_id, total_pages, CatalogState::Active, &metadata)
        {
            Ok(0) => {
                return Err(self.fail(
                    &job,
                    IngestStep::Finalize,
                    CatalogError::catalog_not_found(catalog_id),
                ))
            }
            Ok(_) => {}
            Err(e) => return Err(self.fail(&job, IngestStep::Finalize, e)),
        }

        let report = IngestReport {
            catalog_id,
            job_id: job.id,
            total_pages,
            requested_pages: total as u32,
            skipped_pages: skipped,
            elapsed_ms,
            original_url,
            thumbnail_url,
            thumbnail_error,
        };

        info!(
            "Catalog {} active: {}/{} pages, {} skipped, {}ms",
            catalog_id,
            report.total_pages,
            report.requested_pages,
            report.skipped_pages.len(),
            report.elapsed_ms
        );
        progress.on_stage(IngestStage::Completed);
        progress.on_ingest_complete(&report);
        Ok(report)
    }

    /// Store the original upload and register it.
    async fn store_original(
        &self,
        catalog_id: i64,
        filename: &str,
        bytes: &[u8],
    ) -> Result<String, CatalogError> {
        let stored_name = original_object_filename(filename);
        let key = object_key(&self.config.key_prefix, catalog_id, &stored_name);

        let url = self.store.put(&key, bytes, PDF_MIME).await?;
        let asset = NewAsset {
            catalog_id,
            kind: AssetKind::PdfOriginal,
            filename: stored_name,
            url: url.clone(),
            object_key: key.clone(),
            page_number: None,
            size_bytes: bytes.len() as u64,
            mime_type: PDF_MIME.to_string(),
            checksum: checksum(bytes),
            metadata: json!({ "original_filename": filename }),
        };
        if let Err(e) = self.repo.create_asset(&asset) {
            self.discard_object(&key).await;
            return Err(e);
        }
        debug!("Catalog {}: original stored at {}", catalog_id, key);
        Ok(url)
    }

    /// Store one rendered page and register it.
    async fn store_page(&self, catalog_id: i64, page: &RenderedPage) -> Result<(), PageError> {
        let filename = page_filename(page.page_number);
        let key = object_key(&self.config.key_prefix, catalog_id, &filename);

        let url = self
            .store
            .put(&key, &page.bytes, RASTER_MIME)
            .await
            .map_err(|e| PageError::UploadFailed {
                page: page.page_number,
                detail: e.to_string(),
            })?;

        let asset = NewAsset {
            catalog_id,
            kind: AssetKind::Page,
            filename,
            url,
            object_key: key.clone(),
            page_number: Some(page.page_number as u32),
            size_bytes: page.bytes.len() as u64,
            mime_type: RASTER_MIME.to_string(),
            checksum: checksum(&page.bytes),
            metadata: page.metadata(),
        };
        if let Err(e) = self.repo.create_asset(&asset) {
            self.discard_object(&key).await;
            return Err(PageError::RegisterFailed {
                page: page.page_number,
                detail: e.to_string(),
            });
        }
        Ok(())
    }

    /// Downscale the first stored page, then store and register the result.
    async fn store_thumbnail(
        &self,
        catalog_id: i64,
        first_page: RenderedPage,
    ) -> Result<String, CatalogError> {
        let width = self.config.thumbnail_width_px;
        let quality = self.config.thumbnail_quality;
        let source_page = first_page.page_number;

        let thumb = tokio::task::spawn_blocking(move || {
            generate_thumbnail(&first_page.bytes, width, quality)
        })
        .await
        .map_err(|e| CatalogError::Internal(format!("Thumbnail task panicked: {}", e)))?
        .map_err(|e| CatalogError::Processing(format!("thumbnail: {}", e)))?;

        let key = object_key(&self.config.key_prefix, catalog_id, THUMBNAIL_FILENAME);
        let url = self.store.put(&key, &thumb.bytes, RASTER_MIME).await?;
        let asset = NewAsset {
            catalog_id,
            kind: AssetKind::Thumbnail,
            filename: THUMBNAIL_FILENAME.to_string(),
            url: url.clone(),
            object_key: key.clone(),
            page_number: None,
            size_bytes: thumb.bytes.len() as u64,
            mime_type: RASTER_MIME.to_string(),
            checksum: checksum(&thumb.bytes),
            metadata: json!({
                "width": thumb.width,
                "height": thumb.height,
                "quality": thumb.quality,
                "source_page": source_page,
            }),
        };
        if let Err(e) = self.repo.create_asset(&asset) {
            self.discard_object(&key).await;
            return Err(e);
        }
        debug!(
            "Catalog {}: thumbnail {}x{} stored",
            catalog_id, thumb.width, thumb.height
        );
        Ok(url)
    }

    /// Best-effort removal of an object whose ledger row could not be written.
    async fn discard_object(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(
                "Could not remove unregistered object {} (left for reconciliation): {}",
                key, e
            );
        }
    }

    /// Record a fatal failure and build the caller-facing error.
    fn fail(&self, job: &Job<'_>, step: IngestStep, err: CatalogError) -> IngestFailure {
        let failure = IngestFailure {
            catalog_id: job.catalog_id,
            job_id: job.id,
            step,
            kind: err.kind(),
            error: err.to_string(),
        };

        match job.catalog_id {
            Some(id) => {
                error!("Catalog {} failed at {}: {}", id, step, err);
                let patch = json!({
                    "failed_step": step,
                    "error": failure.error,
                    "error_kind": failure.kind,
                    "failed_at": Utc::now(),
                    "elapsed_ms": job.started.elapsed().as_millis() as u64,
                    "job_id": job.id,
                });
                if let Err(e) = self
                    .repo
                    .update_catalog_state(id, CatalogState::Error, Some(&patch))
                {
                    error!("Catalog {}: could not record failure: {}", id, e);
                }
            }
            None => warn!("Ingestion rejected at {}: {}", step, err),
        }

        job.progress.on_stage(IngestStage::Failed);
        job.progress.on_ingest_failed(&failure);
        failure
    }
}

/// Split `1..=total` into consecutive batches of at most `batch_size` pages.
pub fn page_batches(total: usize, batch_size: usize) -> Vec<Vec<usize>> {
    let pages: Vec<usize> = (1..=total).collect();
    pages
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
