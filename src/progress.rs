//! Progress reporting for in-flight ingestion jobs.
//!
//! The orchestrator reports every step through an
//! [`IngestProgressCallback`]. Two implementations ship with the crate:
//!
//! * [`JobHandle`]: writes a [`JobProgress`] snapshot into a shared
//!   [`ProgressTracker`], keyed by job id, so HTTP clients can poll the state
//!   of each ingestion independently while several run at once.
//! * [`NoopProgressCallback`]: for callers that don't need events.
//!
//! The CLI adds a terminal progress bar implementation of the same trait.
//!
//! # Example
//!
//! ```rust
//! use pdf_catalog::progress::{IngestProgressCallback, ProgressTracker, IngestStage};
//!
//! let tracker = ProgressTracker::new();
//! let handle = tracker.start_job("brochure.pdf");
//! handle.on_pages_discovered(12, 3);
//! handle.on_page_complete(1, 12);
//!
//! let snapshot = tracker.get(handle.job_id()).unwrap();
//! assert_eq!(snapshot.stage, IngestStage::Rasterizing);
//! assert_eq!(snapshot.pages_done, 1);
//! ```

use crate::model::{IngestFailure, IngestReport};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

/// Called by the orchestrator as it moves through an ingestion.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. Implementations must be `Send + Sync`.
pub trait IngestProgressCallback: Send + Sync {
    /// Called when the orchestrator enters a new stage.
    fn on_stage(&self, stage: IngestStage) {
        let _ = stage;
    }

    /// Called once the catalog row exists.
    fn on_catalog_created(&self, catalog_id: i64) {
        let _ = catalog_id;
    }

    /// Called once the page count of the PDF is known.
    fn on_pages_discovered(&self, total_pages: usize, total_batches: usize) {
        let _ = (total_pages, total_batches);
    }

    /// Called before a batch of pages is rendered (`batch` is 1-indexed).
    fn on_batch_start(&self, batch: usize, total_batches: usize) {
        let _ = (batch, total_batches);
    }

    /// Called when a page has been stored and registered.
    fn on_page_complete(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page is skipped.
    fn on_page_error(&self, page_num: usize, total_pages: usize, error: &str) {
        let _ = (page_num, total_pages, error);
    }

    /// Called once after the catalog has been finalized.
    fn on_ingest_complete(&self, report: &IngestReport) {
        let _ = report;
    }

    /// Called once when ingestion fails.
    fn on_ingest_failed(&self, failure: &IngestFailure) {
        let _ = failure;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Where a job currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Validating,
    UploadingOriginal,
    Rasterizing,
    GeneratingThumbnail,
    Finalizing,
    Completed,
    Failed,
}

impl IngestStage {
    pub fn is_finished(&self) -> bool {
        matches!(self, IngestStage::Completed | IngestStage::Failed)
    }
}

/// Snapshot of one ingestion job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
    pub stage: IngestStage,
    pub total_pages: usize,
    pub pages_done: usize,
    pub pages_failed: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    /// Last notable event, e.g. a page error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobProgress {
    fn new(job_id: Uuid, filename: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            filename: filename.to_string(),
            catalog_id: None,
            stage: IngestStage::Validating,
            total_pages: 0,
            pages_done: 0,
            pages_failed: 0,
            current_batch: 0,
            total_batches: 0,
            message: None,
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Completed fraction in `0.0..=1.0`, counting failed pages as attempted.
    pub fn fraction(&self) -> f32 {
        if self.stage == IngestStage::Completed {
            return 1.0;
        }
        if self.total_pages == 0 {
            return 0.0;
        }
        ((self.pages_done + self.pages_failed) as f32 / self.total_pages as f32).min(1.0)
    }
}

type JobMap = Arc<RwLock<HashMap<Uuid, JobProgress>>>;

/// Per-job progress store shared between the orchestrator and pollers.
///
/// Cloning is cheap; all clones see the same jobs.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    jobs: JobMap,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job and return the callback that updates it.
    pub fn start_job(&self, filename: &str) -> JobHandle {
        let job_id = Uuid::new_v4();
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, JobProgress::new(job_id, filename));
        JobHandle {
            job_id,
            jobs: Arc::clone(&self.jobs),
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobProgress> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    /// Every known job, most recently updated first.
    pub fn all(&self) -> Vec<JobProgress> {
        let mut jobs: Vec<JobProgress> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        jobs
    }

    /// Jobs that have not completed or failed yet.
    pub fn active(&self) -> Vec<JobProgress> {
        self.all()
            .into_iter()
            .filter(|j| !j.stage.is_finished())
            .collect()
    }

    /// The most recently updated unfinished job, if any.
    pub fn current(&self) -> Option<JobProgress> {
        self.active().into_iter().next()
    }

    /// Drop finished jobs older than `max_age`. Returns how many were removed.
    pub fn prune(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, j| match j.finished_at {
            Some(done) => done > cutoff,
            None => true,
        });
        before - jobs.len()
    }
}

/// Progress callback bound to one job of a [`ProgressTracker`].
pub struct JobHandle {
    job_id: Uuid,
    jobs: JobMap,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    fn update(&self, f: impl FnOnce(&mut JobProgress)) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&self.job_id) {
            f(job);
            job.updated_at = Utc::now();
        }
    }
}

/// A handle dropped before the job finished means the ingestion was
/// cancelled (request timeout, client disconnect). The job is closed as
/// failed so it stops counting as active and becomes prunable.
impl Drop for JobHandle {
    fn drop(&mut self) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = jobs.get_mut(&self.job_id) {
            if job.finished_at.is_none() {
                let now = Utc::now();
                job.stage = IngestStage::Failed;
                job.finished_at = Some(now);
                job.updated_at = now;
                job.message = Some("ingestion abandoned before completion".into());
            }
        }
    }
}

impl IngestProgressCallback for JobHandle {
    fn on_stage(&self, stage: IngestStage) {
        self.update(|j| j.stage = stage);
    }

    fn on_catalog_created(&self, catalog_id: i64) {
        self.update(|j| j.catalog_id = Some(catalog_id));
    }

    fn on_pages_discovered(&self, total_pages: usize, total_batches: usize) {
        self.update(|j| {
            j.stage = IngestStage::Rasterizing;
            j.total_pages = total_pages;
            j.total_batches = total_batches;
        });
    }

    fn on_batch_start(&self, batch: usize, _total_batches: usize) {
        self.update(|j| j.current_batch = batch);
    }

    fn on_page_complete(&self, _page_num: usize, _total_pages: usize) {
        self.update(|j| j.pages_done += 1);
    }

    fn on_page_error(&self, _page_num: usize, _total_pages: usize, error: &str) {
        self.update(|j| {
            j.pages_failed += 1;
            j.message = Some(error.to_string());
        });
    }

    fn on_ingest_complete(&self, report: &IngestReport) {
        self.update(|j| {
            j.stage = IngestStage::Completed;
            j.catalog_id = Some(report.catalog_id);
            j.finished_at = Some(Utc::now());
            j.message = None;
        });
    }

    fn on_ingest_failed(&self, failure: &IngestFailure) {
        self.update(|j| {
            j.stage = IngestStage::Failed;
            j.finished_at = Some(Utc::now());
            j.message = Some(failure.error.clone());
        });
    }
}

/// Convenience alias for a shared callback.
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::IngestStep;

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage(IngestStage::Validating);
        cb.on_pages_discovered(5, 1);
        cb.on_page_complete(1, 5);
        cb.on_page_error(2, 5, "some error");
    }

    #[test]
    fn jobs_are_tracked_independently() {
        let tracker = ProgressTracker::new();
        let a = tracker.start_job("a.pdf");
        let b = tracker.start_job("b.pdf");

        a.on_pages_discovered(10, 2);
        b.on_pages_discovered(3, 1);
        a.on_page_complete(1, 10);
        a.on_page_complete(2, 10);
        b.on_page_error(1, 3, "corrupt page");

        let pa = tracker.get(a.job_id()).unwrap();
        let pb = tracker.get(b.job_id()).unwrap();
        assert_eq!(pa.pages_done, 2);
        assert_eq!(pa.pages_failed, 0);
        assert_eq!(pb.pages_done, 0);
        assert_eq!(pb.pages_failed, 1);
        assert_eq!(pb.message.as_deref(), Some("corrupt page"));
        assert_eq!(tracker.active().len(), 2);
    }

    #[test]
    fn finished_jobs_leave_active_set() {
        let tracker = ProgressTracker::new();
        let h = tracker.start_job("x.pdf");
        h.on_catalog_created(9);
        h.on_ingest_failed(&IngestFailure {
            catalog_id: Some(9),
            job_id: h.job_id(),
            step: IngestStep::UploadOriginal,
            kind: ErrorKind::Storage,
            error: "unreachable".into(),
        });

        assert!(tracker.current().is_none());
        let job = tracker.get(h.job_id()).unwrap();
        assert_eq!(job.stage, IngestStage::Failed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn prune_keeps_running_jobs() {
        let tracker = ProgressTracker::new();
        let running = tracker.start_job("running.pdf");
        let done = tracker.start_job("done.pdf");
        done.on_stage(IngestStage::Completed);
        done.update(|j| j.finished_at = Some(Utc::now() - Duration::hours(2)));

        let removed = tracker.prune(Duration::hours(1));
        assert_eq!(removed, 1);
        assert!(tracker.get(running.job_id()).is_some());
        assert!(tracker.get(done.job_id()).is_none());
    }

    #[test]
    fn dropped_handle_closes_unfinished_job() {
        let tracker = ProgressTracker::new();
        let h = tracker.start_job("cancelled.pdf");
        let job_id = h.job_id();
        h.on_pages_discovered(10, 2);
        drop(h);

        let job = tracker.get(job_id).unwrap();
        assert_eq!(job.stage, IngestStage::Failed);
        assert!(job.finished_at.is_some());
        assert!(tracker.current().is_none());
        assert_eq!(tracker.prune(Duration::zero()), 1);
        assert!(tracker.get(job_id).is_none());
    }

    #[test]
    fn dropped_handle_keeps_completed_stage() {
        let tracker = ProgressTracker::new();
        let h = tracker.start_job("done.pdf");
        let job_id = h.job_id();
        h.update(|j| {
            j.stage = IngestStage::Completed;
            j.finished_at = Some(Utc::now());
        });
        drop(h);
        assert_eq!(tracker.get(job_id).unwrap().stage, IngestStage::Completed);
    }

    #[test]
    fn fraction_counts_failed_pages() {
        let tracker = ProgressTracker::new();
        let h = tracker.start_job("f.pdf");
        h.on_pages_discovered(4, 1);
        h.on_page_complete(1, 4);
        h.on_page_error(2, 4, "x");
        let p = tracker.get(h.job_id()).unwrap();
        assert!((p.fraction() - 0.5).abs() < f32::EPSILON);
    }
}
