use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::ingest::Ingestor;
use crate::ledger::CatalogRepository;
use crate::lifecycle::CatalogLifecycle;
use crate::progress::ProgressTracker;

/// Shared application state
pub struct AppState {
    ingestor: Ingestor,
    lifecycle: CatalogLifecycle,
    progress: ProgressTracker,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(ingestor: Ingestor, progress: ProgressTracker) -> Self {
        let lifecycle = CatalogLifecycle::new(
            ingestor.repository().clone(),
            ingestor.store().clone(),
            ingestor.config().key_prefix.clone(),
        );
        Self {
            ingestor,
            lifecycle,
            progress,
            started_at: Utc::now(),
        }
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn lifecycle(&self) -> &CatalogLifecycle {
        &self.lifecycle
    }

    pub fn repository(&self) -> &dyn CatalogRepository {
        self.ingestor.repository().as_ref()
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn config(&self) -> &PipelineConfig {
        self.ingestor.config()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}
