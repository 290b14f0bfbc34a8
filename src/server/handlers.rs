//! Catalog API handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::state::AppState;
use crate::error::{CatalogError, ErrorKind};
use crate::lifecycle::{DeleteReport, OrphanReport, ReconcileOptions};
use crate::model::{
    Catalog, CatalogAsset, CatalogDetail, CatalogListing, CatalogQuery, CatalogStats,
    CatalogUpdate, IngestFailure, IngestReport, IngestRequest,
};
use crate::progress::JobProgress;

/// Finished jobs are kept this long for pollers.
const PROGRESS_RETENTION_MINUTES: i64 = 60;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub error: String,
}

/// Error half of every handler result.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                success: false,
                catalog_id: None,
                job_id: None,
                error: error.into(),
            },
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        Self::new(status_for(e.kind()), e.to_string())
    }
}

impl From<IngestFailure> for ApiError {
    fn from(f: IngestFailure) -> Self {
        Self {
            status: status_for(f.kind),
            body: ErrorResponse {
                success: false,
                catalog_id: f.catalog_id,
                job_id: Some(f.job_id),
                error: f.error,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ledger: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_error: Option<String>,
    pub uptime_secs: i64,
    pub active_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job: Option<JobProgress>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: IngestReport,
}

#[derive(Debug, Serialize)]
pub struct CatalogListResponse {
    #[serde(flatten)]
    pub listing: CatalogListing,
    pub stats: CatalogStats,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub current: Option<JobProgress>,
    pub jobs: Vec<JobProgress>,
}

#[derive(Debug, Serialize)]
pub struct PagesResponse {
    pub catalog_id: i64,
    pub total: usize,
    pub pages: Vec<CatalogAsset>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: DeleteReport,
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides the default staleness deadline; `0` disables the check.
    #[serde(default)]
    pub stale_minutes: Option<i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
///
/// Ledger reachability and the job currently being ingested.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, ledger, ledger_error) = match state.repository().ping() {
        Ok(()) => (StatusCode::OK, "ok", None),
        Err(e) => {
            warn!("Health check: ledger unreachable: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "unreachable", Some(e.to_string()))
        }
    };
    let body = HealthResponse {
        status: if status == StatusCode::OK { "ok" } else { "degraded" },
        ledger,
        ledger_error,
        uptime_secs: (Utc::now() - state.started_at()).num_seconds(),
        active_jobs: state.progress().active().len(),
        current_job: state.progress().current(),
    };
    (status, Json(body))
}

/// POST /catalogs
///
/// Multipart upload; runs the ingestion and answers with its report.
pub async fn create_catalog(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let request = read_upload(multipart).await?;

    state
        .progress()
        .prune(chrono::Duration::minutes(PROGRESS_RETENTION_MINUTES));
    let job = state.progress().start_job(&request.filename);
    info!(
        "Upload '{}' ({} bytes) accepted as job {}",
        request.filename,
        request.bytes.len(),
        job.job_id()
    );

    let report = state
        .ingestor()
        .ingest(request, &job, job.job_id())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(IngestResponse {
            success: true,
            report,
        }),
    ))
}

/// Collect the multipart fields of an upload.
async fn read_upload(mut multipart: Multipart) -> ApiResult<IngestRequest> {
    let mut request = IngestRequest::default();
    let mut saw_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.filename = field.file_name().unwrap_or("upload.pdf").to_string();
                request.content_type = field.content_type().map(str::to_string);
                request.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("could not read file: {}", e)))?
                    .to_vec();
                saw_file = true;
            }
            "description" | "category" | "user_id" | "version" | "tags" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("field '{}': {}", name, e)))?;
                match name.as_str() {
                    "description" => request.description = value,
                    "category" => request.category = value,
                    "user_id" => request.user_id = Some(value).filter(|v| !v.is_empty()),
                    "version" => request.version = Some(value).filter(|v| !v.is_empty()),
                    _ => request.tags = parse_tags(&value)?,
                }
            }
            other => warn!("Ignoring unknown multipart field '{}'", other),
        }
    }

    if !saw_file {
        return Err(ApiError::bad_request("missing multipart field 'file'"));
    }
    Ok(request)
}

fn parse_tags(raw: &str) -> ApiResult<BTreeMap<String, String>> {
    if raw.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| ApiError::bad_request(format!("tags must be a JSON object of strings: {}", e)))
}

/// GET /catalogs
///
/// Filtered listing, newest first, plus ledger-wide statistics.
pub async fn list_catalogs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CatalogQuery>,
) -> ApiResult<Json<CatalogListResponse>> {
    let repo = state.repository();
    let listing = repo.list_catalogs(&query)?;
    let stats = repo.stats()?;
    Ok(Json(CatalogListResponse { listing, stats }))
}

/// GET /catalogs/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<CatalogStats>> {
    Ok(Json(state.repository().stats()?))
}

/// GET /catalogs/progress
///
/// The most recent unfinished job plus every job still retained.
pub async fn get_progress(State(state): State<Arc<AppState>>) -> Json<ProgressResponse> {
    let tracker = state.progress();
    Json(ProgressResponse {
        current: tracker.current(),
        jobs: tracker.all(),
    })
}

/// GET /catalogs/progress/{job_id}
pub async fn get_job_progress(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobProgress>> {
    state
        .progress()
        .get(job_id)
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("Job {} not found", job_id)))
}

/// GET /catalogs/{id}
///
/// The catalog with its original, thumbnail and ordered pages.
pub async fn get_catalog(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CatalogDetail>> {
    state
        .repository()
        .complete_catalog(id)?
        .map(Json)
        .ok_or_else(|| CatalogError::catalog_not_found(id).into())
}

/// PATCH /catalogs/{id}
pub async fn update_catalog(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(update): Json<CatalogUpdate>,
) -> ApiResult<Json<Catalog>> {
    if update.is_empty() {
        return Err(ApiError::bad_request("no updatable fields given"));
    }
    let repo = state.repository();
    if repo.update_catalog(id, &update)? == 0 {
        return Err(CatalogError::catalog_not_found(id).into());
    }
    repo.get_catalog(id)?
        .map(Json)
        .ok_or_else(|| CatalogError::catalog_not_found(id).into())
}

/// DELETE /catalogs/{id}
///
/// Succeeds even when some objects could not be removed; they are listed in
/// `store_errors`.
pub async fn delete_catalog(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteResponse>> {
    let report = state.lifecycle().delete_catalog(id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        report,
    }))
}

/// GET /catalogs/{id}/pages
pub async fn list_pages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<PagesResponse>> {
    let repo = state.repository();
    if repo.get_catalog(id)?.is_none() {
        return Err(CatalogError::catalog_not_found(id).into());
    }
    let pages = repo.list_pages(id)?;
    Ok(Json(PagesResponse {
        catalog_id: id,
        total: pages.len(),
        pages,
    }))
}

/// POST /catalogs/cleanup-orphans
pub async fn cleanup_orphans(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Json<OrphanReport>> {
    let mut options = ReconcileOptions {
        dry_run: params.dry_run,
        ..Default::default()
    };
    if let Some(minutes) = params.stale_minutes {
        options.stale_after = (minutes > 0).then(|| chrono::Duration::minutes(minutes));
    }
    Ok(Json(state.lifecycle().reconcile_orphans(&options).await?))
}
