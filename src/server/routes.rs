use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Room for multipart boundaries and the text fields around the file.
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// Build the HTTP router.
///
/// When `assets_dir` is set (filesystem store), its contents are served under
/// `/assets`, matching the URLs the store hands out.
pub fn create_router(state: Arc<AppState>, assets_dir: Option<PathBuf>) -> Router {
    let body_limit = state.config().max_upload_bytes + MULTIPART_SLACK_BYTES;

    let api = Router::new()
        .route("/health", get(handlers::health))
        // Catalogs
        .route(
            "/catalogs",
            post(handlers::create_catalog).get(handlers::list_catalogs),
        )
        .route("/catalogs/stats", get(handlers::get_stats))
        .route("/catalogs/progress", get(handlers::get_progress))
        .route("/catalogs/progress/{job_id}", get(handlers::get_job_progress))
        .route("/catalogs/cleanup-orphans", post(handlers::cleanup_orphans))
        .route(
            "/catalogs/{id}",
            get(handlers::get_catalog)
                .patch(handlers::update_catalog)
                .delete(handlers::delete_catalog),
        )
        .route("/catalogs/{id}/pages", get(handlers::list_pages))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    let router = match assets_dir {
        Some(dir) => api.nest_service("/assets", ServeDir::new(dir)),
        None => api,
    };

    router.layer(TraceLayer::new_for_http())
}
