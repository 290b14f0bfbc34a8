//! HTTP surface over the ingestion pipeline and the catalog ledger.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | ledger reachability, current job |
//! | `POST /catalogs` | multipart upload, runs an ingestion |
//! | `GET /catalogs` | filtered listing with statistics |
//! | `GET /catalogs/stats` | statistics only |
//! | `GET /catalogs/progress[/{job_id}]` | job progress |
//! | `POST /catalogs/cleanup-orphans` | orphan reconciliation |
//! | `GET/PATCH/DELETE /catalogs/{id}` | catalog aggregate, edit, delete |
//! | `GET /catalogs/{id}/pages` | ordered page assets |

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
