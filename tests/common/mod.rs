//! In-process HTTP fixture with fake rasterizer and fault-injecting store.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use pdf_catalog::server::{create_router, AppState};
use pdf_catalog::testing::{FakeRasterizer, FlakyStore};
use pdf_catalog::{Ingestor, PipelineConfig, ProgressTracker, SqliteLedger};

const BOUNDARY: &str = "----catalog-test-boundary";

/// Test fixture: the router plus handles on its collaborators.
pub struct TestFixture {
    pub router: Router,
    pub repo: Arc<SqliteLedger>,
    pub store: Arc<FlakyStore>,
    pub progress: ProgressTracker,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// One multipart field.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File {
        filename: &'a str,
        content_type: &'a str,
        bytes: &'a [u8],
    },
}

impl TestFixture {
    /// Fixture whose rasterizer reports `pages` pages.
    pub fn new(pages: usize) -> Self {
        Self::with_rasterizer(FakeRasterizer::new(pages))
    }

    pub fn with_rasterizer(rasterizer: FakeRasterizer) -> Self {
        let config = PipelineConfig::builder()
            .target_width_px(400)
            .thumbnail_width_px(100)
            .batch_size(2)
            .max_upload_bytes(512 * 1024)
            .build()
            .expect("valid test config");

        let repo = Arc::new(SqliteLedger::in_memory().expect("in-memory ledger"));
        let store = Arc::new(FlakyStore::new());
        let ingestor = Ingestor::new(
            config,
            repo.clone(),
            store.clone(),
            Arc::new(rasterizer.with_target_width(400)),
        );
        let progress = ProgressTracker::new();
        let state = Arc::new(AppState::new(ingestor, progress.clone()));
        let router = create_router(state, None);

        Self {
            router,
            repo,
            store,
            progress,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with an empty body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PATCH request with JSON body.
    pub async fn patch(&self, path: &str, body: Value) -> TestResponse {
        self.request("PATCH", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// POST a multipart form.
    pub async fn post_multipart(&self, path: &str, parts: &[Part<'_>]) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    /// Upload a PDF with the usual text fields.
    pub async fn upload(&self, filename: &str, bytes: &[u8], category: &str) -> TestResponse {
        self.post_multipart(
            "/catalogs",
            &[
                Part::File {
                    filename,
                    content_type: "application/pdf",
                    bytes,
                },
                Part::Text("description", "Temporada"),
                Part::Text("category", category),
                Part::Text("user_id", "u-1"),
            ],
        )
        .await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File {
                filename,
                content_type,
                bytes,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                         Content-Type: {content_type}\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}
