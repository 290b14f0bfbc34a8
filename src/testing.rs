//! Fakes for exercising the pipeline without pdfium or a real store.
//!
//! # Example
//!
//! ```rust
//! use pdf_catalog::testing::{sample_pdf, FakeRasterizer, FlakyStore};
//!
//! let rasterizer = FakeRasterizer::new(3).with_failing_pages([2]);
//! let store = FlakyStore::new();
//! store.fail_puts_matching(".pdf");
//! let pdf = sample_pdf(3);
//! assert!(pdf.starts_with(b"%PDF"));
//! ```

use crate::error::{CatalogError, PageError};
use crate::pipeline::encode::encode_jpeg;
use crate::pipeline::render::{render_geometry, PageOutcome, PageRasterizer, RenderedPage};
use crate::store::{AssetStore, MemoryAssetStore};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// US Letter in PDF points.
const LETTER: (f32, f32) = (612.0, 792.0);

/// [`PageRasterizer`] that paints solid-colour pages.
///
/// Ignores the PDF bytes; the page count and failing pages are configured up
/// front. Every batch it was asked to render is recorded.
pub struct FakeRasterizer {
    pages: usize,
    target_width: u32,
    quality: u8,
    failing: HashSet<usize>,
    open_error: Option<String>,
    batches: Mutex<Vec<Vec<usize>>>,
}

impl FakeRasterizer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            target_width: 120,
            quality: 80,
            failing: HashSet::new(),
            open_error: None,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Pages (1-based) whose rendering fails.
    pub fn with_failing_pages(mut self, pages: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(pages);
        self
    }

    pub fn with_target_width(mut self, px: u32) -> Self {
        self.target_width = px.max(1);
        self
    }

    /// Fail every document open with a processing error.
    pub fn with_open_error(mut self, msg: impl Into<String>) -> Self {
        self.open_error = Some(msg.into());
        self
    }

    /// Batches requested so far, in call order.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_open(&self) -> Result<(), CatalogError> {
        match &self.open_error {
            Some(msg) => Err(CatalogError::Processing(msg.clone())),
            None => Ok(()),
        }
    }

    fn paint(&self, page_number: usize) -> Result<RenderedPage, PageError> {
        let geometry = render_geometry(LETTER.0, LETTER.1, self.target_width);
        let shade = (page_number * 37 % 256) as u8;
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            geometry.width,
            geometry.height,
            Rgb([shade, 255 - shade, 128]),
        ));
        let bytes = encode_jpeg(&img, self.quality).map_err(|e| PageError::EncodeFailed {
            page: page_number,
            detail: e.to_string(),
        })?;
        Ok(RenderedPage {
            page_number,
            bytes,
            width: geometry.width,
            height: geometry.height,
            zoom: geometry.zoom,
            quality: self.quality,
        })
    }
}

impl PageRasterizer for FakeRasterizer {
    fn page_count(&self, _pdf: &[u8]) -> Result<usize, CatalogError> {
        self.check_open()?;
        Ok(self.pages)
    }

    fn render_batch(&self, _pdf: &[u8], pages: &[usize]) -> Result<Vec<PageOutcome>, CatalogError> {
        self.check_open()?;
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pages.to_vec());

        Ok(pages
            .iter()
            .map(|&p| {
                let outcome = if p == 0 || p > self.pages {
                    Err(PageError::RenderFailed {
                        page: p,
                        detail: "out of range".into(),
                    })
                } else if self.failing.contains(&p) {
                    Err(PageError::RenderFailed {
                        page: p,
                        detail: "injected render failure".into(),
                    })
                } else {
                    self.paint(p)
                };
                (p, outcome)
            })
            .collect())
    }
}

/// In-memory store with switchable faults.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryAssetStore,
    fail_put: Mutex<Vec<String>>,
    fail_delete: Mutex<Vec<String>>,
    unreachable: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject puts whose key contains `needle`.
    pub fn fail_puts_matching(&self, needle: impl Into<String>) {
        self.fail_put
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(needle.into());
    }

    /// Reject deletes whose key contains `needle`.
    pub fn fail_deletes_matching(&self, needle: impl Into<String>) {
        self.fail_delete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(needle.into());
    }

    /// Fail every call.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Drop every injected fault.
    pub fn clear_faults(&self) {
        self.fail_put.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.fail_delete.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.set_unreachable(false);
    }

    /// The objects actually stored.
    pub fn inner(&self) -> &MemoryAssetStore {
        &self.inner
    }

    fn check(&self, key: &str, rules: &Mutex<Vec<String>>) -> Result<(), CatalogError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CatalogError::storage(key, "store unreachable"));
        }
        let rules = rules.lock().unwrap_or_else(PoisonError::into_inner);
        if rules.iter().any(|needle| key.contains(needle.as_str())) {
            return Err(CatalogError::storage(key, "injected store failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetStore for FlakyStore {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, CatalogError> {
        self.check(key, &self.fail_put)?;
        self.inner.put(key, bytes, content_type).await
    }

    async fn delete(&self, key: &str) -> Result<(), CatalogError> {
        self.check(key, &self.fail_delete)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CatalogError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CatalogError::storage(key, "store unreachable"));
        }
        self.inner.exists(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, CatalogError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CatalogError::storage(prefix, "store unreachable"));
        }
        self.inner.list(prefix).await
    }

    fn url_for(&self, key: &str) -> String {
        self.inner.url_for(key)
    }
}

/// A structurally valid PDF with `pages` blank Letter pages.
pub fn sample_pdf(pages: usize) -> Vec<u8> {
    let mut out: Vec<u8> = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();

    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let mut objects = vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), pages),
    ];
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".to_string());
    }

    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for offset in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}
