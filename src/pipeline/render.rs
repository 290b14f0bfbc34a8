//! PDF rasterisation: render pages to fixed-width JPEGs via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why fixed width?
//!
//! Catalog pages are read in a fixed-width viewport. Every page is scaled by
//! `zoom = target_width / page_width` on both axes, so a catalog that mixes
//! A4 and Letter pages still yields images of identical width.
//!
//! ## Batches
//!
//! [`PageRasterizer::render_batch`] opens the document, renders the requested
//! pages, and closes it again before returning. Everything pdfium allocated
//! for the batch is released at that point; the orchestrator only ever holds
//! one batch of encoded JPEGs.

use crate::config::PipelineConfig;
use crate::error::{CatalogError, PageError};
use crate::pipeline::encode::encode_jpeg;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Refuse to allocate bitmaps larger than this many pixels.
pub const MAX_RENDER_PIXELS: u64 = 120_000_000;

/// Scale and output size for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderGeometry {
    pub zoom: f32,
    pub width: u32,
    pub height: u32,
}

/// Compute the uniform zoom that maps `page_width` (PDF points) to
/// `target_width` pixels. A zero-width page renders at zoom 1.0.
pub fn render_geometry(page_width: f32, page_height: f32, target_width: u32) -> RenderGeometry {
    let zoom = if page_width > 0.0 {
        target_width as f32 / page_width
    } else {
        1.0
    };
    RenderGeometry {
        zoom,
        width: ((page_width * zoom).round() as u32).max(1),
        height: ((page_height * zoom).round() as u32).max(1),
    }
}

/// One rendered and encoded page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page_number: usize,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub zoom: f32,
    pub quality: u8,
}

impl RenderedPage {
    /// Metadata stored on the page's ledger row.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "width": self.width,
            "height": self.height,
            "quality": self.quality,
            "zoom": self.zoom,
        })
    }
}

/// Per-page outcome of a batch.
pub type PageOutcome = (usize, Result<RenderedPage, PageError>);

/// Renders PDF pages to encoded raster images.
///
/// Implementations are blocking; call them through [`count_pages`] and
/// [`render_batch`], which move the work off the async runtime.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, pdf: &[u8]) -> Result<usize, CatalogError>;

    /// Render the given 1-based pages.
    ///
    /// A document that cannot be opened is an `Err`; a page that cannot be
    /// rendered is reported in its own slot and the batch continues.
    fn render_batch(&self, pdf: &[u8], pages: &[usize]) -> Result<Vec<PageOutcome>, CatalogError>;
}

/// Count pages on the blocking pool.
pub async fn count_pages(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: Arc<Vec<u8>>,
) -> Result<usize, CatalogError> {
    tokio::task::spawn_blocking(move || rasterizer.page_count(&pdf))
        .await
        .map_err(|e| CatalogError::Internal(format!("Page count task panicked: {}", e)))?
}

/// Render one batch on the blocking pool.
pub async fn render_batch(
    rasterizer: Arc<dyn PageRasterizer>,
    pdf: Arc<Vec<u8>>,
    pages: Vec<usize>,
) -> Result<Vec<PageOutcome>, CatalogError> {
    tokio::task::spawn_blocking(move || rasterizer.render_batch(&pdf, &pages))
        .await
        .map_err(|e| CatalogError::Internal(format!("Render task panicked: {}", e)))?
}

/// [`PageRasterizer`] backed by the pdfium library.
///
/// The library is bound inside each blocking call and released when the call
/// returns, so the rasterizer holds no pdfium handle between calls. Calls are
/// serialised through a mutex: pdfium itself is single-threaded, so
/// concurrent ingestions take turns per batch.
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
    password: Option<String>,
    target_width: u32,
    quality: u8,
    render_lock: Mutex<()>,
}

impl PdfiumRasterizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            library_path: config.pdfium_library_path.clone(),
            password: config.password.clone(),
            target_width: config.target_width_px,
            quality: config.page_quality,
            render_lock: Mutex::new(()),
        }
    }

    /// Bind once and release, surfacing a missing library at startup instead
    /// of on the first upload.
    pub fn bind_eagerly(&self) -> Result<(), CatalogError> {
        self.with_pdfium(|_| Ok(()))
    }

    fn bind(&self) -> Result<Pdfium, CatalogError> {
        let bindings = match &self.library_path {
            Some(path) if path.is_file() => Pdfium::bind_to_library(path),
            Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| CatalogError::PdfiumBindingFailed(format!("{:?}", e)))?;
        debug!("pdfium library bound");
        Ok(Pdfium::new(bindings))
    }

    fn with_pdfium<T>(
        &self,
        f: impl FnOnce(&Pdfium) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let _guard = self
            .render_lock
            .lock()
            .map_err(|_| CatalogError::Internal("pdfium lock poisoned".into()))?;
        let pdfium = self.bind()?;
        f(&pdfium)
    }

    fn open_error(&self, e: PdfiumError) -> CatalogError {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if self.password.is_some() {
                CatalogError::Processing("wrong password for encrypted PDF".into())
            } else {
                CatalogError::Processing("PDF is encrypted and requires a password".into())
            }
        } else {
            CatalogError::Processing(format!("PDF could not be opened: {}", err_str))
        }
    }

    fn render_page(&self, pages: &PdfPages, page_number: usize) -> Result<RenderedPage, PageError> {
        let render_failed = |detail: String| PageError::RenderFailed {
            page: page_number,
            detail,
        };

        let page = pages
            .get((page_number - 1) as u16)
            .map_err(|e| render_failed(format!("{:?}", e)))?;

        let geometry = render_geometry(page.width().value, page.height().value, self.target_width);
        let pixels = geometry.width as u64 * geometry.height as u64;
        if pixels > MAX_RENDER_PIXELS {
            return Err(render_failed(format!(
                "page would render at {}x{} px, above the {} px limit",
                geometry.width, geometry.height, MAX_RENDER_PIXELS
            )));
        }

        let render_config = PdfRenderConfig::new().scale_page_by_factor(geometry.zoom);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_failed(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        drop(bitmap);

        let bytes = encode_jpeg(&image, self.quality).map_err(|e| PageError::EncodeFailed {
            page: page_number,
            detail: e.to_string(),
        })?;

        debug!(
            "Rendered page {} → {}x{} px (zoom {:.3}), {} bytes",
            page_number,
            image.width(),
            image.height(),
            geometry.zoom,
            bytes.len()
        );

        Ok(RenderedPage {
            page_number,
            bytes,
            width: image.width(),
            height: image.height(),
            zoom: geometry.zoom,
            quality: self.quality,
        })
    }
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, CatalogError> {
        self.with_pdfium(|pdfium| {
            let document = pdfium
                .load_pdf_from_byte_slice(pdf, self.password.as_deref())
                .map_err(|e| self.open_error(e))?;
            let count = document.pages().len() as usize;
            info!("PDF loaded: {} pages", count);
            Ok(count)
        })
    }

    fn render_batch(&self, pdf: &[u8], pages: &[usize]) -> Result<Vec<PageOutcome>, CatalogError> {
        self.with_pdfium(|pdfium| {
            let document = pdfium
                .load_pdf_from_byte_slice(pdf, self.password.as_deref())
                .map_err(|e| self.open_error(e))?;
            let doc_pages = document.pages();
            let total = doc_pages.len() as usize;

            let mut results = Vec::with_capacity(pages.len());
            for &page_number in pages {
                if page_number == 0 || page_number > total {
                    warn!(
                        "Skipping page {} (out of range, total={})",
                        page_number, total
                    );
                    results.push((
                        page_number,
                        Err(PageError::RenderFailed {
                            page: page_number,
                            detail: format!("out of range (document has {} pages)", total),
                        }),
                    ));
                    continue;
                }
                results.push((page_number, self.render_page(&doc_pages, page_number)));
            }
            Ok(results)
        })
    }
}
