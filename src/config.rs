//! Configuration for the catalog ingestion pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The config is `Serialize` so the orchestrator
//! can store a snapshot of it in each catalog's processing metadata, which
//! makes two catalogs rendered with different settings easy to tell apart.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one ingestion pipeline.
///
/// # Example
/// ```rust
/// use pdf_catalog::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .target_width_px(1600)
///     .batch_size(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.target_width_px, 1600);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pixel width every rendered page is scaled to. Default: 1200.
    ///
    /// Every page of a catalog renders at this width regardless of its native
    /// size, so a viewer can lay pages out in a fixed-width column.
    pub target_width_px: u32,

    /// JPEG quality for rendered pages (1–100). Default: 85.
    pub page_quality: u8,

    /// Pixel width of the catalog thumbnail. Default: 300.
    pub thumbnail_width_px: u32,

    /// JPEG quality for the thumbnail (1–100). Default: 70.
    pub thumbnail_quality: u8,

    /// Pages rendered per batch. Default: 5.
    ///
    /// The pdfium document and all bitmaps of a batch are dropped before the
    /// next batch starts, so peak memory is bounded by one batch of pages.
    pub batch_size: usize,

    /// Largest accepted upload in bytes. Default: 100 MiB.
    pub max_upload_bytes: usize,

    /// First segment of every object key. Default: "catalogs".
    pub key_prefix: String,

    /// Version string assigned to new catalogs. Default: "1.0.0".
    pub default_version: String,

    /// Directory containing the pdfium shared library.
    /// If None, the system library search path is used.
    pub pdfium_library_path: Option<PathBuf>,

    /// PDF user password for encrypted uploads.
    #[serde(skip_serializing)]
    pub password: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_width_px: 1200,
            page_quality: 85,
            thumbnail_width_px: 300,
            thumbnail_quality: 70,
            batch_size: 5,
            max_upload_bytes: 100 * 1024 * 1024,
            key_prefix: "catalogs".to_string(),
            default_version: "1.0.0".to_string(),
            pdfium_library_path: None,
            password: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("target_width_px", &self.target_width_px)
            .field("page_quality", &self.page_quality)
            .field("thumbnail_width_px", &self.thumbnail_width_px)
            .field("thumbnail_quality", &self.thumbnail_quality)
            .field("batch_size", &self.batch_size)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("key_prefix", &self.key_prefix)
            .field("default_version", &self.default_version)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Snapshot stored in catalog processing metadata.
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn target_width_px(mut self, px: u32) -> Self {
        self.config.target_width_px = px.clamp(64, 8000);
        self
    }

    pub fn page_quality(mut self, q: u8) -> Self {
        self.config.page_quality = q.clamp(1, 100);
        self
    }

    pub fn thumbnail_width_px(mut self, px: u32) -> Self {
        self.config.thumbnail_width_px = px.clamp(16, 2000);
        self
    }

    pub fn thumbnail_quality(mut self, q: u8) -> Self {
        self.config.thumbnail_quality = q.clamp(1, 100);
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn default_version(mut self, version: impl Into<String>) -> Self {
        self.config.default_version = version.into();
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, CatalogError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(CatalogError::InvalidConfig(
                "max_upload_bytes must be > 0".into(),
            ));
        }
        let prefix = c.key_prefix.trim_matches('/');
        if prefix.is_empty() || prefix.contains("..") {
            return Err(CatalogError::InvalidConfig(format!(
                "key_prefix '{}' is not a usable object key prefix",
                c.key_prefix
            )));
        }
        if c.thumbnail_width_px > c.target_width_px {
            return Err(CatalogError::InvalidConfig(format!(
                "thumbnail width {} exceeds page width {}",
                c.thumbnail_width_px, c.target_width_px
            )));
        }
        let mut config = self.config;
        config.key_prefix = config.key_prefix.trim_matches('/').to_string();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let c = PipelineConfig::builder().build().unwrap();
        assert_eq!(c.batch_size, 5);
        assert_eq!(c.key_prefix, "catalogs");
    }

    #[test]
    fn setters_clamp() {
        let c = PipelineConfig::builder()
            .page_quality(0)
            .thumbnail_quality(250)
            .batch_size(0)
            .build()
            .unwrap();
        assert_eq!(c.page_quality, 1);
        assert_eq!(c.thumbnail_quality, 100);
        assert_eq!(c.batch_size, 1);
    }

    #[test]
    fn rejects_traversal_prefix() {
        let err = PipelineConfig::builder().key_prefix("../etc").build();
        assert!(matches!(err, Err(CatalogError::InvalidConfig(_))));
    }

    #[test]
    fn trims_prefix_slashes() {
        let c = PipelineConfig::builder()
            .key_prefix("/catalogos/")
            .build()
            .unwrap();
        assert_eq!(c.key_prefix, "catalogos");
    }

    #[test]
    fn rejects_thumbnail_wider_than_page() {
        let err = PipelineConfig::builder()
            .target_width_px(200)
            .thumbnail_width_px(400)
            .build();
        assert!(matches!(err, Err(CatalogError::InvalidConfig(_))));
    }

    #[test]
    fn snapshot_hides_password() {
        let c = PipelineConfig::builder().password("secret").build().unwrap();
        let snap = c.snapshot();
        assert!(snap.get("password").is_none());
        assert_eq!(snap["target_width_px"], 1200);
        assert!(!format!("{c:?}").contains("secret"));
    }
}
