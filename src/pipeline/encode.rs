//! Image encoding: `DynamicImage` → JPEG bytes.
//!
//! Pages and thumbnails are stored as baseline JPEG. The alpha channel is
//! dropped before encoding; pdfium renders onto an opaque white background,
//! so nothing visible is lost.

use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

/// MIME type of every raster asset.
pub const RASTER_MIME: &str = "image/jpeg";

/// File extension of every raster asset.
pub const RASTER_EXTENSION: &str = "jpg";

/// Encode an image as RGB JPEG at `quality` (1–100).
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode_image(&rgb)?;
    debug!(
        "Encoded {}x{} image → {} bytes (q={})",
        rgb.width(),
        rgb.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 128])));
        let data = encode_jpeg(&img, 80).expect("encode should succeed");
        // JPEG SOI marker
        assert_eq!(&data[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&data).expect("valid jpeg");
        assert_eq!(decoded.dimensions(), (10, 10));
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn lower_quality_is_smaller() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
        }));
        let high = encode_jpeg(&img, 95).unwrap();
        let low = encode_jpeg(&img, 20).unwrap();
        assert!(low.len() < high.len());
    }
}
