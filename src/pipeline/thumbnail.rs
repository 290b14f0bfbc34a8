//! Thumbnail generation from the first rendered page.
//!
//! Pure function: decode → Lanczos3 resize → JPEG encode. Running it twice
//! on the same bytes with the same settings gives the same dimensions.

use crate::pipeline::encode::encode_jpeg;
use image::imageops::FilterType;
use image::GenericImageView;

/// An encoded thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
}

/// Height that keeps the source aspect ratio at `target_width`.
pub fn thumbnail_height(src_width: u32, src_height: u32, target_width: u32) -> u32 {
    if src_width == 0 {
        return target_width.max(1);
    }
    let h = (src_height as f64 * target_width as f64 / src_width as f64).round() as u32;
    h.max(1)
}

/// Build a thumbnail from the encoded bytes of a rendered page.
pub fn generate_thumbnail(
    page_bytes: &[u8],
    target_width: u32,
    quality: u8,
) -> Result<Thumbnail, image::ImageError> {
    let source = image::load_from_memory(page_bytes)?;
    let (w, h) = source.dimensions();
    let target_width = target_width.max(1);
    let target_height = thumbnail_height(w, h, target_width);

    let resized = source.resize_exact(target_width, target_height, FilterType::Lanczos3);
    drop(source);

    let bytes = encode_jpeg(&resized, quality)?;
    Ok(Thumbnail {
        bytes,
        width: target_width,
        height: target_height,
        quality,
    })
}
