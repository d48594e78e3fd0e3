//! Bounding fetched photos before they are captioned and published.
//!
//! Phone photos are often several megabytes. Each incoming file is scaled
//! down in place to fit `[image_resize]`, with its EXIF orientation baked
//! into the pixels since re-encoding drops the tag.

use std::io::Cursor;
use std::path::Path;

use exif::{In, Reader, Tag};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use tracing::debug;

use photoblog_shared::{ImageResizeConfig, PhotoblogError, Result};

/// What [`resize_in_place`] did to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Already within bounds; the file was not rewritten.
    Unchanged { width: u32, height: u32 },
    Resized { from: (u32, u32), to: (u32, u32) },
}

/// Scale the image at `path` to fit `max_width` x `max_height`.
///
/// Sizes are compared after EXIF orientation is applied, so a portrait shot
/// stored sideways is bounded by its displayed shape. JPEGs are re-encoded
/// at `quality`; other formats keep their own encoder.
pub fn resize_in_place(path: &Path, config: &ImageResizeConfig) -> Result<ResizeOutcome> {
    let bytes = std::fs::read(path).map_err(|e| PhotoblogError::io(path, e))?;
    let format = image::guess_format(&bytes).map_err(|e| image_error(path, e))?;
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| image_error(path, e))?;

    let img = orient(decoded, exif_orientation(&bytes));
    let from = (img.width(), img.height());
    if from.0 <= config.max_width && from.1 <= config.max_height {
        return Ok(ResizeOutcome::Unchanged {
            width: from.0,
            height: from.1,
        });
    }

    let resized = img.resize(config.max_width, config.max_height, FilterType::Lanczos3);
    let to = (resized.width(), resized.height());
    let encoded = encode(&resized, format, config.quality).map_err(|e| image_error(path, e))?;

    let tmp = path.with_extension("resize.tmp");
    std::fs::write(&tmp, &encoded).map_err(|e| PhotoblogError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PhotoblogError::io(path, e))?;

    debug!(path = %path.display(), ?from, ?to, bytes = encoded.len(), "image resized");
    Ok(ResizeOutcome::Resized { from, to })
}

/// EXIF orientation tag, 1 when absent or unreadable.
fn exif_orientation(bytes: &[u8]) -> u32 {
    Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()
        .and_then(|r| r.get_field(Tag::Orientation, In::PRIMARY)?.value.get_uint(0))
        .unwrap_or(1)
}

/// Rotate/flip so the pixels match how the photo is meant to be displayed.
fn orient(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> image::ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    if format == ImageFormat::Jpeg {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        encoder.encode_image(&img.to_rgb8())?;
    } else {
        img.write_to(&mut Cursor::new(&mut buf), format)?;
    }
    Ok(buf)
}

fn image_error(path: &Path, e: image::ImageError) -> PhotoblogError {
    PhotoblogError::Image(format!("{}: {e}", path.display()))
}
