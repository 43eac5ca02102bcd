//! Pure geometry helpers used by the canvas pipeline

use crate::config::{MAX_CONTENT_HEIGHT, MAX_CONTENT_WIDTH};
use crate::error::{CanvasError, Result};
use crate::types::SourceImage;
use image::metadata::Orientation;
use image::{DynamicImage, GenericImageView};

/// Bounding box `(x, y, width, height)` of the pixels whose alpha is non-zero
///
/// Returns `None` for a fully transparent image. Images without an alpha
/// channel are opaque everywhere, so their box is the whole image.
#[must_use]
pub fn alpha_bounding_box(image: &DynamicImage) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return None;
    }
    if !image.color().has_alpha() {
        return Some((0, 0, width, height));
    }

    let rgba = image.to_rgba8();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut found = false;

    for (x, y, pixel) in rgba.enumerate_pixels() {
        if pixel[3] != 0 {
            found = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }

    found.then(|| (min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

/// Crop away fully transparent borders
///
/// A fully transparent image has no bounding box and is returned unchanged,
/// as is an image whose box already covers every pixel.
#[must_use]
pub fn trim_transparent_borders(source: SourceImage) -> SourceImage {
    match alpha_bounding_box(&source.image) {
        Some((x, y, w, h)) if (x, y, w, h) != (0, 0, source.width(), source.height()) => {
            tracing::trace!(x, y, w, h, "Trimming transparent borders");
            source.map_image(|image| image.crop_imm(x, y, w, h))
        },
        _ => source,
    }
}

/// Size of the scaled subject inside the default 1400x2400 content box
///
/// # Errors
/// Returns `CanvasError::Processing` for a zero dimension
pub fn calculate_target_size(original_width: u32, original_height: u32) -> Result<(u32, u32)> {
    calculate_target_size_within(
        original_width,
        original_height,
        MAX_CONTENT_WIDTH,
        MAX_CONTENT_HEIGHT,
    )
}

/// Size of the scaled subject inside a `max_width` x `max_height` box
///
/// `scale = min(max_width / w, max_height / h)`; each side is floored and then
/// clamped to the box. Small inputs are scaled up to touch the box.
///
/// # Errors
/// Returns `CanvasError::Processing` for a zero dimension
pub fn calculate_target_size_within(
    original_width: u32,
    original_height: u32,
    max_width: u32,
    max_height: u32,
) -> Result<(u32, u32)> {
    if original_width == 0 || original_height == 0 {
        return Err(CanvasError::processing_stage_error(
            "resize",
            "cannot scale an image with a zero dimension",
            Some(&format!("{original_width}x{original_height}")),
        ));
    }

    let width_ratio = f64::from(max_width) / f64::from(original_width);
    let height_ratio = f64::from(max_height) / f64::from(original_height);
    let scale = width_ratio.min(height_ratio);

    let new_width = (f64::from(original_width) * scale).floor() as u32;
    let new_height = (f64::from(original_height) * scale).floor() as u32;

    Ok((new_width.min(max_width), new_height.min(max_height)))
}

/// Apply the orientation metadata to the pixels and mark it as applied
#[must_use]
pub fn auto_rotate(source: SourceImage) -> SourceImage {
    match source.orientation {
        None | Some(Orientation::NoTransforms) => source,
        Some(orientation) => {
            tracing::trace!(?orientation, "Applying orientation metadata");
            let mut image = source.image;
            image.apply_orientation(orientation);
            SourceImage::with_orientation(image, Orientation::NoTransforms)
        },
    }
}

/// Turn landscape images upright
///
/// Landscape images get three counter-clockwise quarter turns (one clockwise
/// quarter turn); square and portrait images are left alone. Orientation
/// metadata is carried over untouched.
#[must_use]
pub fn ensure_portrait(source: SourceImage) -> SourceImage {
    if source.width() > source.height() {
        source.map_image(|image| image.rotate90())
    } else {
        source
    }
}
