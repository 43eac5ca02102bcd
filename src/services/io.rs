//! Image decode/encode and output naming
//!
//! Keeps file access out of the pipeline so the pipeline stays pure.

use crate::{
    error::{CanvasError, Result},
    types::SourceImage,
};
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::path::Path;

/// File extensions accepted as input (compared case-insensitively)
pub const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpeg", "jpg", "heic"];

/// Service for handling image file input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Whether the path carries one of [`SUPPORTED_EXTENSIONS`]
    pub fn is_supported_extension<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SUPPORTED_EXTENSIONS
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
    }

    /// Decode an image file together with its orientation metadata
    ///
    /// The format is detected from the content, so a misnamed file still
    /// decodes. HEIC files go through libheif when the `heic` feature is
    /// enabled; libheif applies their rotation itself.
    ///
    /// # Errors
    /// - File missing or unreadable
    /// - Content not decodable as an image
    /// - `UnsupportedFormat` for HEIC without the `heic` feature, or content
    ///   that matches no known format
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<SourceImage> {
        let path_ref = path.as_ref();

        if is_heic(path_ref) {
            return load_heic(path_ref);
        }

        let reader = ImageReader::open(path_ref)
            .map_err(|e| CanvasError::file_io_error("open image", path_ref, &e))?
            .with_guessed_format()
            .map_err(|e| CanvasError::file_io_error("read image header", path_ref, &e))?;
        let Some(format) = reader.format() else {
            return Err(CanvasError::unsupported_format(format!(
                "cannot recognize the content of '{}'",
                path_ref.display()
            )));
        };

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| CanvasError::image_load_error(path_ref, &e))?;
        let orientation = decoder.orientation().ok();
        let image = DynamicImage::from_decoder(decoder)
            .map_err(|e| CanvasError::image_load_error(path_ref, &e))?;

        log::debug!(
            "Decoded {} ({:?}, {}x{}, orientation {:?})",
            path_ref.display(),
            format,
            image.width(),
            image.height(),
            orientation
        );

        Ok(SourceImage { image, orientation })
    }

    /// Encode an image as PNG at `path`
    ///
    /// # Errors
    /// - Parent directory cannot be created
    /// - Encoding or writing fails
    pub fn save_png<P: AsRef<Path>>(image: &DynamicImage, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CanvasError::file_io_error("create output directory", parent, &e))?;
        }

        image
            .save_with_format(path_ref, ImageFormat::Png)
            .map_err(|e| {
                CanvasError::processing_stage_error(
                    "encode",
                    &format!("failed to write PNG: {e}"),
                    Some(&path_ref.display().to_string()),
                )
            })
    }

    /// `<stem><suffix>.png` for an input path
    ///
    /// # Errors
    /// Returns `CanvasError::Processing` when the path has no usable file stem
    pub fn output_file_name<P: AsRef<Path>>(input: P, suffix: &str) -> Result<String> {
        let input = input.as_ref();
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CanvasError::processing(format!(
                    "Cannot derive an output name from '{}'",
                    input.display()
                ))
            })?;
        Ok(format!("{stem}{suffix}.png"))
    }
}

fn is_heic(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("heic"))
}

#[cfg(not(feature = "heic"))]
fn load_heic(path: &Path) -> Result<SourceImage> {
    Err(CanvasError::unsupported_format(format!(
        "'{}' is HEIC, which needs the `heic` feature",
        path.display()
    )))
}

#[cfg(feature = "heic")]
fn load_heic(path: &Path) -> Result<SourceImage> {
    use image::RgbaImage;
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let heif_error = |e: libheif_rs::HeifError| {
        CanvasError::processing_stage_error(
            "decode",
            &format!("libheif: {e}"),
            Some(&path.display().to_string()),
        )
    };

    let path_str = path.to_str().ok_or_else(|| {
        CanvasError::unsupported_format(format!("non UTF-8 path '{}'", path.display()))
    })?;
    let lib_heif = LibHeif::new();
    let context = HeifContext::read_from_file(path_str).map_err(heif_error)?;
    let handle = context.primary_image_handle().map_err(heif_error)?;
    let decoded = lib_heif
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgba), None)
        .map_err(heif_error)?;

    let planes = decoded.planes();
    let plane = planes.interleaved.ok_or_else(|| {
        CanvasError::processing_stage_error(
            "decode",
            "libheif returned no interleaved plane",
            Some(&path.display().to_string()),
        )
    })?;

    // Rows may be padded past width * 4
    let row_bytes = plane.width as usize * 4;
    let mut pixels = Vec::with_capacity(row_bytes * plane.height as usize);
    for row in 0..plane.height as usize {
        let start = row * plane.stride;
        let bytes = plane.data.get(start..start + row_bytes).ok_or_else(|| {
            CanvasError::processing("libheif plane is shorter than its dimensions")
        })?;
        pixels.extend_from_slice(bytes);
    }
    let rgba = RgbaImage::from_raw(plane.width, plane.height, pixels)
        .ok_or_else(|| CanvasError::processing("libheif plane size mismatch"))?;

    log::debug!(
        "Decoded {} (HEIC, {}x{})",
        path.display(),
        rgba.width(),
        rgba.height()
    );

    Ok(SourceImage {
        image: DynamicImage::ImageRgba8(rgba),
        orientation: None,
    })
}
