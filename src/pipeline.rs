//! Single-image pipeline
//!
//! Turns one decoded image into a fixed-size RGB canvas with the cut-out
//! subject scaled into the content box and centered:
//!
//! 1. landscape inputs are turned upright
//! 2. one call into the background remover
//! 3. transparent borders are trimmed
//! 4. orientation metadata is applied
//! 5. the subject is resized into the content box
//! 6. a blank canvas is filled with the background color
//! 7. the subject is overlaid centered, blended through its alpha

use crate::{
    config::CanvasConfig,
    error::{CanvasError, Result},
    geometry::{auto_rotate, calculate_target_size_within, ensure_portrait, trim_transparent_borders},
    remover::BackgroundRemover,
    types::SourceImage,
};
use image::{imageops, DynamicImage, RgbImage, Rgba, RgbaImage};
use tracing::{instrument, trace};

/// Canvas normalization around a background remover
#[derive(Debug, Clone, Default)]
pub struct CanvasPipeline {
    canvas: CanvasConfig,
}

impl CanvasPipeline {
    /// # Errors
    /// Returns `CanvasError::InvalidConfig` for geometry that cannot hold the
    /// content box, such as content bounds larger than the canvas
    pub fn new(canvas: CanvasConfig) -> Result<Self> {
        canvas.validate()?;
        Ok(Self { canvas })
    }

    #[must_use]
    pub fn canvas(&self) -> &CanvasConfig {
        &self.canvas
    }

    /// Run the full pipeline on one image
    ///
    /// # Errors
    /// - Remover failures, propagated unchanged
    /// - Remover returning a list of the wrong length
    /// - A subject too thin to scale to at least one pixel
    #[instrument(skip_all, fields(width = source.width(), height = source.height()))]
    pub fn process(
        &self,
        source: SourceImage,
        remover: &mut dyn BackgroundRemover,
    ) -> Result<RgbImage> {
        let SourceImage { image, orientation } = ensure_portrait(source);

        let mut cutouts = remover.remove_backgrounds(vec![image])?;
        let cutout = match (cutouts.pop(), cutouts.is_empty()) {
            (Some(cutout), true) => cutout,
            (popped, _) => {
                return Err(CanvasError::inference(format!(
                    "Background remover '{}' returned {} images for 1 input",
                    remover.name(),
                    cutouts.len() + usize::from(popped.is_some())
                )));
            },
        };

        let trimmed = trim_transparent_borders(SourceImage { image: cutout, orientation });
        let upright = auto_rotate(trimmed);
        self.compose(&upright.image)
    }

    /// Resize a cut-out into the content box and paste it onto a fresh canvas
    ///
    /// # Errors
    /// Returns `CanvasError::Processing` when the subject would scale to zero
    /// pixels on one side
    pub fn compose(&self, subject: &DynamicImage) -> Result<RgbImage> {
        let canvas_config = &self.canvas;
        let (target_width, target_height) = calculate_target_size_within(
            subject.width(),
            subject.height(),
            canvas_config.max_content_width,
            canvas_config.max_content_height,
        )?;
        if target_width == 0 || target_height == 0 {
            return Err(CanvasError::processing_stage_error(
                "resize",
                "subject scales to an empty image",
                Some(&format!("{}x{}", subject.width(), subject.height())),
            ));
        }

        let resized = subject.resize_exact(
            target_width,
            target_height,
            canvas_config.resize_filter.into(),
        );

        let [red, green, blue] = canvas_config.background;
        let mut canvas = RgbaImage::from_pixel(
            canvas_config.width,
            canvas_config.height,
            Rgba([red, green, blue, u8::MAX]),
        );
        let offset_x = canvas_config.width.saturating_sub(target_width) / 2;
        let offset_y = canvas_config.height.saturating_sub(target_height) / 2;
        trace!(target_width, target_height, offset_x, offset_y, "Pasting subject");

        imageops::overlay(
            &mut canvas,
            &resized.to_rgba8(),
            i64::from(offset_x),
            i64::from(offset_y),
        );

        Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
    }
}
