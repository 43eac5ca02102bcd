//! Tensor conversion between images and segmentation models
//!
//! Images are letterboxed into the square model input (aspect preserved,
//! centered, white padding) and the mask tensor is mapped back through the
//! inverse of that transform.

use crate::{
    error::{CanvasError, Result},
    models::PreprocessingConfig,
    types::SegmentationMask,
};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Letterbox placement of an image inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Scale applied to the original image
    pub scale: f32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub target_size: u32,
}

impl Letterbox {
    /// Compute the placement of a `width` x `height` image in a `target_size` square
    #[must_use]
    pub fn compute(width: u32, height: u32, target_size: u32) -> Self {
        let target = target_size as f32;
        let scale = (target / width.max(1) as f32).min(target / height.max(1) as f32);

        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            scale,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
            scaled_width,
            scaled_height,
            target_size,
        }
    }
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Convert an image into a normalized NCHW tensor for the model
    ///
    /// # Errors
    /// Returns `CanvasError::Processing` for empty images or a zero target size
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<Array4<f32>> {
        let target_size = preprocessing_config.target_size[0];
        if target_size == 0 {
            return Err(CanvasError::processing("Model target size is zero"));
        }

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(CanvasError::processing_stage_error(
                "preprocessing",
                "image has no pixels",
                Some(&format!("{orig_width}x{orig_height}")),
            ));
        }

        let letterbox = Letterbox::compute(orig_width, orig_height, target_size);
        let resized = image::imageops::resize(
            &rgb_image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            image::imageops::FilterType::Triangle,
        );

        let mut canvas = ImageBuffer::from_pixel(target_size, target_size, image::Rgb([255, 255, 255]));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );

        Ok(Self::canvas_to_tensor(
            &canvas,
            preprocessing_config,
            target_size as usize,
        ))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(
        canvas: &RgbImage,
        preprocessing_config: &PreprocessingConfig,
        target_size: usize,
    ) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, target_size, target_size));
        let mean = preprocessing_config.normalization_mean;
        let std = preprocessing_config.normalization_std;

        for (x, y, pixel) in canvas.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for channel in 0..3 {
                let value = (f32::from(pixel[channel]) / 255.0 - mean[channel]) / std[channel];
                if let Some(slot) = tensor.get_mut([0, channel, y, x]) {
                    *slot = value;
                }
            }
        }

        tensor
    }

    /// Map a `(1, 1, S, S)` model output back onto the original image size
    ///
    /// # Errors
    /// Returns `CanvasError::Inference` for an unexpected tensor shape
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let shape = tensor.shape();
        let (batch, channels, mask_height, mask_width) = match shape {
            [b, c, h, w] => (*b, *c, *h, *w),
            _ => return Err(CanvasError::inference("Invalid output tensor shape")),
        };
        if batch != 1 || channels != 1 || mask_width == 0 || mask_height == 0 {
            return Err(CanvasError::inference(format!(
                "Expected (1, 1, H, W) mask tensor, got {shape:?}"
            )));
        }

        let (orig_width, orig_height) = original_dimensions;
        // Square model input assumed, as in preprocessing
        let letterbox = Letterbox::compute(orig_width, orig_height, mask_width as u32);
        let mut data = Vec::with_capacity((orig_width * orig_height) as usize);

        for y in 0..orig_height {
            for x in 0..orig_width {
                let tensor_x = (x as f32 * letterbox.scale).round() as u32 + letterbox.offset_x;
                let tensor_y = (y as f32 * letterbox.scale).round() as u32 + letterbox.offset_y;
                let value = tensor
                    .get([0, 0, tensor_y as usize, tensor_x as usize])
                    .copied()
                    .unwrap_or(0.0);
                data.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }

        Ok(SegmentationMask::new(data, original_dimensions))
    }
}
