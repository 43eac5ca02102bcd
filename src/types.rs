//! Core types shared by the pipeline, the batch processor and the dispatcher

use crate::error::{CanvasError, Result};
use chrono::{DateTime, Utc};
use image::metadata::Orientation;
use image::{DynamicImage, ImageBuffer, Luma, Rgba};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A decoded raster together with its orientation metadata
///
/// Every pipeline stage consumes one of these and returns a new one.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub image: DynamicImage,
    /// Orientation still to be applied (`None` when the file carried none)
    pub orientation: Option<Orientation>,
}

impl SourceImage {
    /// Wrap an image that carries no orientation metadata
    #[must_use]
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image,
            orientation: None,
        }
    }

    #[must_use]
    pub fn with_orientation(image: DynamicImage, orientation: Orientation) -> Self {
        Self {
            image,
            orientation: Some(orientation),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    /// Whether the pixel mode carries an alpha channel
    #[must_use]
    pub fn has_alpha(&self) -> bool {
        self.image.color().has_alpha()
    }

    /// Replace the pixels while keeping the orientation metadata
    #[must_use]
    pub fn map_image<F>(self, f: F) -> Self
    where
        F: FnOnce(DynamicImage) -> DynamicImage,
    {
        Self {
            image: f(self.image),
            orientation: self.orientation,
        }
    }
}

impl From<DynamicImage> for SourceImage {
    fn from(image: DynamicImage) -> Self {
        Self::new(image)
    }
}

/// Foreground probability mask (0 = background, 255 = foreground)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Mask data as grayscale values (0-255), row-major
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Convert mask to a grayscale image
    ///
    /// # Errors
    /// Returns `CanvasError::Processing` when data length and dimensions disagree
    pub fn to_image(&self) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (width, height) = self.dimensions;
        ImageBuffer::from_raw(width, height, self.data.clone())
            .ok_or_else(|| CanvasError::processing("Failed to create image from mask data"))
    }

    /// Write the mask into the alpha channel of an RGBA image
    ///
    /// Pixels whose mask value is zero become fully transparent black.
    ///
    /// # Errors
    /// Returns `CanvasError::Processing` when image and mask sizes differ
    pub fn apply_to_image(&self, image: &mut ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<()> {
        if image.dimensions() != self.dimensions {
            return Err(CanvasError::processing(format!(
                "Image {:?} and mask {:?} dimensions do not match",
                image.dimensions(),
                self.dimensions
            )));
        }

        for (pixel, &alpha) in image.pixels_mut().zip(self.data.iter()) {
            if alpha == 0 {
                *pixel = Rgba([0, 0, 0, 0]);
            } else {
                pixel[3] = alpha;
            }
        }

        Ok(())
    }

    /// Share of pixels considered foreground (> 127)
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&x| x > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Outcome of a single batch item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemOutcome {
    /// Written into the archive under this entry name
    Processed { entry_name: String },
    /// Skipped; the batch continued
    Failed { reason: String },
}

/// One `(input, outcome)` pair of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    pub input: PathBuf,
    pub outcome: ItemOutcome,
}

impl ItemResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Processed { .. })
    }
}

/// The compressed archive produced by a batch
///
/// The file outlives the batch. It is removed with [`BatchArchive::discard`]
/// once the user has saved it or the session resets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchArchive {
    path: PathBuf,
    entries: usize,
    created_at: DateTime<Utc>,
}

impl BatchArchive {
    #[must_use]
    pub fn new(path: PathBuf, entries: usize) -> Self {
        Self {
            path,
            entries,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of processed images in the archive
    #[must_use]
    pub fn entries(&self) -> usize {
        self.entries
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Copy the archive to a user-chosen location, returning the bytes written
    ///
    /// # Errors
    /// - The archive no longer exists
    /// - The destination cannot be written
    pub fn save_to<P: AsRef<Path>>(&self, destination: P) -> Result<u64> {
        let destination = destination.as_ref();
        if !self.exists() {
            return Err(CanvasError::processing(format!(
                "No archive available at '{}'",
                self.path.display()
            )));
        }
        let bytes = std::fs::copy(&self.path, destination)
            .map_err(|e| CanvasError::file_io_error("save archive to", destination, &e))?;
        tracing::info!(
            archive = %self.path.display(),
            destination = %destination.display(),
            bytes,
            "Archive saved"
        );
        Ok(bytes)
    }

    /// Delete the archive file; a missing file is not an error
    ///
    /// # Errors
    /// Returns `CanvasError::Io` when the file exists but cannot be removed
    pub fn discard(self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(archive = %self.path.display(), "Archive discarded");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CanvasError::file_io_error("remove archive", &self.path, &e)),
        }
    }
}

/// Everything a finished batch hands back to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Per-input outcomes, in input order
    pub items: Vec<ItemResult>,
    pub archive: BatchArchive,
    pub total_ms: u64,
}

impl BatchResult {
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }

    /// Entry names in archive order
    #[must_use]
    pub fn entry_names(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Processed { entry_name } => Some(entry_name.as_str()),
                ItemOutcome::Failed { .. } => None,
            })
            .collect()
    }
}
