//! Shared fixtures for the integration tests
//!
//! The removers here stand in for a segmentation model so the tests run
//! without model files.

#![allow(dead_code)]

use bgremove_canvas::{BackgroundRemover, BatchConfig, CanvasError, RemoverFactory, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

/// Makes near-white pixels transparent and keeps everything else opaque
#[derive(Debug, Default)]
pub struct WhiteKeyRemover;

impl BackgroundRemover for WhiteKeyRemover {
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        Ok(images
            .into_iter()
            .map(|image| {
                let mut rgba = image.to_rgba8();
                for pixel in rgba.pixels_mut() {
                    if pixel[0] > 240 && pixel[1] > 240 && pixel[2] > 240 {
                        *pixel = Rgba([0, 0, 0, 0]);
                    }
                }
                DynamicImage::ImageRgba8(rgba)
            })
            .collect())
    }

    fn name(&self) -> &str {
        "white-key"
    }
}

/// Fails for images of one width and keys the rest like [`WhiteKeyRemover`]
#[derive(Debug)]
pub struct FailOnWidthRemover {
    pub width: u32,
}

impl BackgroundRemover for FailOnWidthRemover {
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        if images.iter().any(|image| image.width() == self.width) {
            return Err(CanvasError::inference("segmentation failed"));
        }
        WhiteKeyRemover.remove_backgrounds(images)
    }

    fn name(&self) -> &str {
        "fail-on-width"
    }
}

/// Records the size of every image it sees
#[derive(Debug, Default, Clone)]
pub struct RecordingRemover {
    pub seen: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl BackgroundRemover for RecordingRemover {
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.extend(images.iter().map(|image| (image.width(), image.height())));
        }
        WhiteKeyRemover.remove_backgrounds(images)
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Waits for a release signal before handling each image
pub struct GatedRemover {
    gate: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl BackgroundRemover for GatedRemover {
    fn remove_backgrounds(&mut self, images: Vec<DynamicImage>) -> Result<Vec<DynamicImage>> {
        // A dropped sender opens the gate for good
        if let Ok(gate) = self.gate.lock() {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        WhiteKeyRemover.remove_backgrounds(images)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Factory building a fresh remover per batch from `make`
pub fn factory_of<R, F>(make: F) -> Arc<dyn RemoverFactory>
where
    R: BackgroundRemover + 'static,
    F: Fn() -> R + Send + Sync + 'static,
{
    Arc::new(move |_config: &BatchConfig| -> Result<Box<dyn BackgroundRemover>> {
        Ok(Box::new(make()))
    })
}

/// Factory counting how many removers it created
pub fn counting_factory(created: Arc<AtomicUsize>) -> Arc<dyn RemoverFactory> {
    factory_of(move || {
        created.fetch_add(1, Ordering::SeqCst);
        WhiteKeyRemover
    })
}

/// Factory whose removers block until the returned sender releases them
///
/// Each `send` lets one image through; dropping the sender opens the gate.
pub fn gated_factory() -> (Arc<dyn RemoverFactory>, mpsc::Sender<()>) {
    let (sender, receiver) = mpsc::channel();
    let gate = Arc::new(Mutex::new(receiver));
    let factory = factory_of(move || GatedRemover {
        gate: Arc::clone(&gate),
    });
    (factory, sender)
}

/// Factory that always fails, like a missing model
pub fn failing_factory() -> Arc<dyn RemoverFactory> {
    Arc::new(|_config: &BatchConfig| -> Result<Box<dyn BackgroundRemover>> {
        Err(CanvasError::model("Model file not found"))
    })
}

/// A white image with a centered colored block covering half of each side
pub fn subject_on_white(width: u32, height: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    for y in height / 4..height * 3 / 4 {
        for x in width / 4..width * 3 / 4 {
            image.put_pixel(x, y, Rgb([200, 30, 30]));
        }
    }
    image
}

/// Write a solid opaque JPEG
pub fn write_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([40, 90, 160]))
        .save_with_format(&path, ImageFormat::Jpeg)
        .expect("Failed to write JPEG fixture");
    path
}

/// Write a PNG with a subject on a white background
pub fn write_subject_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    subject_on_white(width, height)
        .save_with_format(&path, ImageFormat::Png)
        .expect("Failed to write PNG fixture");
    path
}

/// Write bytes that no decoder accepts under an image extension
pub fn write_corrupt(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"definitely not an image").expect("Failed to write corrupt fixture");
    path
}

/// Entry names of a ZIP archive, in archive order
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).expect("Failed to open archive");
    let mut archive = zip::ZipArchive::new(file).expect("Archive is not a valid ZIP");
    (0..archive.len())
        .map(|i| {
            archive
                .by_index(i)
                .expect("Failed to read archive entry")
                .name()
                .to_string()
        })
        .collect()
}

/// Decode one archive entry as an image
pub fn archive_image(path: &Path, entry: &str) -> DynamicImage {
    use std::io::Read;

    let file = std::fs::File::open(path).expect("Failed to open archive");
    let mut archive = zip::ZipArchive::new(file).expect("Archive is not a valid ZIP");
    let mut bytes = Vec::new();
    archive
        .by_name(entry)
        .expect("Entry missing from archive")
        .read_to_end(&mut bytes)
        .expect("Failed to read archive entry");
    image::load_from_memory_with_format(&bytes, ImageFormat::Png).expect("Entry is not a PNG")
}
