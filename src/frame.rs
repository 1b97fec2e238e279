use chrono::{DateTime, Local};
use image::RgbImage;
use std::sync::Arc;

/// One decoded frame. Pixels are shared, so cloning a frame into the
/// pre-roll buffer or a worker task does not copy the image.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub captured_at: DateTime<Local>,
    pub pixels: Arc<RgbImage>,
}

impl Frame {
    pub fn new(index: u64, captured_at: DateTime<Local>, pixels: RgbImage) -> Self {
        Self {
            index,
            captured_at,
            pixels: Arc::new(pixels),
        }
    }

    /// Frame of a single flat colour, handy for synthetic streams.
    pub fn blank(index: u64, captured_at: DateTime<Local>, width: u32, height: u32) -> Self {
        Self::new(index, captured_at, RgbImage::new(width, height))
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Same index and timestamp, different pixels.
    pub fn with_pixels(&self, pixels: RgbImage) -> Self {
        Self {
            index: self.index,
            captured_at: self.captured_at,
            pixels: Arc::new(pixels),
        }
    }
}
