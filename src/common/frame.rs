use chrono::{DateTime, Local};
use image::RgbImage;
use std::sync::Arc;

/// One decoded video frame. Indices start at 1 and increase by one per frame.
#[derive(Clone, Debug)]
pub struct Frame {
    index: u64,
    image: Arc<RgbImage>,
    captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(index: u64, image: RgbImage, captured_at: DateTime<Local>) -> Self {
        Self {
            index,
            image: Arc::new(image),
            captured_at,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbImage> {
        Arc::clone(&self.image)
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
