use image::RgbImage;
use std::path::Path;
use std::time::Duration;

use crate::error::VideoError;

const FALLBACK_FPS: f64 = 30.0;

/// Stream properties fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl VideoInfo {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self { width, height, fps }
    }

    /// Whole frames per second, never below 1. Used for the writer and the
    /// override window.
    pub fn nominal_fps(&self) -> u32 {
        if self.fps.is_finite() && self.fps >= 1.0 {
            self.fps.round() as u32
        } else {
            1
        }
    }

    /// Delay between two deliveries when pacing to the source rate.
    pub fn frame_interval(&self) -> Duration {
        let fps = if self.fps.is_finite() && self.fps > 0.0 {
            self.fps
        } else {
            FALLBACK_FPS
        };
        Duration::from_secs_f64(1.0 / fps)
    }

    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

/// Sequential RGB frame reader over one input file.
pub trait VideoDecoder: Send {
    fn info(&self) -> VideoInfo;

    /// Next frame in presentation order, `Ok(None)` once the stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError>;
}

/// Incremental writer for one output file.
pub trait VideoEncoder: Send {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), VideoError>;

    /// Flushes and releases the underlying writer. Later writes fail with
    /// `VideoError::WriterClosed`.
    fn finish(&mut self) -> Result<(), VideoError>;
}

/// Opens decoders and encoders. Implemented over ffmpeg for real files and by
/// in-memory doubles in tests.
pub trait VideoBackend: Send + Sync {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn VideoDecoder>, VideoError>;

    fn open_encoder(
        &self,
        path: &Path,
        info: &VideoInfo,
    ) -> Result<Box<dyn VideoEncoder>, VideoError>;
}
