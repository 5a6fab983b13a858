//! In-memory video backend and scripted classifier for tests.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::Phase;
use crate::error::{InferenceError, VideoError};
use crate::video::{VideoBackend, VideoDecoder, VideoEncoder, VideoInfo};

/// Paints every pixel with the frame index so it survives the overlay banner.
pub fn indexed_image(width: u32, height: u32, index: u64) -> RgbImage {
    RgbImage::from_pixel(
        width,
        height,
        Rgb([index as u8, (index >> 8) as u8, (index >> 16) as u8]),
    )
}

/// Reads back the index painted by [`indexed_image`] from the bottom-right pixel.
pub fn frame_index_of(image: &RgbImage) -> u64 {
    let (w, h) = image.dimensions();
    let [r, g, b] = image.get_pixel(w - 1, h - 1).0;
    r as u64 | (g as u64) << 8 | (b as u64) << 16
}

#[derive(Default)]
struct Shared {
    decoder_released: AtomicBool,
    encoders_opened: AtomicUsize,
    encoder_finished: AtomicBool,
    written: Mutex<Vec<u64>>,
}

#[derive(Clone)]
pub struct MemoryBackendBuilder {
    frames: u64,
    info: VideoInfo,
    missing: HashSet<PathBuf>,
    fail_read_at: Option<u64>,
    fail_encoder_open: bool,
    fail_writes: bool,
    read_delay: Option<Duration>,
}

impl MemoryBackendBuilder {
    pub fn new() -> Self {
        Self {
            frames: 10,
            info: VideoInfo::new(320, 240, 30.0),
            missing: HashSet::new(),
            fail_read_at: None,
            fail_encoder_open: false,
            fail_writes: false,
            read_delay: None,
        }
    }

    pub fn frames(mut self, frames: u64) -> Self {
        self.frames = frames;
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.info.width = width;
        self.info.height = height;
        self
    }

    pub fn fps(mut self, fps: f64) -> Self {
        self.info.fps = fps;
        self
    }

    pub fn missing(mut self, path: impl Into<PathBuf>) -> Self {
        self.missing.insert(path.into());
        self
    }

    pub fn fail_read_at(mut self, index: u64) -> Self {
        self.fail_read_at = Some(index);
        self
    }

    pub fn fail_encoder_open(mut self) -> Self {
        self.fail_encoder_open = true;
        self
    }

    pub fn fail_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn build(self) -> MemoryBackend {
        MemoryBackend {
            config: self,
            shared: Arc::new(Shared::default()),
        }
    }
}

pub struct MemoryBackend {
    config: MemoryBackendBuilder,
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn decoder_released(&self) -> bool {
        self.shared.decoder_released.load(Ordering::SeqCst)
    }

    pub fn encoders_opened(&self) -> usize {
        self.shared.encoders_opened.load(Ordering::SeqCst)
    }

    pub fn encoder_finished(&self) -> bool {
        self.shared.encoder_finished.load(Ordering::SeqCst)
    }

    /// Frame indices in the order the encoder received them.
    pub fn written_indices(&self) -> Vec<u64> {
        self.shared
            .written
            .lock()
            .map(|written| written.clone())
            .unwrap_or_default()
    }
}

impl VideoBackend for MemoryBackend {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn VideoDecoder>, VideoError> {
        if self.config.missing.contains(path) {
            return Err(VideoError::NotFound(path.to_path_buf()));
        }
        Ok(Box::new(MemoryDecoder {
            info: self.config.info,
            total: self.config.frames,
            next: 0,
            fail_read_at: self.config.fail_read_at,
            read_delay: self.config.read_delay,
            shared: Arc::clone(&self.shared),
        }))
    }

    fn open_encoder(
        &self,
        _path: &Path,
        info: &VideoInfo,
    ) -> Result<Box<dyn VideoEncoder>, VideoError> {
        if self.config.fail_encoder_open {
            return Err(VideoError::Spawn {
                binary: "memory".to_string(),
                source: std::io::Error::other("encoder unavailable"),
            });
        }
        self.shared.encoders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryEncoder {
            expected: (info.width, info.height),
            fail_writes: self.config.fail_writes,
            closed: false,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct MemoryDecoder {
    info: VideoInfo,
    total: u64,
    next: u64,
    fail_read_at: Option<u64>,
    read_delay: Option<Duration>,
    shared: Arc<Shared>,
}

impl VideoDecoder for MemoryDecoder {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        if let Some(delay) = self.read_delay {
            std::thread::sleep(delay);
        }
        self.next += 1;
        if self.fail_read_at == Some(self.next) {
            return Err(VideoError::Read(std::io::Error::other("corrupt packet")));
        }
        if self.next > self.total {
            return Ok(None);
        }
        Ok(Some(indexed_image(self.info.width, self.info.height, self.next)))
    }
}

impl Drop for MemoryDecoder {
    fn drop(&mut self) {
        self.shared.decoder_released.store(true, Ordering::SeqCst);
    }
}

struct MemoryEncoder {
    expected: (u32, u32),
    fail_writes: bool,
    closed: bool,
    shared: Arc<Shared>,
}

impl VideoEncoder for MemoryEncoder {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), VideoError> {
        if self.closed {
            return Err(VideoError::WriterClosed);
        }
        if image.dimensions() != self.expected {
            return Err(VideoError::FrameSize {
                expected: self.expected,
                actual: image.dimensions(),
            });
        }
        if self.fail_writes {
            return Err(VideoError::Write(std::io::Error::other("disk full")));
        }
        if let Ok(mut written) = self.shared.written.lock() {
            written.push(frame_index_of(image));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        self.closed = true;
        self.shared.encoder_finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Returns a fixed phase, failing for chosen frame indices.
pub struct ScriptedClassifier {
    phase: Phase,
    fail_on: HashSet<u64>,
}

impl ScriptedClassifier {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            fail_on: HashSet::new(),
        }
    }

    pub fn fail_on(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
        self.fail_on.extend(indices);
        self
    }
}

#[async_trait]
impl crate::pipeline::PhaseClassifier for ScriptedClassifier {
    async fn classify(&self, image: &RgbImage) -> Result<Phase, InferenceError> {
        if self.fail_on.contains(&frame_index_of(image)) {
            return Err(InferenceError::Failed {
                classifier: "scripted",
                message: "model unavailable".to_string(),
            });
        }
        Ok(self.phase)
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
