use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::Frame;
use crate::error::VideoError;
use crate::video::{VideoBackend, VideoDecoder, VideoInfo};

// Longest stretch the pacing sleep goes without checking for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct SourceOptions {
    /// Capacity of the handoff channel. Acquisition blocks when it is full.
    pub buffer_size: usize,
    /// Pace deliveries to the stream's nominal frame rate.
    pub realtime: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            buffer_size: 60,
            realtime: true,
        }
    }
}

/// Sequential, paced reader over one video file.
///
/// The decoder lives on a dedicated thread that pushes frames into a bounded
/// channel; the owner pulls them with [`FrameSource::next_frame`].
pub struct FrameSource {
    info: VideoInfo,
    path: PathBuf,
    cancel_token: CancellationToken,
    frame_rx: mpsc::Receiver<Frame>,
    acquisition_thread: Option<std::thread::JoinHandle<()>>,
    stopped: bool,
}

impl FrameSource {
    /// Opens the decoder on the calling thread, so `NotFound` and open failures
    /// surface here, then starts acquisition.
    pub fn open(
        backend: &dyn VideoBackend,
        path: &Path,
        options: SourceOptions,
    ) -> Result<Self, VideoError> {
        let decoder = backend.open_decoder(path)?;
        let info = decoder.info();

        let (frame_tx, frame_rx) = mpsc::channel(options.buffer_size.max(1));
        let cancel_token = CancellationToken::new();
        let mut acquisition = Acquisition {
            decoder,
            frame_tx,
            interval: options.realtime.then(|| info.frame_interval()),
            path: path.to_path_buf(),
        };
        let thread_token = cancel_token.clone();
        let acquisition_thread = std::thread::Builder::new()
            .name("frame-acquisition".to_string())
            .spawn(move || acquisition.run(thread_token))
            .map_err(VideoError::Read)?;

        Ok(Self {
            info,
            path: path.to_path_buf(),
            cancel_token,
            frame_rx,
            acquisition_thread: Some(acquisition_thread),
            stopped: false,
        })
    }

    pub fn info(&self) -> VideoInfo {
        self.info
    }

    /// Next frame in order, `None` once the stream ended or the source stopped.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if self.stopped {
            return None;
        }
        self.frame_rx.recv().await
    }

    /// Cancels acquisition and waits until the decoder has been released.
    /// Frames still buffered in the channel are discarded.
    pub async fn stop(&mut self) {
        self.stopped = true;
        self.cancel_token.cancel();
        // Wakes an acquisition thread blocked on a full channel.
        self.frame_rx.close();

        if let Some(thread) = self.acquisition_thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => debug!("Acquisition for {} joined", self.path.display()),
                Ok(Err(_)) => error!("Acquisition thread for {} panicked", self.path.display()),
                Err(e) => error!("Failed to join acquisition thread: {}", e),
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        self.frame_rx.close();
        if let Some(thread) = self.acquisition_thread.take() {
            if thread.join().is_err() {
                error!("Acquisition thread for {} panicked", self.path.display());
            }
        }
    }
}

struct Acquisition {
    decoder: Box<dyn VideoDecoder>,
    frame_tx: mpsc::Sender<Frame>,
    interval: Option<Duration>,
    path: PathBuf,
}

impl Acquisition {
    fn run(&mut self, cancel_token: CancellationToken) {
        info!("Acquisition started for {}", self.path.display());
        let mut index: u64 = 0;
        let mut next_due = Instant::now();

        while !cancel_token.is_cancelled() {
            let image = match self.decoder.read_frame() {
                Ok(Some(image)) => image,
                Ok(None) => {
                    info!("End of stream after {} frames", index);
                    break;
                }
                Err(e) => {
                    warn!("Decoding stopped after frame {}: {}", index, e);
                    break;
                }
            };
            if cancel_token.is_cancelled() {
                break;
            }

            index += 1;
            // Blocks while the consumer is behind; fails once the receiver closes.
            if self
                .frame_tx
                .blocking_send(Frame::new(index, image, Local::now()))
                .is_err()
            {
                debug!("Frame channel closed, stopping acquisition");
                break;
            }

            if let Some(interval) = self.interval {
                next_due += interval;
                if !sleep_until(next_due, &cancel_token) {
                    break;
                }
                // Behind schedule: continue from now rather than bursting.
                next_due = next_due.max(Instant::now());
            }
        }
        info!(
            "Acquisition finished for {} after {} frames",
            self.path.display(),
            index
        );
    }
}

/// Returns `false` when cancelled before the deadline.
fn sleep_until(deadline: Instant, cancel_token: &CancellationToken) -> bool {
    loop {
        if cancel_token.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}
