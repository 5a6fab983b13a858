//! Video I/O over the `ffprobe` and `ffmpeg` command line tools.
//!
//! Frames travel as raw `rgb24` over the child process pipes, so nothing here
//! links against libav.

use image::RgbImage;
use serde::Deserialize;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

use crate::config::VideoSettings;
use crate::error::VideoError;
use crate::video::backend::{VideoBackend, VideoDecoder, VideoEncoder, VideoInfo};

/// Top-level ffprobe JSON output (`-print_format json -show_streams`).
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    /// e.g. "30/1" or "30000/1001"
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

/// Parse a fraction string like `"30000/1001"` into a float.
fn parse_fraction(s: &str) -> Option<f64> {
    match s.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().ok()?;
            let den = den.trim().parse::<f64>().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => s.trim().parse::<f64>().ok(),
    }
}

fn parse_probe(path: &Path, json: &str) -> Result<VideoInfo, VideoError> {
    let probe: ProbeOutput =
        serde_json::from_str(json).map_err(|e| VideoError::Probe(format!("{e}: {json}")))?;
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| VideoError::NoVideoStream(path.to_path_buf()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(VideoError::Probe(format!(
                "video stream in {} has no dimensions",
                path.display()
            )))
        }
    };

    // avg_frame_rate is 0/0 for some containers; r_frame_rate is always set.
    let fps = [&stream.avg_frame_rate, &stream.r_frame_rate]
        .into_iter()
        .flatten()
        .filter_map(|rate| parse_fraction(rate))
        .find(|fps| *fps > 0.0)
        .unwrap_or(0.0);

    Ok(VideoInfo::new(width, height, fps))
}

#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: String,
    ffprobe: String,
    codec: String,
}

impl FfmpegBackend {
    pub fn new(settings: &VideoSettings) -> Self {
        Self {
            ffmpeg: settings.ffmpeg_binary.clone(),
            ffprobe: settings.ffprobe_binary.clone(),
            codec: settings.codec.clone(),
        }
    }

    pub fn probe(&self, path: &Path) -> Result<VideoInfo, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(path)
            .output()
            .map_err(|source| VideoError::Spawn {
                binary: self.ffprobe.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(VideoError::ExecutionFailed {
                binary: self.ffprobe.clone(),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        parse_probe(path, &String::from_utf8_lossy(&output.stdout))
    }
}

impl VideoBackend for FfmpegBackend {
    fn open_decoder(&self, path: &Path) -> Result<Box<dyn VideoDecoder>, VideoError> {
        let info = self.probe(path)?;
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| VideoError::Spawn {
                binary: self.ffmpeg.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            VideoError::Read(std::io::Error::other("ffmpeg stdout was not captured"))
        })?;

        info!(
            "Opened {} ({}x{} @ {:.2} fps)",
            path.display(),
            info.width,
            info.height,
            info.fps
        );
        Ok(Box::new(FfmpegDecoder {
            child,
            stdout,
            info,
            path: path.to_path_buf(),
        }))
    }

    fn open_encoder(
        &self,
        path: &Path,
        info: &VideoInfo,
    ) -> Result<Box<dyn VideoEncoder>, VideoError> {
        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-y", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", info.width, info.height))
            .arg("-r")
            .arg(info.nominal_fps().to_string())
            .args(["-i", "-", "-c:v"])
            .arg(&self.codec)
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| VideoError::Spawn {
                binary: self.ffmpeg.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            VideoError::Write(std::io::Error::other("ffmpeg stdin was not captured"))
        })?;

        debug!("Writing {} with codec {}", path.display(), self.codec);
        Ok(Box::new(FfmpegEncoder {
            binary: self.ffmpeg.clone(),
            child,
            stdin: Some(stdin),
            expected: (info.width, info.height),
        }))
    }
}

struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    info: VideoInfo,
    path: PathBuf,
}

impl VideoDecoder for FfmpegDecoder {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> Result<Option<RgbImage>, VideoError> {
        let mut buffer = vec![0u8; self.info.frame_len()];
        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {}
            // A short tail is a truncated last frame; treat it as end of stream.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(VideoError::Read(e)),
        }
        RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .map(Some)
            .ok_or_else(|| VideoError::Read(std::io::Error::other("short frame buffer")))
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!("ffmpeg decoder for {} already exited: {}", self.path.display(), e);
        }
        let _ = self.child.wait();
        debug!("Released decoder for {}", self.path.display());
    }
}

struct FfmpegEncoder {
    binary: String,
    child: Child,
    stdin: Option<ChildStdin>,
    expected: (u32, u32),
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, image: &RgbImage) -> Result<(), VideoError> {
        if image.dimensions() != self.expected {
            return Err(VideoError::FrameSize {
                expected: self.expected,
                actual: image.dimensions(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or(VideoError::WriterClosed)?;
        stdin.write_all(image.as_raw()).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe => VideoError::WriterClosed,
            _ => VideoError::Write(e),
        })
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        // Closing stdin tells ffmpeg the stream is complete.
        let Some(stdin) = self.stdin.take() else {
            return Ok(());
        };
        drop(stdin);

        let status = self.child.wait().map_err(VideoError::Write)?;
        if status.success() {
            Ok(())
        } else {
            Err(VideoError::ExecutionFailed {
                binary: self.binary.clone(),
                exit_code: status.code(),
                stderr: String::from("see ffmpeg output"),
            })
        }
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Video writer did not finish cleanly: {}", e);
        }
    }
}
