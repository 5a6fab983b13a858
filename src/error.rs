use std::path::PathBuf;

use thiserror::Error;

use crate::session::ControllerState;

// Main Application Error Type

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Session Error: {0}")]
    Session(#[from] SessionError),
    #[error("Configuration Error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),
}

// Session lifecycle errors surfaced to the operator.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Input video not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to open session: {0}")]
    OpenFailed(String),
    #[error("Cannot {operation} while the controller is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: ControllerState,
    },
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(String),
    #[error("The session controller task is no longer running")]
    ControllerGone,
}

impl From<VideoError> for SessionError {
    fn from(error: VideoError) -> Self {
        match error {
            VideoError::NotFound(path) => SessionError::NotFound(path),
            other => SessionError::OpenFailed(other.to_string()),
        }
    }
}

impl From<RecorderError> for SessionError {
    fn from(error: RecorderError) -> Self {
        SessionError::OpenFailed(error.to_string())
    }
}

// Video decode/encode errors.
#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Video file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },
    #[error("{binary} failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        binary: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Failed to parse probe output: {0}")]
    Probe(String),
    #[error("No video stream in {0}")]
    NoVideoStream(PathBuf),
    #[error("Frame is {actual:?} but the stream is {expected:?}")]
    FrameSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("Failed to read frame: {0}")]
    Read(std::io::Error),
    #[error("Failed to write frame: {0}")]
    Write(std::io::Error),
    #[error("The video writer is closed")]
    WriterClosed,
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Failed to initialize video writer: {0}")]
    WriterInitFailed(VideoError),
    #[error("Failed to record frame: {0}")]
    Write(VideoError),
    #[error("Failed to finalize video: {0}")]
    Finalize(VideoError),
    #[error("Failed to flush session log to {path}: {source}")]
    LogFlush {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("The recorder is already closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Classifier {classifier} failed: {message}")]
    Failed {
        classifier: &'static str,
        message: String,
    },
    #[error("Classifier returned an unknown label: {0}")]
    UnknownLabel(String),
}

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Frame of {width}x{height} is too small for the overlay")]
    FrameTooSmall { width: u32, height: u32 },
}
