pub mod backend;
pub mod ffmpeg;

pub use backend::{VideoBackend, VideoDecoder, VideoEncoder, VideoInfo};
pub use ffmpeg::FfmpegBackend;
