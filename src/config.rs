use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::Level;

const ENV_PREFIX: &str = "PHASE_RECORDER";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub session: SessionSettings,
    pub video: VideoSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    pub level: String,
    /// Also write plain-text logs here, appending across runs.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub down_ratio: u64,
    pub manual_window_ratio: u32,
    pub save_folder: PathBuf,
    pub frame_buffer_size: usize,
    pub preview_buffer_size: usize,
    pub max_consecutive_write_failures: u32,
    pub realtime: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSettings {
    pub codec: String,
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            down_ratio: 1,
            manual_window_ratio: 1,
            save_folder: PathBuf::from("../Records"),
            frame_buffer_size: 60,
            preview_buffer_size: 8,
            max_consecutive_write_failures: 30,
            realtime: true,
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            codec: "mjpeg".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            session: SessionSettings::default(),
            video: VideoSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults, then the optional file, then `PHASE_RECORDER__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("logging.level", defaults.logging.level)?
            .set_default("session.down_ratio", defaults.session.down_ratio)?
            .set_default(
                "session.manual_window_ratio",
                defaults.session.manual_window_ratio,
            )?
            .set_default(
                "session.save_folder",
                defaults.session.save_folder.to_string_lossy().to_string(),
            )?
            .set_default(
                "session.frame_buffer_size",
                defaults.session.frame_buffer_size as u64,
            )?
            .set_default(
                "session.preview_buffer_size",
                defaults.session.preview_buffer_size as u64,
            )?
            .set_default(
                "session.max_consecutive_write_failures",
                defaults.session.max_consecutive_write_failures,
            )?
            .set_default("session.realtime", defaults.session.realtime)?
            .set_default("video.codec", defaults.video.codec)?
            .set_default("video.ffmpeg_binary", defaults.video.ffmpeg_binary)?
            .set_default("video.ffprobe_binary", defaults.video.ffprobe_binary)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Falls back to INFO when the configured level is not recognised.
    pub fn log_level(&self) -> Level {
        self.logging.level.parse().unwrap_or(Level::INFO)
    }
}
