use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::AppError;

/// Installs the global subscriber: stderr always, plus `file` when given.
/// Must be called once, before anything logs.
pub fn init(level: Level, file: Option<&Path>) -> Result<(), AppError> {
    let file_writer = match file {
        Some(path) => Some(Mutex::new(open_log_file(path)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_writer.map(|writer| fmt::layer().with_ansi(false).with_writer(writer)))
        .init();
    Ok(())
}

/// Opens `path` for appending, creating missing parent folders.
pub fn open_log_file(path: &Path) -> Result<File, AppError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
