use chrono::Local;
use image::RgbImage;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::log_record::{header_row, LogRecord};
use crate::error::RecorderError;
use crate::session::Session;
use crate::video::{VideoBackend, VideoEncoder};

/// Owns the output video writer and the log buffer of one session.
///
/// The writer is released by [`SessionRecorder::close`] or, failing that, on
/// drop. The log is flushed once, and only when it holds at least one row.
pub struct SessionRecorder {
    session: Session,
    encoder: Option<Box<dyn VideoEncoder>>,
    records: Vec<LogRecord>,
    frames_written: u64,
    closed: bool,
}

impl SessionRecorder {
    pub fn open(session: &Session, backend: &dyn VideoBackend) -> Result<Self, RecorderError> {
        fs::create_dir_all(session.save_folder()).map_err(|source| RecorderError::LogFlush {
            path: session.save_folder().to_path_buf(),
            source,
        })?;
        let encoder = backend
            .open_encoder(&session.video_path, &session.info)
            .map_err(RecorderError::WriterInitFailed)?;
        info!(
            "Recording {} to {}",
            session.id,
            session.video_path.display()
        );

        Ok(Self {
            session: session.clone(),
            encoder: Some(encoder),
            records: Vec::new(),
            frames_written: 0,
            closed: false,
        })
    }

    pub fn record(&mut self, image: &RgbImage) -> Result<(), RecorderError> {
        let encoder = self.encoder.as_mut().ok_or(RecorderError::Closed)?;
        encoder.write_frame(image).map_err(RecorderError::Write)?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn append_log(&mut self, record: LogRecord) -> Result<(), RecorderError> {
        if self.closed {
            return Err(RecorderError::Closed);
        }
        self.records.push(record);
        Ok(())
    }

    /// Finalizes the video and writes the log. Returns the log path when one
    /// was written. A second call does nothing.
    ///
    /// The writer is released even when finalizing it fails; the first error
    /// encountered is returned after both steps ran.
    pub fn close(&mut self) -> Result<Option<PathBuf>, RecorderError> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;

        let finalize = match self.encoder.take() {
            Some(mut encoder) => encoder.finish().map_err(RecorderError::Finalize),
            None => Ok(()),
        };
        if let Err(e) = &finalize {
            error!("Failed to finalize {}: {}", self.session.video_path.display(), e);
        }

        let flushed = if self.records.is_empty() {
            debug!("No log rows for {}, skipping log file", self.session.id);
            Ok(None)
        } else {
            let path = self.session.log_path(Local::now());
            write_log(&path, &self.records)
                .map(|()| {
                    info!("Wrote {} log rows to {}", self.records.len(), path.display());
                    Some(path)
                })
                .map_err(|e| {
                    error!("{}", e);
                    e
                })
        };
        self.records.clear();

        info!(
            "Closed recorder for {} after {} frames",
            self.session.id, self.frames_written
        );
        finalize.and(flushed)
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Recorder for {} dropped without close", self.session.id);
            let _ = self.close();
        }
    }
}

fn write_log(path: &Path, records: &[LogRecord]) -> Result<(), RecorderError> {
    let flush_error = |source| RecorderError::LogFlush {
        path: path.to_path_buf(),
        source,
    };
    let tmp_path = path.with_extension("csv.tmp");

    let mut file = fs::File::create(&tmp_path).map_err(flush_error)?;
    let mut contents = header_row();
    contents.push('\n');
    for record in records {
        contents.push_str(&record.csv_row());
        contents.push('\n');
    }
    file.write_all(contents.as_bytes()).map_err(flush_error)?;
    file.sync_all().map_err(flush_error)?;
    drop(file);

    fs::rename(&tmp_path, path).map_err(flush_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{OperatorStatus, Phase};
    use crate::config::SessionSettings;
    use crate::session::SessionConfig;
    use crate::testing::{indexed_image, MemoryBackendBuilder};
    use crate::video::VideoInfo;

    fn session(dir: &Path) -> Session {
        let config = SessionConfig::new("in.mp4", &SessionSettings::default())
            .save_folder(dir.join("records"))
            .case("7")
            .trainee("Ana");
        Session::new(&config, VideoInfo::new(320, 240, 30.0), Local::now())
    }

    fn row(index: u64) -> LogRecord {
        LogRecord {
            timestamp: Local::now(),
            frame_index: index,
            trainee: "Ana".to_string(),
            trainer: "unnamed".to_string(),
            bed: "unnamed".to_string(),
            case: "7".to_string(),
            status: OperatorStatus::Unset,
            rate: 30.0,
            inferred: Phase::Idle,
            manual: None,
        }
    }

    fn csv_files(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .collect()
    }

    #[test]
    fn empty_log_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().build();
        let session = session(dir.path());
        let mut recorder = SessionRecorder::open(&session, &backend).unwrap();
        recorder.record(&indexed_image(320, 240, 1)).unwrap();

        assert_eq!(recorder.close().unwrap(), None);
        assert!(csv_files(session.save_folder()).is_empty());
        assert!(backend.encoder_finished());
    }

    #[test]
    fn rows_are_flushed_once_to_a_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().build();
        let session = session(dir.path());
        let mut recorder = SessionRecorder::open(&session, &backend).unwrap();
        recorder.append_log(row(5)).unwrap();
        recorder.append_log(row(10)).unwrap();

        let path = recorder.close().unwrap().expect("log written");
        assert_eq!(recorder.close().unwrap(), None);

        assert_eq!(csv_files(session.save_folder()), vec![path.clone()]);
        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Time,Frame"));
        assert!(lines[1].contains(",0000005,"));
        assert!(lines[2].contains(",0000010,"));
    }

    #[test]
    fn writes_after_close_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().build();
        let mut recorder = SessionRecorder::open(&session(dir.path()), &backend).unwrap();
        recorder.close().unwrap();

        assert!(matches!(
            recorder.record(&indexed_image(320, 240, 1)),
            Err(RecorderError::Closed)
        ));
        assert!(matches!(recorder.append_log(row(1)), Err(RecorderError::Closed)));
    }

    #[test]
    fn drop_releases_the_writer_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().build();
        let session = session(dir.path());
        {
            let mut recorder = SessionRecorder::open(&session, &backend).unwrap();
            recorder.append_log(row(1)).unwrap();
        }
        assert!(backend.encoder_finished());
        assert_eq!(csv_files(session.save_folder()).len(), 1);
    }

    #[test]
    fn encoder_failure_is_writer_init_failed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().fail_encoder_open().build();
        let result = SessionRecorder::open(&session(dir.path()), &backend);
        assert!(matches!(result, Err(RecorderError::WriterInitFailed(_))));
    }
}
