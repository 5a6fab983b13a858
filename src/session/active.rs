use chrono::Local;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::config::{Session, SessionConfig};
use super::state::{ControllerStatus, ControllerState, PreviewFrame, SessionReport, SessionState};
use crate::common::{Frame, OperatorStatus, Phase};
use crate::error::{RecorderError, SessionError};
use crate::intake::{FrameSource, SourceOptions};
use crate::pipeline::{OverlayRenderer, OverlayStamp, PhaseClassifier};
use crate::recording::{inference_rate, LogRecord, SessionRecorder};
use crate::video::VideoBackend;

/// Collaborators shared by every session a controller runs.
#[derive(Clone)]
pub struct SessionServices {
    pub backend: Arc<dyn VideoBackend>,
    pub classifier: Arc<dyn PhaseClassifier>,
    pub renderer: Arc<dyn OverlayRenderer>,
    pub source_options: SourceOptions,
    pub max_consecutive_write_failures: u32,
    pub preview_tx: broadcast::Sender<PreviewFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Continue,
    /// The writer kept failing; the session must be torn down.
    Fault(String),
}

/// A running session: the open source and recorder plus its mutable state.
pub struct ActiveSession {
    session: Session,
    source: FrameSource,
    recorder: SessionRecorder,
    state: SessionState,
    services: SessionServices,
}

impl ActiveSession {
    /// Opens the source, then the recorder. If the recorder cannot be opened the
    /// source is released before the error is returned.
    pub async fn open(
        config: SessionConfig,
        services: SessionServices,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let backend = Arc::clone(&services.backend);
        let options = services.source_options;
        let (session, source, recorder) =
            tokio::task::spawn_blocking(move || open_blocking(&config, backend.as_ref(), options))
                .await
                .map_err(|e| SessionError::OpenFailed(e.to_string()))??;

        info!(
            "Session {} (run {}) started from {}: {}x{} @ {:.2} fps, down ratio {}, override window {}",
            session.id,
            session.run_id,
            session.input_path.display(),
            session.info.width,
            session.info.height,
            session.info.fps,
            session.down_ratio,
            session.override_window
        );
        let state = SessionState::new(session.override_window);

        Ok(Self {
            session,
            source,
            recorder,
            state,
            services,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.source.next_frame().await
    }

    pub fn set_override(&mut self, phase: Phase) {
        self.state.overrides.set(phase);
    }

    pub fn set_status(&mut self, status: OperatorStatus) {
        if self.state.status != status {
            info!("Operator status {} -> {}", self.state.status, status);
            self.state.status = status;
        }
    }

    pub fn status(&self, state: ControllerState) -> ControllerStatus {
        ControllerStatus {
            state,
            session_id: Some(self.session.id.clone()),
            frames_delivered: self.state.frames_delivered,
            frames_recorded: self.state.frames_recorded,
            frames_sampled: self.state.frames_sampled,
            active_override: self.state.overrides.state(),
            operator_status: self.state.status,
            last_error: None,
            last_report: None,
        }
    }

    /// Annotates and records one delivered frame. Sampled frames are also
    /// classified and logged. A frame whose overlay failed is recorded raw and
    /// gets no log row, so every row matches an annotated frame.
    pub async fn process_frame(&mut self, frame: Frame) -> FrameOutcome {
        let index = frame.index();
        let sampled = self.session.is_sampled(index);
        self.state.frames_delivered += 1;

        let mut row = None;
        if sampled {
            row = self.sample(&frame).await;
        }

        let phase = self.state.overrides.resolve(self.state.last_inferred);
        let annotated = match self.annotate(&frame, phase) {
            Some(image) => image,
            None => {
                if row.take().is_some() {
                    debug!("Dropping log row for unannotated frame {}", index);
                }
                frame.shared_image()
            }
        };

        let outcome = self.write(&annotated, index);

        if let Some(row) = row {
            if let Err(e) = self.recorder.append_log(row) {
                warn!("Failed to append log row for frame {}: {}", index, e);
            }
        }

        let _ = self.services.preview_tx.send(PreviewFrame {
            index,
            image: annotated,
            phase,
            sampled,
        });
        outcome
    }

    async fn sample(&mut self, frame: &Frame) -> Option<LogRecord> {
        let index = frame.index();
        let sampled_at = Local::now();
        let started = Instant::now();
        let inferred = match self.services.classifier.classify(frame.image()).await {
            Ok(phase) => phase,
            Err(e) => {
                self.state.inference_failures += 1;
                warn!("Inference failed on frame {}: {}", index, e);
                return None;
            }
        };
        let rate = inference_rate(started.elapsed().as_secs_f64());

        self.state.frames_sampled += 1;
        self.state.last_inferred = inferred;
        self.state.overrides.tick();
        let prediction = self.state.overrides.resolve_prediction(inferred, index);
        debug!(
            "Frame {}: inferred {}, using {} ({:?})",
            index, inferred, prediction.phase, prediction.source
        );

        let participants = &self.session.participants;
        Some(LogRecord {
            timestamp: sampled_at,
            frame_index: index,
            trainee: participants.trainee.clone(),
            trainer: participants.trainer.clone(),
            bed: participants.bed.clone(),
            case: participants.case.clone(),
            status: self.state.status,
            rate,
            inferred,
            manual: self.state.overrides.manual_phase(),
        })
    }

    fn annotate(&mut self, frame: &Frame, phase: Phase) -> Option<Arc<RgbImage>> {
        let stamp = OverlayStamp {
            timestamp: frame.captured_at(),
            phase,
            operator: self.session.participants.trainee.clone(),
        };
        match self.services.renderer.render(&stamp, frame.image()) {
            Ok(image) => Some(Arc::new(image)),
            Err(e) => {
                self.state.render_failures += 1;
                warn!("Overlay failed on frame {}, recording raw frame: {}", frame.index(), e);
                None
            }
        }
    }

    fn write(&mut self, image: &RgbImage, index: u64) -> FrameOutcome {
        match record_in_place(&mut self.recorder, image) {
            Ok(()) => {
                self.state.frames_recorded += 1;
                self.state.consecutive_write_failures = 0;
                FrameOutcome::Continue
            }
            Err(e) => {
                self.state.write_failures += 1;
                self.state.consecutive_write_failures += 1;
                let limit = self.services.max_consecutive_write_failures.max(1);
                if self.state.consecutive_write_failures >= limit {
                    error!(
                        "Frame {} not recorded, {} consecutive write failures: {}",
                        index, self.state.consecutive_write_failures, e
                    );
                    FrameOutcome::Fault(e.to_string())
                } else {
                    warn!("Frame {} not recorded: {}", index, e);
                    FrameOutcome::Continue
                }
            }
        }
    }

    /// Stops acquisition, then closes the recorder. Nothing is recorded after
    /// this returns.
    pub async fn shutdown(mut self) -> SessionReport {
        self.source.stop().await;

        let mut report = SessionReport::new(&self.session, &self.state);
        let mut recorder = self.recorder;
        match tokio::task::spawn_blocking(move || recorder.close()).await {
            Ok(Ok(log_path)) => report.log_path = log_path,
            Ok(Err(e)) => {
                error!("Failed to close recorder for {}: {}", report.session_id, e);
                report.error = Some(e.to_string());
            }
            Err(e) => {
                error!("Recorder close task failed: {}", e);
                report.error = Some(e.to_string());
            }
        }
        info!(
            "Session {} stopped: {} frames delivered, {} recorded, {} sampled",
            report.session_id, report.frames_delivered, report.frames_recorded, report.frames_sampled
        );
        report
    }
}

/// Writes on the current worker without stalling the others. Frames stay on
/// the supervisor task so they reach the encoder in delivery order.
fn record_in_place(recorder: &mut SessionRecorder, image: &RgbImage) -> Result<(), RecorderError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| recorder.record(image))
        }
        _ => recorder.record(image),
    }
}

fn open_blocking(
    config: &SessionConfig,
    backend: &dyn VideoBackend,
    options: SourceOptions,
) -> Result<(Session, FrameSource, SessionRecorder), SessionError> {
    let source = FrameSource::open(backend, &config.video_path, options)?;
    let session = Session::new(config, source.info(), Local::now()).claim_unused_id();
    match SessionRecorder::open(&session, backend) {
        Ok(recorder) => Ok((session, source, recorder)),
        Err(e) => {
            warn!("Recorder failed to open, releasing source: {}", e);
            drop(source);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::error::OverlayError;
    use crate::pipeline::BannerOverlay;
    use crate::testing::{MemoryBackend, MemoryBackendBuilder, ScriptedClassifier};
    use chrono::DateTime;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StampLog(Mutex<Vec<DateTime<Local>>>);

    impl OverlayRenderer for StampLog {
        fn render(&self, stamp: &OverlayStamp, image: &RgbImage) -> Result<RgbImage, OverlayError> {
            self.0.lock().unwrap().push(stamp.timestamp);
            Ok(image.clone())
        }
    }

    fn services(backend: MemoryBackend, classifier: ScriptedClassifier) -> SessionServices {
        let (preview_tx, _) = broadcast::channel(8);
        SessionServices {
            backend: Arc::new(backend),
            classifier: Arc::new(classifier),
            renderer: Arc::new(BannerOverlay::new()),
            source_options: SourceOptions {
                buffer_size: 4,
                realtime: false,
            },
            max_consecutive_write_failures: 3,
            preview_tx,
        }
    }

    fn config(dir: &Path) -> SessionConfig {
        SessionConfig::new("case.mp4", &SessionSettings::default())
            .save_folder(dir)
            .trainee("Ana")
            .trainer("Cruz")
            .bed("2")
            .case("17")
    }

    fn log_rows(dir: &Path) -> Vec<Vec<String>> {
        let path = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .find(|path| path.extension().is_some_and(|ext| ext == "csv"))
            .expect("log file");
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .skip(1)
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect()
    }

    async fn drain(active: &mut ActiveSession) {
        while let Some(frame) = active.next_frame().await {
            assert_eq!(active.process_frame(frame).await, FrameOutcome::Continue);
        }
    }

    #[tokio::test]
    async fn override_covers_exactly_the_window() {
        let dir = tempfile::tempdir().unwrap();
        // 2 fps and a ratio of 1 give a window of two sampled ticks.
        let backend = MemoryBackendBuilder::new().frames(6).fps(2.0).build();
        let mut active = ActiveSession::open(
            config(dir.path()).down_ratio(1),
            services(backend, ScriptedClassifier::new(Phase::Marking)),
        )
        .await
        .unwrap();

        while let Some(frame) = active.next_frame().await {
            if frame.index() == 3 {
                active.set_override(Phase::Dissection);
            }
            active.process_frame(frame).await;
        }
        active.shutdown().await;

        let rows = log_rows(dir.path());
        let corrections: Vec<&str> = rows.iter().map(|row| row[9].as_str()).collect();
        let combined: Vec<&str> = rows.iter().map(|row| row[10].as_str()).collect();
        assert_eq!(
            corrections,
            vec!["--", "--", "dissection", "dissection", "--", "--"]
        );
        assert_eq!(
            combined,
            vec!["marking", "marking", "dissection", "dissection", "marking", "marking"]
        );
        assert!(rows.iter().all(|row| row[8] == "marking"));
    }

    #[tokio::test]
    async fn resetting_an_override_restarts_the_countdown() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().frames(6).fps(2.0).build();
        let mut active = ActiveSession::open(
            config(dir.path()),
            services(backend, ScriptedClassifier::new(Phase::Idle)),
        )
        .await
        .unwrap();

        while let Some(frame) = active.next_frame().await {
            match frame.index() {
                1 => active.set_override(Phase::Injection),
                2 => active.set_override(Phase::Marking),
                _ => {}
            }
            active.process_frame(frame).await;
        }
        active.shutdown().await;

        let combined: Vec<String> = log_rows(dir.path())
            .into_iter()
            .map(|row| row[10].clone())
            .collect();
        assert_eq!(
            combined,
            vec!["injection", "marking", "marking", "idle", "idle", "idle"]
        );
    }

    #[tokio::test]
    async fn rows_use_the_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().frames(12).build();
        let mut active = ActiveSession::open(
            config(dir.path()).down_ratio(5),
            services(backend, ScriptedClassifier::new(Phase::Injection)),
        )
        .await
        .unwrap();
        active.set_status(OperatorStatus::TakeOver);
        drain(&mut active).await;
        let report = active.shutdown().await;

        assert_eq!(report.frames_delivered, 12);
        assert_eq!(report.frames_recorded, 12);
        assert_eq!(report.frames_sampled, 2);
        let rows = log_rows(dir.path());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], "0000005");
        assert_eq!(rows[1][1], "0000010");
        assert_eq!(&rows[0][2..7], &["Ana", "Cruz", "2", "17", "TakeOver"]);
        assert_eq!(rows[0][8], "injection");
        assert!(rows[0][7].split('.').nth(1).is_some_and(|d| d.len() == 4));
    }

    #[tokio::test]
    async fn inference_failure_skips_the_row_but_records_the_frame() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().frames(4).build();
        let classifier = ScriptedClassifier::new(Phase::Idle).fail_on([2]);
        let mut active = ActiveSession::open(config(dir.path()), services(backend, classifier))
            .await
            .unwrap();
        drain(&mut active).await;
        let report = active.shutdown().await;

        assert_eq!(report.frames_recorded, 4);
        assert_eq!(report.inference_failures, 1);
        let frames: Vec<String> = log_rows(dir.path())
            .into_iter()
            .map(|row| row[1].clone())
            .collect();
        assert_eq!(frames, vec!["0000001", "0000003", "0000004"]);
    }

    #[tokio::test]
    async fn render_failure_records_the_raw_frame_without_a_row() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackendBuilder::new().frames(3).size(16, 16).build());
        let (preview_tx, _) = broadcast::channel(8);
        let services = SessionServices {
            backend: backend.clone(),
            classifier: Arc::new(ScriptedClassifier::new(Phase::Idle)),
            renderer: Arc::new(BannerOverlay::new()),
            source_options: SourceOptions {
                buffer_size: 4,
                realtime: false,
            },
            max_consecutive_write_failures: 3,
            preview_tx,
        };
        let mut active = ActiveSession::open(config(dir.path()), services).await.unwrap();
        drain(&mut active).await;
        let report = active.shutdown().await;

        assert_eq!(report.render_failures, 3);
        assert_eq!(report.frames_recorded, 3);
        assert_eq!(backend.written_indices(), vec![1, 2, 3]);
        assert_eq!(report.log_path, None);
        assert!(!fs::read_dir(dir.path())
            .unwrap()
            .any(|entry| entry.unwrap().path().extension().is_some_and(|ext| ext == "csv")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_are_recorded_in_order_on_a_worker_pool() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(MemoryBackendBuilder::new().frames(8).build());
        let (preview_tx, _) = broadcast::channel(8);
        let services = SessionServices {
            backend: backend.clone(),
            classifier: Arc::new(ScriptedClassifier::new(Phase::Idle)),
            renderer: Arc::new(BannerOverlay::new()),
            source_options: SourceOptions {
                buffer_size: 2,
                realtime: false,
            },
            max_consecutive_write_failures: 3,
            preview_tx,
        };
        let mut active = ActiveSession::open(config(dir.path()), services).await.unwrap();
        drain(&mut active).await;
        let report = active.shutdown().await;

        assert_eq!(report.frames_recorded, 8);
        assert_eq!(backend.written_indices(), (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn overlay_shows_the_capture_time() {
        let dir = tempfile::tempdir().unwrap();
        let stamps = Arc::new(StampLog::default());
        let mut services = services(
            MemoryBackendBuilder::new().frames(2).build(),
            ScriptedClassifier::new(Phase::Idle),
        );
        services.renderer = stamps.clone();
        let mut active = ActiveSession::open(config(dir.path()), services).await.unwrap();

        let mut captured = Vec::new();
        while let Some(frame) = active.next_frame().await {
            captured.push(frame.captured_at());
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            active.process_frame(frame).await;
        }
        active.shutdown().await;

        assert_eq!(*stamps.0.lock().unwrap(), captured);
    }

    #[tokio::test]
    async fn repeated_write_failures_fault_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().frames(10).fail_writes().build();
        let mut active = ActiveSession::open(
            config(dir.path()),
            services(backend, ScriptedClassifier::new(Phase::Idle)),
        )
        .await
        .unwrap();

        let mut outcomes = Vec::new();
        while let Some(frame) = active.next_frame().await {
            let outcome = active.process_frame(frame).await;
            let faulted = outcome != FrameOutcome::Continue;
            outcomes.push(outcome);
            if faulted {
                break;
            }
        }
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[2], FrameOutcome::Fault(_)));

        let report = active.shutdown().await;
        assert_eq!(report.write_failures, 3);
        assert_eq!(report.frames_recorded, 0);
    }

    #[tokio::test]
    async fn preview_receives_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackendBuilder::new().frames(5).build();
        let services = services(backend, ScriptedClassifier::new(Phase::Idle));
        let mut preview_rx = services.preview_tx.subscribe();
        let mut active = ActiveSession::open(config(dir.path()).down_ratio(2), services)
            .await
            .unwrap();
        drain(&mut active).await;
        active.shutdown().await;

        let mut seen = Vec::new();
        while let Ok(frame) = preview_rx.try_recv() {
            seen.push((frame.index, frame.sampled));
        }
        assert_eq!(
            seen,
            vec![(1, false), (2, true), (3, false), (4, true), (5, false)]
        );
    }
}
