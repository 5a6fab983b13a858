use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::active::{ActiveSession, FrameOutcome, SessionServices};
use super::command::SessionCommand;
use super::config::SessionConfig;
use super::state::{ControllerState, ControllerStatus, PreviewFrame, SessionReport};
use crate::common::{Frame, OperatorStatus, Phase};
use crate::config::{SessionSettings, Settings, VideoSettings};
use crate::error::SessionError;
use crate::intake::SourceOptions;
use crate::pipeline::{BannerOverlay, OverlayRenderer, PhaseClassifier};
use crate::video::{FfmpegBackend, VideoBackend};

const COMMAND_BUFFER_SIZE: usize = 32;

/// Cloneable handle to the session actor. Every call is a message; the actor
/// owns all session state.
#[derive(Clone)]
pub struct SessionController {
    command_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<ControllerState>,
    preview_tx: broadcast::Sender<PreviewFrame>,
}

impl SessionController {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (responder, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(responder))
            .await
            .map_err(|_| SessionError::ControllerGone)?;
        response_rx.await.map_err(|_| SessionError::ControllerGone)
    }

    async fn post(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionError::ControllerGone)
    }

    /// Starts a session and returns its id. Only valid while stopped.
    pub async fn start(&self, config: SessionConfig) -> Result<String, SessionError> {
        self.request(|responder| SessionCommand::Start { config, responder })
            .await?
    }

    /// Ends the running session, or acknowledges a fault. `Ok(None)` when there
    /// was nothing to stop.
    pub async fn stop(&self) -> Result<Option<SessionReport>, SessionError> {
        self.request(|responder| SessionCommand::Stop { responder })
            .await?
    }

    pub async fn status(&self) -> Result<ControllerStatus, SessionError> {
        self.request(|responder| SessionCommand::Status { responder })
            .await
    }

    /// Ignored unless a session is running.
    pub async fn set_override(&self, phase: Phase) -> Result<(), SessionError> {
        self.post(SessionCommand::SetOverride { phase }).await
    }

    /// Ignored unless a session is running.
    pub async fn set_status(&self, status: OperatorStatus) -> Result<(), SessionError> {
        self.post(SessionCommand::SetStatus { status }).await
    }

    pub fn state(&self) -> ControllerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ControllerState> {
        self.state_rx.clone()
    }

    pub fn subscribe_preview(&self) -> broadcast::Receiver<PreviewFrame> {
        self.preview_tx.subscribe()
    }

    pub async fn wait_for_state(&self, target: ControllerState) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| SessionError::ControllerGone)
    }
}

/// The actor behind [`SessionController`]. Interleaves operator commands with
/// frames from the active session, commands first.
pub struct SessionSupervisor {
    command_rx: mpsc::Receiver<SessionCommand>,
    services: SessionServices,
    active: Option<ActiveSession>,
    state_tx: watch::Sender<ControllerState>,
    last_error: Option<String>,
    last_report: Option<SessionReport>,
}

async fn next_frame(active: &mut Option<ActiveSession>) -> Option<Frame> {
    match active {
        Some(active) => active.next_frame().await,
        None => std::future::pending().await,
    }
}

impl SessionSupervisor {
    fn new(
        command_rx: mpsc::Receiver<SessionCommand>,
        services: SessionServices,
        state_tx: watch::Sender<ControllerState>,
    ) -> Self {
        Self {
            command_rx,
            services,
            active: None,
            state_tx,
            last_error: None,
            last_report: None,
        }
    }

    pub async fn run(mut self) {
        debug!("Session supervisor started");
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All controller handles dropped");
                        break;
                    }
                },
                frame = next_frame(&mut self.active) => match frame {
                    Some(frame) => self.handle_frame(frame).await,
                    None => self.handle_end_of_stream().await,
                },
            }
        }
        if self.active.is_some() {
            self.teardown(None).await;
            self.set_state(ControllerState::Stopped);
        }
        debug!("Session supervisor finished");
    }

    fn state(&self) -> ControllerState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ControllerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!("Controller state {} -> {}", previous, state);
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { config, responder } => {
                let result = self.start(config).await;
                let _ = responder.send(result);
            }
            SessionCommand::Stop { responder } => {
                let result = self.stop().await;
                let _ = responder.send(result);
            }
            SessionCommand::Status { responder } => {
                let _ = responder.send(self.status());
            }
            SessionCommand::SetOverride { phase } => match self.active.as_mut() {
                Some(active) => active.set_override(phase),
                None => debug!("Ignoring override to {} while {}", phase, self.state()),
            },
            SessionCommand::SetStatus { status } => match self.active.as_mut() {
                Some(active) => active.set_status(status),
                None => debug!("Ignoring status {} while {}", status, self.state()),
            },
        }
    }

    async fn start(&mut self, config: SessionConfig) -> Result<String, SessionError> {
        let state = self.state();
        if state != ControllerState::Stopped {
            return Err(SessionError::InvalidState {
                operation: "start",
                state,
            });
        }

        self.set_state(ControllerState::Starting);
        match ActiveSession::open(config, self.services.clone()).await {
            Ok(active) => {
                let id = active.session().id.clone();
                self.active = Some(active);
                self.last_error = None;
                self.last_report = None;
                self.set_state(ControllerState::Running);
                Ok(id)
            }
            Err(e) => {
                error!("Failed to start session: {}", e);
                self.set_state(ControllerState::Stopped);
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> Result<Option<SessionReport>, SessionError> {
        match self.state() {
            ControllerState::Running => {
                self.set_state(ControllerState::Stopping);
                let report = self.teardown(None).await;
                self.set_state(ControllerState::Stopped);
                Ok(report)
            }
            ControllerState::Faulted => {
                let error = self.last_error.take();
                info!(
                    "Fault acknowledged: {}",
                    error.as_deref().unwrap_or("unknown")
                );
                self.set_state(ControllerState::Stopped);
                Ok(self.last_report.clone())
            }
            ControllerState::Stopped => {
                debug!("Stop requested while already stopped");
                Ok(None)
            }
            state => Err(SessionError::InvalidState {
                operation: "stop",
                state,
            }),
        }
    }

    fn status(&self) -> ControllerStatus {
        let state = self.state();
        let mut status = match &self.active {
            Some(active) => active.status(state),
            None => ControllerStatus::idle(state),
        };
        status.last_error = self.last_error.clone();
        status.last_report = self.last_report.clone();
        status
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let FrameOutcome::Fault(message) = active.process_frame(frame).await {
            error!("Session faulted: {}", message);
            self.last_error = Some(message.clone());
            self.teardown(Some(message)).await;
            self.set_state(ControllerState::Faulted);
        }
    }

    async fn handle_end_of_stream(&mut self) {
        info!("Acquisition ended, stopping session");
        self.set_state(ControllerState::Stopping);
        self.teardown(None).await;
        self.set_state(ControllerState::Stopped);
    }

    async fn teardown(&mut self, fault: Option<String>) -> Option<SessionReport> {
        let active = self.active.take()?;
        let mut report = active.shutdown().await;
        if let Some(fault) = fault {
            if let Some(close_error) = report.error.take() {
                warn!("Recorder also failed to close: {}", close_error);
            }
            report.error = Some(fault);
        }
        self.last_report = Some(report.clone());
        Some(report)
    }
}

/// Assembles a [`SessionController`] and spawns its supervisor. Must be called
/// from within a tokio runtime.
pub struct SessionControllerBuilder {
    backend: Option<Arc<dyn VideoBackend>>,
    classifier: Option<Arc<dyn PhaseClassifier>>,
    renderer: Option<Arc<dyn OverlayRenderer>>,
    source_options: SourceOptions,
    preview_buffer_size: usize,
    max_consecutive_write_failures: u32,
}

impl SessionControllerBuilder {
    pub fn new() -> Self {
        let defaults = SessionSettings::default();
        Self {
            backend: None,
            classifier: None,
            renderer: None,
            source_options: SourceOptions {
                buffer_size: defaults.frame_buffer_size,
                realtime: defaults.realtime,
            },
            preview_buffer_size: defaults.preview_buffer_size,
            max_consecutive_write_failures: defaults.max_consecutive_write_failures,
        }
    }

    /// Takes buffer sizes, pacing, the fault threshold and the ffmpeg backend
    /// from loaded settings.
    pub fn with_settings(settings: &Settings) -> Self {
        Self::new()
            .backend(Arc::new(FfmpegBackend::new(&settings.video)))
            .frame_buffer_size(settings.session.frame_buffer_size)
            .realtime(settings.session.realtime)
            .preview_buffer_size(settings.session.preview_buffer_size)
            .max_consecutive_write_failures(settings.session.max_consecutive_write_failures)
    }

    pub fn backend(mut self, backend: Arc<dyn VideoBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn PhaseClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn OverlayRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn frame_buffer_size(mut self, frame_buffer_size: usize) -> Self {
        self.source_options.buffer_size = frame_buffer_size;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.source_options.realtime = realtime;
        self
    }

    pub fn preview_buffer_size(mut self, preview_buffer_size: usize) -> Self {
        self.preview_buffer_size = preview_buffer_size;
        self
    }

    pub fn max_consecutive_write_failures(mut self, limit: u32) -> Self {
        self.max_consecutive_write_failures = limit;
        self
    }

    pub fn build(self) -> Result<(SessionController, JoinHandle<()>), SessionError> {
        let classifier = self.classifier.ok_or_else(|| {
            SessionError::InvalidConfig("a phase classifier is required".to_string())
        })?;
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(FfmpegBackend::new(&VideoSettings::default())));
        let renderer = self
            .renderer
            .unwrap_or_else(|| Arc::new(BannerOverlay::new()));

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let (state_tx, state_rx) = watch::channel(ControllerState::Stopped);
        let (preview_tx, _) = broadcast::channel(self.preview_buffer_size.max(1));

        info!("Session controller ready, classifier {}", classifier.name());
        let services = SessionServices {
            backend,
            classifier,
            renderer,
            source_options: self.source_options,
            max_consecutive_write_failures: self.max_consecutive_write_failures,
            preview_tx: preview_tx.clone(),
        };
        let supervisor = SessionSupervisor::new(command_rx, services, state_tx);
        let task = tokio::spawn(supervisor.run());

        Ok((
            SessionController {
                command_tx,
                state_rx,
                preview_tx,
            },
            task,
        ))
    }
}

impl Default for SessionControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
