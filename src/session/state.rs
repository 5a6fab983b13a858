use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::config::Session;
use crate::common::{OperatorStatus, Phase};
use crate::pipeline::{ManualOverrideController, OverrideState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Faulted,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ControllerState::Stopped => "stopped",
            ControllerState::Starting => "starting",
            ControllerState::Running => "running",
            ControllerState::Stopping => "stopping",
            ControllerState::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// Everything that changes while a session runs. Built fresh at every start.
#[derive(Debug)]
pub struct SessionState {
    pub overrides: ManualOverrideController,
    pub status: OperatorStatus,
    /// Most recent classifier output; overlays fall back to it between samples.
    pub last_inferred: Phase,
    pub frames_delivered: u64,
    pub frames_recorded: u64,
    pub frames_sampled: u64,
    pub inference_failures: u64,
    pub render_failures: u64,
    pub write_failures: u64,
    pub consecutive_write_failures: u32,
}

impl SessionState {
    pub fn new(override_window: u32) -> Self {
        Self {
            overrides: ManualOverrideController::new(override_window),
            status: OperatorStatus::Unset,
            last_inferred: Phase::Unknown,
            frames_delivered: 0,
            frames_recorded: 0,
            frames_sampled: 0,
            inference_failures: 0,
            render_failures: 0,
            write_failures: 0,
            consecutive_write_failures: 0,
        }
    }
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub video_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub frames_delivered: u64,
    pub frames_recorded: u64,
    pub frames_sampled: u64,
    pub inference_failures: u64,
    pub render_failures: u64,
    pub write_failures: u64,
    pub error: Option<String>,
}

impl SessionReport {
    pub fn new(session: &Session, state: &SessionState) -> Self {
        Self {
            session_id: session.id.clone(),
            video_path: session.video_path.clone(),
            log_path: None,
            frames_delivered: state.frames_delivered,
            frames_recorded: state.frames_recorded,
            frames_sampled: state.frames_sampled,
            inference_failures: state.inference_failures,
            render_failures: state.render_failures,
            write_failures: state.write_failures,
            error: None,
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "session:   {}", self.session_id)?;
        writeln!(f, "video:     {}", self.video_path.display())?;
        match &self.log_path {
            Some(path) => writeln!(f, "log:       {}", path.display())?,
            None => writeln!(f, "log:       (no rows)")?,
        }
        writeln!(
            f,
            "frames:    {} delivered, {} recorded, {} sampled",
            self.frames_delivered, self.frames_recorded, self.frames_sampled
        )?;
        write!(
            f,
            "failures:  {} inference, {} render, {} write",
            self.inference_failures, self.render_failures, self.write_failures
        )?;
        if let Some(error) = &self.error {
            write!(f, "\nerror:     {}", error)?;
        }
        Ok(())
    }
}

/// Point-in-time view of the controller, answered by `SessionController::status`.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub session_id: Option<String>,
    pub frames_delivered: u64,
    pub frames_recorded: u64,
    pub frames_sampled: u64,
    pub active_override: OverrideState,
    pub operator_status: OperatorStatus,
    pub last_error: Option<String>,
    pub last_report: Option<SessionReport>,
}

impl ControllerStatus {
    pub fn idle(state: ControllerState) -> Self {
        Self {
            state,
            session_id: None,
            frames_delivered: 0,
            frames_recorded: 0,
            frames_sampled: 0,
            active_override: OverrideState::NoOverride,
            operator_status: OperatorStatus::Unset,
            last_error: None,
            last_report: None,
        }
    }
}

/// Annotated frame published to preview subscribers.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub index: u64,
    pub image: Arc<RgbImage>,
    pub phase: Phase,
    pub sampled: bool,
}
