pub mod active;
pub mod command;
pub mod config;
pub mod controller;
pub mod state;

pub use active::{ActiveSession, FrameOutcome, SessionServices};
pub use command::SessionCommand;
pub use config::{Participants, Session, SessionConfig};
pub use controller::{SessionController, SessionControllerBuilder, SessionSupervisor};
pub use state::{ControllerState, ControllerStatus, PreviewFrame, SessionReport, SessionState};
