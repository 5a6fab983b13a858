use tokio::sync::oneshot;

use super::config::SessionConfig;
use super::state::{ControllerStatus, SessionReport};
use crate::common::{OperatorStatus, Phase};
use crate::error::SessionError;

pub enum SessionCommand {
    Start {
        config: SessionConfig,
        responder: oneshot::Sender<Result<String, SessionError>>,
    },
    Stop {
        responder: oneshot::Sender<Result<Option<SessionReport>, SessionError>>,
    },
    Status {
        responder: oneshot::Sender<ControllerStatus>,
    },
    SetOverride {
        phase: Phase,
    },
    SetStatus {
        status: OperatorStatus,
    },
}
