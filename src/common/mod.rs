pub mod frame;
pub mod phase;
pub mod status;

pub use frame::Frame;
pub use phase::{Phase, PhasePrediction, PhaseSource};
pub use status::OperatorStatus;
