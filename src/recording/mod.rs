pub mod log_record;
pub mod session_recorder;

pub use log_record::{inference_rate, LogRecord};
pub use session_recorder::SessionRecorder;
