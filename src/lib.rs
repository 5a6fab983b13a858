pub mod common;
pub mod config;
pub mod error;
pub mod intake;
pub mod logging;
pub mod operator;
pub mod pipeline;
pub mod recording;
pub mod session;
pub mod video;

#[cfg(test)]
mod testing;

pub use config::Settings;
pub use error::{AppError, SessionError};
pub use session::{SessionConfig, SessionController, SessionControllerBuilder};
