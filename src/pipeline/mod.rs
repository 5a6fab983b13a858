pub mod font;
pub mod inference;
pub mod overlay;
pub mod override_controller;

pub use inference::{PhaseClassifier, UnavailableClassifier};
pub use overlay::{BannerOverlay, OverlayRenderer, OverlayStamp};
pub use override_controller::{ManualOverrideController, OverrideState};
