use async_trait::async_trait;
use image::RgbImage;

use crate::common::Phase;
use crate::error::InferenceError;

/// Adapter around the external phase-classification model.
///
/// Calls are awaited on the orchestration task; implementations backed by a
/// blocking model should move the work onto `tokio::task::spawn_blocking`.
#[async_trait]
pub trait PhaseClassifier: Send + Sync {
    async fn classify(&self, image: &RgbImage) -> Result<Phase, InferenceError>;
    fn name(&self) -> &'static str;
}

/// Stand-in used when no model is attached: every frame is `unknown`.
#[derive(Debug, Default, Clone)]
pub struct UnavailableClassifier;

#[async_trait]
impl PhaseClassifier for UnavailableClassifier {
    async fn classify(&self, _image: &RgbImage) -> Result<Phase, InferenceError> {
        Ok(Phase::Unknown)
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}
