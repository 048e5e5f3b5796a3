use crate::detection::DetectionCandidate;
use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to build input tensor: {0}")]
    Tensor(String),
    #[error("model run failed: {0}")]
    Run(String),
    #[error("unexpected model output: {0}")]
    Output(String),
    #[error("inference task aborted: {0}")]
    Aborted(String),
}

#[async_trait]
pub trait ModelService: Send + Sync + 'static {
    /// Runs detection on a decoded RGB image. An empty vector means the model
    /// found nothing above its threshold.
    async fn predict(&self, image: RgbImage) -> Result<Vec<DetectionCandidate>, InferenceError>;
}
