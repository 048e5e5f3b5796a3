use crate::{detection::PredictionResult, model_service::ModelService};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

pub const UNKNOWN_MODEL_TYPE: &str = "unknown";

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Model not loaded")]
    ModelUnavailable,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
}

/// Either a resolved model with its source tag, or nothing when resolution
/// failed and the service was allowed to come up anyway.
pub struct InferenceService<M: ModelService> {
    model_service: Option<Arc<M>>,
    model_type: String,
}

impl<M: ModelService> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            model_service: self.model_service.clone(),
            model_type: self.model_type.clone(),
        }
    }
}

impl<M: ModelService> InferenceService<M> {
    pub fn ready(model_service: M, model_type: impl Into<String>) -> Self {
        Self {
            model_service: Some(Arc::new(model_service)),
            model_type: model_type.into(),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            model_service: None,
            model_type: UNKNOWN_MODEL_TYPE.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.model_service.is_some()
    }

    pub fn model_type(&self) -> &str {
        &self.model_type
    }

    pub async fn predict(&self, image_base64: &str) -> Result<PredictionResult, PredictError> {
        let model_service = self
            .model_service
            .as_ref()
            .ok_or(PredictError::ModelUnavailable)?;

        let image = decode_image(image_base64)?;
        tracing::debug!("Decoded {}x{} image", image.width(), image.height());

        let candidates = model_service
            .predict(image)
            .await
            .map_err(|e| PredictError::InferenceFailed(e.to_string()))?;

        tracing::debug!("Model returned {} detections", candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, label={}, confidence={:.3}",
                i,
                candidate.class_id,
                candidate.class_name,
                candidate.confidence
            );
        }

        Ok(PredictionResult::from_candidates(&candidates, &self.model_type))
    }
}

/// Base64 payload to RGB pixels. A `data:<mime>;base64,` prefix and MIME
/// style line wrapping are accepted.
fn decode_image(image_base64: &str) -> Result<RgbImage, PredictError> {
    let payload = image_base64.trim();
    let payload = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let payload: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| PredictError::InvalidImage(format!("bad base64 payload: {}", e)))?;

    let image = image::ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| PredictError::InvalidImage(e.to_string()))?
        .decode()
        .map_err(|e| PredictError::InvalidImage(e.to_string()))?;

    Ok(image.to_rgb8())
}
