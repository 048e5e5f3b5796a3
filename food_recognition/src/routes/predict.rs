use crate::{
    detection::PredictionResult, inference_service::PredictError, model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Deserialize)]
pub struct ImageRequest {
    pub image_base64: String,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorDetail {
    pub detail: String,
}

impl ErrorDetail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            PredictError::ModelUnavailable => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            PredictError::InvalidRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            PredictError::PayloadTooLarge(_) => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            PredictError::InvalidImage(_) | PredictError::InferenceFailed(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prediction failed: {}", self),
            ),
        };
        (status, Json(ErrorDetail::new(detail))).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, PredictError> {
    let Json(request) = payload.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            PredictError::PayloadTooLarge(e.body_text())
        } else {
            PredictError::InvalidRequest(e.body_text())
        }
    })?;

    match state.inference_service.predict(&request.image_base64).await {
        Ok(result) => {
            tracing::info!(
                "Predicted {} ({:.3}) with {} model",
                result.label,
                result.confidence,
                result.model_source_tag
            );
            Ok(Json(result))
        }
        Err(e) => {
            tracing::error!("Prediction error: {}", e);
            Err(e)
        }
    }
}
