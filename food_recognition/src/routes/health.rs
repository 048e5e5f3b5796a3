use crate::{model_service::ModelService, routes::ErrorDetail, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    model_type: String,
    model_loaded: bool,
}

#[instrument(skip(state))]
pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Response {
    let inference = &state.inference_service;
    if !inference.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorDetail::new("Model not loaded")),
        )
            .into_response();
    }

    Json(Status {
        status: "healthy".into(),
        model_type: inference.model_type().into(),
        model_loaded: true,
    })
    .into_response()
}
