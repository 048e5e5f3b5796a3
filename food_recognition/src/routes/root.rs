use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::instrument;

pub const SERVICE_NAME: &str = "Food Recognition API";
pub const SERVICE_VERSION: &str = "1.0.0";

#[derive(Serialize, Deserialize)]
pub struct ServiceInfo {
    pub service: String,
    pub version: String,
    pub model_type: String,
    pub status: String,
}

#[instrument(skip(state))]
pub async fn service_info<M: ModelService>(State(state): State<SharedState<M>>) -> Json<ServiceInfo> {
    let inference = &state.inference_service;
    let status = if inference.is_ready() { "ready" } else { "error" };

    Json(ServiceInfo {
        service: SERVICE_NAME.into(),
        version: SERVICE_VERSION.into(),
        model_type: inference.model_type().into(),
        status: status.into(),
    })
}
