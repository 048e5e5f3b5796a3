mod health;
mod predict;
mod root;

use crate::{model_service::ModelService, server::SharedState};
use axum::{
    routing::{get, post},
    Router,
};

pub use health::healthcheck;
pub use predict::{predict, ErrorDetail, ImageRequest};
pub use root::{service_info, ServiceInfo};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new()
        .route("/", get(service_info::<M>))
        .route("/health", get(healthcheck::<M>))
        .route("/predict", post(predict::<M>))
}
