use crate::{
    config::{Config, ServerConfig},
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::{OrtModelLoader, OrtModelService},
    resolver::resolve,
    routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::future::Future;
use tokio::{net::TcpListener, signal};

pub struct SharedState<M: ModelService> {
    pub inference_service: InferenceService<M>,
}

impl<M: ModelService> Clone for SharedState<M> {
    fn clone(&self) -> Self {
        Self {
            inference_service: self.inference_service.clone(),
        }
    }
}

pub fn build_router<M: ModelService>(
    inference_service: InferenceService<M>,
    max_body_bytes: usize,
) -> Router {
    let app_state = SharedState { inference_service };

    Router::new()
        .merge(api_routes::<M>())
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        inference_service: InferenceService<M>,
        config: &ServerConfig,
    ) -> anyhow::Result<Self> {
        let router = build_router(inference_service, config.max_body_bytes);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        tracing::info!("Food recognition service listening on {}", self.listener.local_addr()?);

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown signal received, starting graceful shutdown");
            })
            .await?;

        Ok(())
    }
}

/// Resolves the model off the async runtime, then serves until a shutdown
/// signal arrives.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Service starting, resolving detection model");
    ort::init().with_name("food_recognition").commit()?;

    let model_config = config.model.clone();
    let resolved = tokio::task::spawn_blocking(move || {
        let loader = OrtModelLoader::new(&model_config);
        resolve(&model_config, &loader)
    })
    .await?;

    let inference_service: InferenceService<OrtModelService> = match resolved {
        Ok(resolved) => {
            tracing::info!("Service ready with {}", resolved.source);
            InferenceService::ready(resolved.model, resolved.source.tag())
        }
        Err(e) if config.model.require_on_startup => {
            tracing::error!("Service failed to start: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            tracing::error!("Serving without a model: {}", e);
            InferenceService::unavailable()
        }
    };

    let server = HttpServer::new(inference_service, &config.server).await?;
    server.run(shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
