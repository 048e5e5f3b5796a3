mod fetch;
mod ort_service;
mod server;

pub mod config;
pub mod detection;
pub mod inference_service;
pub mod labels;
pub mod model_service;
pub mod resolver;
pub mod routes;

pub use server::{build_router, start_server, HttpServer, SharedState};
