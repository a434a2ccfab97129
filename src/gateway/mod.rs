//! Gateway module - backend selection, model handle cache and health

pub mod backend_selector;
pub mod health_check;
pub mod inference_gateway;

pub use backend_selector::{BackendSelector, EnvironmentSignal, OcrMode, SharedSignal};
pub use health_check::HealthCheckManager;
pub use inference_gateway::{InferenceGateway, ModelHandle};
