//! Construction of inference backends for model handles

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::http_backend::{HttpBackend, HttpBackendConfig};
use crate::backend::traits::{BackendVariant, InferenceBackend, ModelKey};
use crate::config::{InferenceConfig, OcrConfig};
use crate::error::{AppError, Result};
use crate::gateway::backend_selector::SharedSignal;

/// Builds the backend behind a model handle.
///
/// Called at most once per key by the inference gateway.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, key: ModelKey) -> Result<Arc<dyn InferenceBackend>>;
}

/// Loader that builds HTTP backends from settings.
///
/// Credentials and the external endpoint are read from the shared signal at
/// load time, so they follow a selector reset.
pub struct ConfiguredLoader {
    inference: InferenceConfig,
    ocr: OcrConfig,
    signal: SharedSignal,
}

impl ConfiguredLoader {
    pub fn new(inference: InferenceConfig, ocr: OcrConfig, signal: impl Into<SharedSignal>) -> Self {
        Self {
            inference,
            ocr,
            signal: signal.into(),
        }
    }

    fn backend_config(&self, key: ModelKey) -> Result<HttpBackendConfig> {
        let name = format!("{}-{}", key.check, key.variant);
        let health_check_path = self.inference.health_check_path.clone();
        let signal = self.signal.current();

        let config = match key.variant {
            BackendVariant::Local => HttpBackendConfig {
                name,
                variant: key.variant,
                endpoints: self.inference.local_endpoints.clone(),
                credential: None,
                model: None,
                device: Some(self.inference.device.clone()),
                health_check_path,
                timeout_ms: self.inference.timeout_ms,
            },
            BackendVariant::Remote => {
                let credential = signal.credential().ok_or_else(|| {
                    AppError::internal(format!("{} requires a credential", key))
                })?;
                HttpBackendConfig {
                    name,
                    variant: key.variant,
                    endpoints: self.ocr.remote_endpoints.clone(),
                    credential: Some(credential.to_string()),
                    model: Some(self.ocr.remote_model.clone()),
                    device: None,
                    health_check_path,
                    timeout_ms: self.ocr.timeout_ms,
                }
            }
            BackendVariant::External => {
                let endpoint = signal.external_endpoint().ok_or_else(|| {
                    AppError::internal(format!("{} requires an external endpoint", key))
                })?;
                HttpBackendConfig {
                    name,
                    variant: key.variant,
                    endpoints: vec![endpoint.to_string()],
                    credential: None,
                    model: None,
                    device: None,
                    health_check_path,
                    timeout_ms: self.ocr.timeout_ms,
                }
            }
        };

        Ok(config)
    }
}

#[async_trait]
impl ModelLoader for ConfiguredLoader {
    async fn load(&self, key: ModelKey) -> Result<Arc<dyn InferenceBackend>> {
        let config = self.backend_config(key)?;
        debug!(key = %key, endpoints = ?config.endpoints, "Building backend");

        let backend = HttpBackend::new(&config)?;

        if self.inference.verify_on_load {
            backend.verify().await?;
        }

        info!(key = %key, backend = %config.name, "Backend ready");
        Ok(Arc::new(backend))
    }
}
