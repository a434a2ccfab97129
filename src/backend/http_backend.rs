//! HTTP inference backend client

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::traits::{BackendEndpoint, BackendVariant, InferenceBackend};
use crate::error::{AppError, Result};
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

/// Connection settings for one HTTP backend
#[derive(Clone)]
pub struct HttpBackendConfig {
    pub name: String,
    pub variant: BackendVariant,
    pub endpoints: Vec<String>,
    pub credential: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub health_check_path: String,
    pub timeout_ms: u64,
}

impl std::fmt::Debug for HttpBackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackendConfig")
            .field("name", &self.name)
            .field("variant", &self.variant)
            .field("endpoints", &self.endpoints)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("device", &self.device)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// HTTP-based inference backend.
///
/// Each call goes to `POST {endpoint}/v1/infer/{check}`; endpoints are used
/// round-robin and skipped after repeated connection failures.
pub struct HttpBackend {
    name: String,
    variant: BackendVariant,
    client: Client,
    endpoints: Arc<RwLock<Vec<BackendEndpoint>>>,
    health_check_path: String,
    credential: Option<String>,
    model: Option<String>,
    device: Option<String>,
    next_index: AtomicUsize,
}

/// Request body sent to inference endpoints
#[derive(Debug, Serialize)]
struct ApiInferRequest<'a> {
    image_base64: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
}

impl HttpBackend {
    /// Create a new HTTP backend from configuration
    pub fn new(config: &HttpBackendConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(AppError::internal(format!(
                "Backend '{}' has no endpoints",
                config.name
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let endpoints: Vec<BackendEndpoint> = config
            .endpoints
            .iter()
            .map(BackendEndpoint::new)
            .collect();

        Ok(Self {
            name: config.name.clone(),
            variant: config.variant,
            client,
            endpoints: Arc::new(RwLock::new(endpoints)),
            health_check_path: config.health_check_path.clone(),
            credential: config.credential.clone(),
            model: config.model.clone(),
            device: config.device.clone(),
            next_index: AtomicUsize::new(0),
        })
    }

    /// Get the next healthy endpoint using round-robin
    fn get_next_endpoint(&self) -> Option<String> {
        let endpoints = self.endpoints.read();
        let healthy: Vec<_> = endpoints.iter().filter(|e| e.healthy).collect();

        if healthy.is_empty() {
            return None;
        }

        let index = self.next_index.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Some(healthy[index].url.clone())
    }

    fn mark_endpoint_unhealthy(&self, url: &str) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.url == url) {
            endpoint.mark_unhealthy();
            warn!(
                backend = %self.name,
                url = %url,
                failures = endpoint.consecutive_failures,
                healthy = endpoint.healthy,
                "Endpoint failure recorded"
            );
        }
    }

    fn mark_endpoint_healthy(&self, url: &str) {
        let mut endpoints = self.endpoints.write();
        if let Some(endpoint) = endpoints.iter_mut().find(|e| e.url == url) {
            if !endpoint.healthy || endpoint.consecutive_failures > 0 {
                debug!(backend = %self.name, url = %url, "Marked endpoint as healthy");
            }
            endpoint.mark_healthy();
        }
    }

    /// Check every endpoint once; fails unless at least one answers.
    pub async fn verify(&self) -> Result<()> {
        if self.health_check().await {
            Ok(())
        } else {
            Err(AppError::BackendUnreachable(format!(
                "no endpoint of '{}' answered its health check",
                self.name
            )))
        }
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn variant(&self) -> BackendVariant {
        self.variant
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.read().iter().map(|e| e.url.clone()).collect()
    }

    async fn infer(
        &self,
        check: CheckType,
        image: &ImageData,
        options: &CheckOptions,
    ) -> Result<serde_json::Value> {
        let endpoint = self.get_next_endpoint().ok_or_else(|| {
            AppError::BackendUnreachable(format!("no healthy endpoints for '{}'", self.name))
        })?;
        let url = format!("{}/v1/infer/{}", endpoint, check);

        debug!(backend = %self.name, endpoint = %endpoint, check = %check, "Sending inference request");

        let body = ApiInferRequest {
            image_base64: image.base64(),
            format: image.format(),
            top_k: options.top_k,
            model: self.model.as_deref(),
            device: self.device.as_deref(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(credential) = &self.credential {
            request = request.bearer_auth(credential);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                self.mark_endpoint_unhealthy(&endpoint);
                return Err(AppError::Timeout(format!("{} did not answer: {}", endpoint, e)));
            }
            Err(e) if e.is_connect() => {
                self.mark_endpoint_unhealthy(&endpoint);
                return Err(AppError::BackendUnreachable(format!(
                    "Connection failed to {}: {}",
                    endpoint, e
                )));
            }
            Err(e) => return Err(AppError::HttpClient(e)),
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // 5xx counts against the endpoint, 4xx is about this request
            if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                self.mark_endpoint_unhealthy(&endpoint);
            }
            return Err(AppError::Backend(format!(
                "Backend returned {}: {}",
                status, body
            )));
        }

        self.mark_endpoint_healthy(&endpoint);

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AppError::MalformedResponse(format!("Failed to parse response: {}", e)))
    }

    async fn health_check(&self) -> bool {
        let endpoints = self.endpoints.read().clone();
        let mut any_healthy = false;

        for endpoint in &endpoints {
            let url = format!("{}{}", endpoint.url, self.health_check_path);

            let mut request = self.client.get(&url);
            if let Some(credential) = &self.credential {
                request = request.bearer_auth(credential);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    self.mark_endpoint_healthy(&endpoint.url);
                    any_healthy = true;
                    debug!(backend = %self.name, endpoint = %endpoint.url, "Health check passed");
                }
                Ok(response) => {
                    self.mark_endpoint_unhealthy(&endpoint.url);
                    debug!(
                        backend = %self.name,
                        endpoint = %endpoint.url,
                        status = %response.status(),
                        "Health check failed"
                    );
                }
                Err(e) => {
                    self.mark_endpoint_unhealthy(&endpoint.url);
                    debug!(
                        backend = %self.name,
                        endpoint = %endpoint.url,
                        error = %e,
                        "Health check failed"
                    );
                }
            }
        }

        any_healthy
    }
}
