//! Health monitoring of loaded backends and the service health report

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::traits::{BackendVariant, ModelKey};
use crate::gateway::backend_selector::BackendSelector;
use crate::gateway::inference_gateway::{InferenceGateway, LoadState};
use crate::review::types::CheckType;

/// Health status of one loaded backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Instant,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: Instant::now(),
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

impl HealthStatus {
    fn record(&mut self, ok: bool, failure_threshold: u32, recovery_threshold: u32) {
        self.last_check = Instant::now();

        if ok {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            if !self.healthy && self.consecutive_successes >= recovery_threshold {
                self.healthy = true;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            if self.healthy && self.consecutive_failures >= failure_threshold {
                self.healthy = false;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Degraded,
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ServiceStatus,
    pub version: String,
    pub models_loaded: BTreeMap<CheckType, bool>,
    pub backends: BTreeMap<CheckType, Option<BackendVariant>>,
    /// When each ready check's model finished loading
    pub loaded_at: BTreeMap<CheckType, DateTime<Utc>>,
    pub gpu_available: bool,
    pub uptime_seconds: f64,
}

/// Periodically health-checks loaded backends and assembles the health report
pub struct HealthCheckManager {
    gateway: Arc<InferenceGateway>,
    selector: Arc<BackendSelector>,
    health_status: Arc<DashMap<ModelKey, HealthStatus>>,
    check_task: RwLock<Option<JoinHandle<()>>>,
    /// Number of consecutive failures before marking unhealthy
    failure_threshold: u32,
    /// Number of consecutive successes before marking healthy again
    recovery_threshold: u32,
    device: String,
    started_at: Instant,
}

impl HealthCheckManager {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        selector: Arc<BackendSelector>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            selector,
            health_status: Arc::new(DashMap::new()),
            check_task: RwLock::new(None),
            failure_threshold: 3,
            recovery_threshold: 2,
            device: device.into(),
            started_at: Instant::now(),
        }
    }

    /// Start the health check background task
    pub async fn start(&self, interval_secs: u64) {
        let gateway = self.gateway.clone();
        let health_status = self.health_status.clone();
        let failure_threshold = self.failure_threshold;
        let recovery_threshold = self.recovery_threshold;

        let handle = tokio::spawn(async move {
            let interval = Duration::from_secs(interval_secs.max(1));

            loop {
                tokio::time::sleep(interval).await;

                for handle in gateway.loaded_handles() {
                    let key = handle.key();
                    let ok = handle.backend().health_check().await;

                    let mut status = health_status.entry(key).or_default();
                    let was_healthy = status.healthy;
                    status.record(ok, failure_threshold, recovery_threshold);

                    if was_healthy && !status.healthy {
                        warn!(
                            key = %key,
                            failures = status.consecutive_failures,
                            "Backend marked unhealthy after consecutive failures"
                        );
                    } else if !was_healthy && status.healthy {
                        info!(key = %key, "Backend recovered and marked healthy");
                    }

                    debug!(
                        key = %key,
                        healthy = status.healthy,
                        consecutive_failures = status.consecutive_failures,
                        "Health check completed"
                    );
                }
            }
        });

        if let Some(previous) = self.check_task.write().await.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval_secs, "Started health check background task");
    }

    /// Stop the health check background task
    pub async fn stop(&self) {
        if let Some(handle) = self.check_task.write().await.take() {
            handle.abort();
            info!("Stopped health check background task");
        }
    }

    /// Healthy unless health checks have failed past the threshold
    pub fn is_healthy(&self, key: ModelKey) -> bool {
        self.health_status.get(&key).map(|s| s.healthy).unwrap_or(true)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Build the report served by the health endpoint.
    ///
    /// Degraded when a check's backend cannot be resolved, its load failed,
    /// or its health checks keep failing.
    pub fn report(&self) -> HealthReport {
        let mut degraded = false;
        let mut models_loaded = BTreeMap::new();
        let mut backends = BTreeMap::new();
        let mut loaded_at = BTreeMap::new();

        for check in CheckType::ALL {
            match self.selector.resolve_for(check) {
                Ok(resolution) => {
                    let key = ModelKey::new(check, resolution.variant);
                    let state = self.gateway.state(key);
                    if state == LoadState::Failed || !self.is_healthy(key) {
                        degraded = true;
                    }
                    models_loaded.insert(check, state == LoadState::Ready);
                    if let Some(handle) = self.gateway.handle(key) {
                        loaded_at.insert(check, handle.loaded_at());
                    }
                    backends.insert(check, Some(resolution.variant));
                }
                Err(e) => {
                    debug!(check = %check, error = %e, "Backend unresolved");
                    degraded = true;
                    models_loaded.insert(check, false);
                    backends.insert(check, None);
                }
            }
        }

        HealthReport {
            status: if degraded {
                ServiceStatus::Degraded
            } else {
                ServiceStatus::Healthy
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            models_loaded,
            backends,
            loaded_at,
            gpu_available: self.device.to_ascii_lowercase().starts_with("cuda"),
            uptime_seconds: self.uptime().as_secs_f64(),
        }
    }
}
