//! AeroVision review gateway
//!
//! Reviews aviation photographs with four checks (photo quality, aircraft
//! type, airline livery and registration number) run concurrently against
//! lazily loaded inference backends.

pub mod analyzer;
pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod queue;
pub mod review;
pub mod stats;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::loader::ModelLoader;
use gateway::{BackendSelector, HealthCheckManager, InferenceGateway, SharedSignal};
use queue::batch::{BatchConfig, BatchCoordinator};
use review::orchestrator::ReviewOrchestrator;
use stats::RequestCounter;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub selector: Arc<BackendSelector>,
    pub gateway: Arc<InferenceGateway>,
    pub orchestrator: Arc<ReviewOrchestrator>,
    pub batches: Arc<BatchCoordinator>,
    pub health_manager: Arc<HealthCheckManager>,
    pub stats: Arc<RequestCounter>,
}

impl AppState {
    /// Wire every component from settings and a model loader.
    ///
    /// Pass the loader the same [`SharedSignal`] so selector resets reach it.
    pub fn build(
        settings: config::Settings,
        loader: Arc<dyn ModelLoader>,
        signal: impl Into<SharedSignal>,
    ) -> Result<Self> {
        let selector = Arc::new(BackendSelector::new(settings.ocr.mode, signal));
        let gateway = Arc::new(InferenceGateway::new(loader));

        let orchestrator = Arc::new(ReviewOrchestrator::from_settings(
            &settings,
            gateway.clone(),
            selector.clone(),
        )?);

        let batches = Arc::new(BatchCoordinator::new(
            orchestrator.clone(),
            BatchConfig {
                max_batch_size: settings.review.max_batch_size,
                max_atomic_batch_size: settings.review.max_atomic_batch_size,
            },
        ));

        let health_manager = Arc::new(HealthCheckManager::new(
            gateway.clone(),
            selector.clone(),
            settings.inference.device.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            selector,
            gateway,
            orchestrator,
            batches,
            health_manager,
            stats: Arc::new(RequestCounter::new()),
        })
    }

    /// Model keys for every check under the current backend resolution.
    /// Checks whose backend cannot be resolved are skipped.
    pub fn resolved_keys(&self) -> Vec<backend::ModelKey> {
        review::CheckType::ALL
            .into_iter()
            .filter_map(|check| {
                self.selector
                    .resolve_for(check)
                    .ok()
                    .map(|r| backend::ModelKey::new(check, r.variant))
            })
            .collect()
    }

    /// Wrap an error with this process's debug toggle
    pub fn api_error(&self, error: AppError) -> error::ApiError {
        error::ApiError {
            error,
            include_detail: self.settings.debug,
        }
    }
}
