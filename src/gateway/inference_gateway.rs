//! Lazy, single-flight model handle cache

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::backend::loader::ModelLoader;
use crate::backend::traits::{InferenceBackend, ModelKey};
use crate::error::ModelLoadError;
use crate::review::types::CheckType;

/// A loaded model, shareable across concurrent reviews
#[derive(Clone)]
pub struct ModelHandle {
    key: ModelKey,
    backend: Arc<dyn InferenceBackend>,
    loaded_at: DateTime<Utc>,
}

impl ModelHandle {
    pub fn new(key: ModelKey, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            key,
            backend,
            loaded_at: Utc::now(),
        }
    }

    pub fn key(&self) -> ModelKey {
        self.key
    }

    pub fn backend(&self) -> &dyn InferenceBackend {
        self.backend.as_ref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("key", &self.key)
            .field("backend", &self.backend.name())
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

type LoadOutcome = Result<ModelHandle, ModelLoadError>;

/// Lifecycle of one key's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Absent,
    Loading,
    Ready,
    Failed,
}

/// Outcome of a startup preload
#[derive(Debug, Default)]
pub struct PreloadReport {
    pub loaded: Vec<ModelKey>,
    pub failed: Vec<ModelLoadError>,
}

/// Holds at most one handle per [`ModelKey`].
///
/// Concurrent first requests for a key share one load. A failed load is
/// cached and returned to every later caller until [`invalidate`] is called.
///
/// [`invalidate`]: InferenceGateway::invalidate
pub struct InferenceGateway {
    loader: Arc<dyn ModelLoader>,
    slots: DashMap<ModelKey, Arc<OnceCell<LoadOutcome>>>,
    load_attempts: AtomicU64,
}

impl InferenceGateway {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: DashMap::new(),
            load_attempts: AtomicU64::new(0),
        }
    }

    /// Return the handle for `key`, loading it on first demand.
    pub async fn get_or_create(&self, key: ModelKey) -> Result<ModelHandle, ModelLoadError> {
        // Clone the cell out so no shard lock is held across the await
        let cell = self
            .slots
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let outcome = cell
            .get_or_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::Relaxed);
                info!(key = %key, "Loading model");

                match self.loader.load(key).await {
                    Ok(backend) => {
                        info!(key = %key, backend = %backend.name(), "Model loaded");
                        Ok(ModelHandle::new(key, backend))
                    }
                    Err(e) => {
                        error!(key = %key, error = %e, "Model load failed");
                        Err(ModelLoadError::new(key, e.to_string()))
                    }
                }
            })
            .await;

        outcome.clone()
    }

    pub fn state(&self, key: ModelKey) -> LoadState {
        match self.slots.get(&key) {
            None => LoadState::Absent,
            Some(cell) => match cell.get() {
                None => LoadState::Loading,
                Some(Ok(_)) => LoadState::Ready,
                Some(Err(_)) => LoadState::Failed,
            },
        }
    }

    /// Whether any handle for `check` is ready
    pub fn is_available(&self, check: CheckType) -> bool {
        self.slots
            .iter()
            .any(|entry| entry.key().check == check && matches!(entry.value().get(), Some(Ok(_))))
    }

    /// The loaded handle for `key`, if its load finished successfully
    pub fn handle(&self, key: ModelKey) -> Option<ModelHandle> {
        let cell = self.slots.get(&key)?;
        match cell.get() {
            Some(Ok(handle)) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Every handle that finished loading successfully
    pub fn loaded_handles(&self) -> Vec<ModelHandle> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value().get() {
                Some(Ok(handle)) => Some(handle.clone()),
                _ => None,
            })
            .collect()
    }

    /// Cached load failures
    pub fn failures(&self) -> Vec<ModelLoadError> {
        self.slots
            .iter()
            .filter_map(|entry| match entry.value().get() {
                Some(Err(e)) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop a slot so the next request loads again. Returns whether one existed.
    ///
    /// Callers already waiting on an in-flight load still receive its outcome.
    pub fn invalidate(&self, key: ModelKey) -> bool {
        let removed = self.slots.remove(&key).is_some();
        if removed {
            warn!(key = %key, "Model handle invalidated");
        }
        removed
    }

    /// Number of loader invocations so far
    pub fn load_attempts(&self) -> u64 {
        self.load_attempts.load(Ordering::Relaxed)
    }

    /// Load the given keys concurrently. Failures are reported, not returned.
    pub async fn preload(&self, keys: impl IntoIterator<Item = ModelKey>) -> PreloadReport {
        let outcomes = join_all(keys.into_iter().map(|key| self.get_or_create(key))).await;

        let mut report = PreloadReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(handle) => report.loaded.push(handle.key()),
                Err(e) => {
                    warn!(key = %e.key, error = %e.message, "Preload failed; check will report unavailable");
                    report.failed.push(e);
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Model preload finished"
        );
        report
    }
}
