//! Batch review coordination

use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::review::orchestrator::ReviewOrchestrator;
use crate::review::types::{BatchItemResult, BatchReport, ReviewRequest};

/// Configuration for batch limits
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum images per aggregated batch
    pub max_batch_size: usize,
    /// Maximum images per single-check batch
    pub max_atomic_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            max_atomic_batch_size: 50,
        }
    }
}

/// Which limit a batch is held to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    Aggregated,
    Atomic,
}

/// One batch entry. Entries that failed validation are carried as errors
/// so they fail in place without affecting their neighbours.
pub type BatchItem = Result<ReviewRequest>;

/// A batch of single-image reviews
#[derive(Debug)]
pub struct BatchRequest {
    pub items: Vec<BatchItem>,
    pub scope: BatchScope,
    pub callback_url: Option<String>,
}

/// Runs every item of a batch through the orchestrator concurrently
pub struct BatchCoordinator {
    orchestrator: Arc<ReviewOrchestrator>,
    config: BatchConfig,
}

impl BatchCoordinator {
    pub fn new(orchestrator: Arc<ReviewOrchestrator>, config: BatchConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn limit(&self, scope: BatchScope) -> usize {
        match scope {
            BatchScope::Aggregated => self.config.max_batch_size,
            BatchScope::Atomic => self.config.max_atomic_batch_size,
        }
    }

    /// Review every item; results come back in input order.
    ///
    /// Only an empty or oversized batch fails as a whole.
    pub async fn process_batch(&self, batch: BatchRequest) -> Result<BatchReport> {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        let size = batch.items.len();
        let max = self.limit(batch.scope);

        if size == 0 {
            return Err(AppError::invalid_input("Batch must contain at least one image"));
        }
        if size > max {
            return Err(AppError::BatchTooLarge { size, max });
        }

        if let Some(url) = &batch.callback_url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| AppError::invalid_input(format!("Invalid callback_url: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::invalid_input("callback_url must use http or https"));
            }
        }

        info!(batch_id = %batch_id, size = size, scope = ?batch.scope, "Batch started");

        let tasks = batch.items.into_iter().map(|item| {
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                match item {
                    Ok(request) => orchestrator.review(request).await,
                    Err(e) => Err(e),
                }
            })
        });

        let expose = self.orchestrator.expose_errors();
        let results: Vec<BatchItemResult> = join_all(tasks)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(Ok(result)) => BatchItemResult {
                    index,
                    success: true,
                    data: Some(result),
                    error: None,
                },
                Ok(Err(e)) => {
                    warn!(batch_id = %batch_id, index = index, error = %e, "Batch item failed");
                    BatchItemResult {
                        index,
                        success: false,
                        data: None,
                        error: Some(if expose { e.to_string() } else { e.public_message() }),
                    }
                }
                Err(join_err) => {
                    warn!(batch_id = %batch_id, index = index, error = %join_err, "Batch item aborted");
                    BatchItemResult {
                        index,
                        success: false,
                        data: None,
                        error: Some("review task aborted".to_string()),
                    }
                }
            })
            .collect();

        let report = BatchReport::new(batch_id, results, started.elapsed());

        info!(
            batch_id = %batch_id,
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            "Batch completed"
        );

        if let Some(url) = &batch.callback_url {
            self.orchestrator.callbacks().notify(url, &report);
        }

        Ok(report)
    }
}
