//! Review orchestration: resolve, load, fan out, collect, aggregate

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analyzer::{analyzers_from_config, Analyzer, AnalyzerError, AnalyzerResult, AnalyzerSet};
use crate::backend::traits::ModelKey;
use crate::config::Settings;
use crate::error::Result;
use crate::gateway::backend_selector::BackendSelector;
use crate::gateway::inference_gateway::InferenceGateway;
use crate::queue::worker_pool::{PoolConfig, WorkerPool};
use crate::review::callback::CallbackNotifier;
use crate::review::image::{ImageData, ImageLoader};
use crate::review::types::{CheckOptions, CheckOutcome, CheckType, ReviewRequest, ReviewResult};

type CheckTask = JoinHandle<Option<std::result::Result<AnalyzerResult, AnalyzerError>>>;

/// Runs single-image reviews.
///
/// One instance serves both the aggregated and the per-check endpoints.
pub struct ReviewOrchestrator {
    gateway: Arc<InferenceGateway>,
    selector: Arc<BackendSelector>,
    analyzers: AnalyzerSet,
    images: ImageLoader,
    pool: WorkerPool,
    callbacks: CallbackNotifier,
    request_timeout: Duration,
    expose_errors: bool,
}

impl ReviewOrchestrator {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        selector: Arc<BackendSelector>,
        analyzers: AnalyzerSet,
        images: ImageLoader,
        pool: WorkerPool,
        callbacks: CallbackNotifier,
        request_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            selector,
            analyzers,
            images,
            pool,
            callbacks,
            request_timeout,
            expose_errors: false,
        }
    }

    /// Keep backend error text in results instead of generic messages
    pub fn with_error_detail(mut self, expose: bool) -> Self {
        self.expose_errors = expose;
        self
    }

    pub fn from_settings(
        settings: &Settings,
        gateway: Arc<InferenceGateway>,
        selector: Arc<BackendSelector>,
    ) -> Result<Self> {
        let review = &settings.review;
        Ok(Self::new(
            gateway,
            selector,
            analyzers_from_config(review)?,
            ImageLoader::new(
                Duration::from_millis(review.image_fetch_timeout_ms),
                review.max_image_bytes,
            )?,
            WorkerPool::new(PoolConfig {
                max_concurrent: review.max_concurrent_checks,
            }),
            CallbackNotifier::new(Duration::from_millis(review.callback_timeout_ms))?,
            Duration::from_millis(review.request_timeout_ms),
        )
        .with_error_detail(settings.debug))
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn callbacks(&self) -> &CallbackNotifier {
        &self.callbacks
    }

    pub fn expose_errors(&self) -> bool {
        self.expose_errors
    }

    /// Review one image.
    ///
    /// Request-level errors (invalid input, unloadable image) fail the whole
    /// review. Anything that goes wrong inside a check only fails that check.
    /// Unless error detail is enabled, failed checks carry generic messages.
    pub async fn review(&self, request: ReviewRequest) -> Result<ReviewResult> {
        let started = Instant::now();
        let review_id = Uuid::new_v4();

        request.validate()?;

        let mut outcomes: BTreeMap<CheckType, CheckOutcome> = BTreeMap::new();

        // Resolve before touching the image so misconfiguration shows up first
        let mut dispatch = Vec::with_capacity(request.checks.len());
        for &check in &request.checks {
            match self.selector.resolve_for(check) {
                Ok(resolution) => dispatch.push(ModelKey::new(check, resolution.variant)),
                Err(e) => {
                    warn!(review_id = %review_id, check = %check, error = %e, "Backend unresolved");
                    outcomes.insert(check, CheckOutcome::Failed(AnalyzerError::configuration(e)));
                }
            }
        }

        let image = Arc::new(self.images.load(&request.image).await?);

        debug!(
            review_id = %review_id,
            checks = dispatch.len(),
            format = image.format(),
            "Dispatching checks"
        );

        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let tasks: Vec<(CheckType, CheckTask)> = dispatch
            .into_iter()
            .map(|key| {
                let task = self.spawn_check(key, image.clone(), request.options_for(key.check));
                (key.check, task)
            })
            .collect();

        for (check, task) in tasks {
            let outcome = self.collect(review_id, check, task, deadline).await;
            outcomes.insert(check, outcome);
        }

        let mut result = ReviewResult::aggregate(review_id, outcomes, started.elapsed(), request.metadata);
        // Callers and callback receivers see the same redacted result
        if !self.expose_errors {
            result.redact_errors();
        }

        info!(
            review_id = %review_id,
            overall_pass = result.overall_pass,
            fail_reasons = ?result.fail_reasons,
            processing_time_ms = result.processing_time_ms,
            "Review completed"
        );

        if let Some(url) = &request.callback_url {
            self.callbacks.notify(url, &result);
        }

        Ok(result)
    }

    fn spawn_check(&self, key: ModelKey, image: Arc<ImageData>, options: CheckOptions) -> CheckTask {
        let gateway = self.gateway.clone();
        let analyzer = self.analyzers.get(&key.check).cloned();
        self.pool.spawn(run_check(gateway, analyzer, key, image, options))
    }

    /// Wait for one check against the shared deadline.
    ///
    /// On timeout the task is detached and its eventual result discarded.
    async fn collect(
        &self,
        review_id: Uuid,
        check: CheckType,
        task: CheckTask,
        deadline: tokio::time::Instant,
    ) -> CheckOutcome {
        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(Some(Ok(result)))) => {
                debug!(review_id = %review_id, check = %check, passed = result.passed, score = result.score, "Check finished");
                CheckOutcome::Completed(result)
            }
            Ok(Ok(Some(Err(err)))) => {
                warn!(review_id = %review_id, check = %check, kind = ?err.kind, error = %err.message, "Check failed");
                CheckOutcome::Failed(err)
            }
            Ok(Ok(None)) => CheckOutcome::Failed(AnalyzerError::internal(check, "worker pool is closed")),
            Ok(Err(join_err)) => {
                error!(review_id = %review_id, check = %check, error = %join_err, "Check task aborted");
                CheckOutcome::Failed(AnalyzerError::internal(check, format!("check task aborted: {}", join_err)))
            }
            Err(_) => {
                warn!(review_id = %review_id, check = %check, timeout_ms = self.request_timeout.as_millis() as u64, "Check timed out");
                CheckOutcome::Failed(AnalyzerError::timeout(
                    check,
                    format!("no result within {} ms", self.request_timeout.as_millis()),
                ))
            }
        }
    }
}

async fn run_check(
    gateway: Arc<InferenceGateway>,
    analyzer: Option<Arc<dyn Analyzer>>,
    key: ModelKey,
    image: Arc<ImageData>,
    options: CheckOptions,
) -> std::result::Result<AnalyzerResult, AnalyzerError> {
    let analyzer = analyzer
        .ok_or_else(|| AnalyzerError::internal(key.check, "no analyzer registered for this check"))?;

    let handle = gateway
        .get_or_create(key)
        .await
        .map_err(|e| AnalyzerError::model_unavailable(key.check, &e))?;

    analyzer.analyze(&handle, &image, &options).await
}
