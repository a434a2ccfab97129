//! Analyzer adapters: interpret raw backend output for each check

pub mod classifier;
pub mod quality;
pub mod registration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::ReviewConfig;
use crate::error::{AppError, ConfigurationError, ModelLoadError, Result};
use crate::gateway::inference_gateway::ModelHandle;
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

pub use classifier::{ClassificationDetails, ClassifierAnalyzer, Prediction};
pub use quality::{QualityAnalyzer, QualityDetails};
pub use registration::{RegistrationAnalyzer, RegistrationDetails, RegistrationPattern};

/// Check-specific payload of a result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CheckDetails {
    Quality(QualityDetails),
    Classification(ClassificationDetails),
    Registration(RegistrationDetails),
}

/// Normalized outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerResult {
    pub check: CheckType,
    pub passed: bool,
    pub score: f64,
    pub details: CheckDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: f64,
}

/// Why a check produced no result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerErrorKind {
    Timeout,
    BackendUnreachable,
    BackendFailure,
    MalformedOutput,
    ModelUnavailable,
    Configuration,
    Internal,
}

impl AnalyzerErrorKind {
    /// Message shown when backend detail must not leak
    pub fn generic_message(&self) -> &'static str {
        match self {
            AnalyzerErrorKind::Timeout => "check did not finish before the review deadline",
            AnalyzerErrorKind::BackendUnreachable => "inference backend is unreachable",
            AnalyzerErrorKind::BackendFailure => "inference backend returned an error",
            AnalyzerErrorKind::MalformedOutput => "inference backend returned unusable output",
            AnalyzerErrorKind::ModelUnavailable => "model for this check is unavailable",
            AnalyzerErrorKind::Configuration => "backend for this check is not configured",
            AnalyzerErrorKind::Internal => "internal error while running the check",
        }
    }
}

/// A check that failed to produce a result. Scoped to that check only.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{check} check failed ({kind:?}): {message}")]
pub struct AnalyzerError {
    #[serde(skip)]
    pub check: CheckType,
    pub kind: AnalyzerErrorKind,
    pub message: String,
}

impl AnalyzerError {
    pub fn new(check: CheckType, kind: AnalyzerErrorKind, message: impl Into<String>) -> Self {
        Self {
            check,
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(check: CheckType, message: impl Into<String>) -> Self {
        Self::new(check, AnalyzerErrorKind::MalformedOutput, message)
    }

    pub fn timeout(check: CheckType, message: impl Into<String>) -> Self {
        Self::new(check, AnalyzerErrorKind::Timeout, message)
    }

    pub fn internal(check: CheckType, message: impl Into<String>) -> Self {
        Self::new(check, AnalyzerErrorKind::Internal, message)
    }

    pub fn configuration(err: ConfigurationError) -> Self {
        Self::new(err.check, AnalyzerErrorKind::Configuration, err.message)
    }

    pub fn model_unavailable(check: CheckType, err: &ModelLoadError) -> Self {
        Self::new(check, AnalyzerErrorKind::ModelUnavailable, err.to_string())
    }

    /// Classify an error raised while calling a backend.
    pub fn from_backend(check: CheckType, err: AppError) -> Self {
        let kind = match &err {
            AppError::Timeout(_) => AnalyzerErrorKind::Timeout,
            AppError::BackendUnreachable(_) => AnalyzerErrorKind::BackendUnreachable,
            AppError::HttpClient(e) if e.is_timeout() => AnalyzerErrorKind::Timeout,
            AppError::HttpClient(e) if e.is_connect() => AnalyzerErrorKind::BackendUnreachable,
            AppError::MalformedResponse(_) | AppError::Json(_) => AnalyzerErrorKind::MalformedOutput,
            AppError::ModelLoad(_) => AnalyzerErrorKind::ModelUnavailable,
            AppError::Configuration(_) | AppError::Config(_) => AnalyzerErrorKind::Configuration,
            AppError::Internal(_) => AnalyzerErrorKind::Internal,
            _ => AnalyzerErrorKind::BackendFailure,
        };
        Self::new(check, kind, err.to_string())
    }

    pub fn redact(&mut self) {
        self.message = self.kind.generic_message().to_string();
    }
}

/// Interprets one check's backend output
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn check(&self) -> CheckType;

    async fn analyze(
        &self,
        handle: &ModelHandle,
        image: &ImageData,
        options: &CheckOptions,
    ) -> std::result::Result<AnalyzerResult, AnalyzerError>;
}

/// Call the backend and hand back its raw output with the start instant.
pub(crate) async fn invoke(
    check: CheckType,
    handle: &ModelHandle,
    image: &ImageData,
    options: &CheckOptions,
) -> std::result::Result<(serde_json::Value, Instant), AnalyzerError> {
    let started = Instant::now();
    let raw = handle
        .backend()
        .infer(check, image, options)
        .await
        .map_err(|e| AnalyzerError::from_backend(check, e))?;
    Ok((raw, started))
}

/// Reject probabilities outside [0, 1] and non-finite values.
pub(crate) fn unit_interval(
    check: CheckType,
    field: &str,
    value: f64,
) -> std::result::Result<f64, AnalyzerError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(AnalyzerError::malformed(
            check,
            format!("{} must be within [0, 1], got {}", field, value),
        ))
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

/// The analyzer for every check, keyed in canonical order
pub type AnalyzerSet = BTreeMap<CheckType, Arc<dyn Analyzer>>;

/// Build all four analyzers from review settings.
pub fn analyzers_from_config(review: &ReviewConfig) -> Result<AnalyzerSet> {
    let pattern = RegistrationPattern::new(&review.registration_pattern)?;

    let mut set: AnalyzerSet = BTreeMap::new();
    set.insert(
        CheckType::Quality,
        Arc::new(QualityAnalyzer::new(review.quality_threshold, review.quality_weights)),
    );
    for check in [CheckType::Aircraft, CheckType::Airline] {
        set.insert(
            check,
            Arc::new(ClassifierAnalyzer::new(
                check,
                review.classifier_confidence_threshold,
                review.default_top_k,
            )),
        );
    }
    set.insert(
        CheckType::Registration,
        Arc::new(RegistrationAnalyzer::new(
            review.registration_clarity_threshold,
            pattern,
        )),
    );
    Ok(set)
}
