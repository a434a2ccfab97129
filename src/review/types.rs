//! Review request and result types

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::analyzer::{AnalyzerError, AnalyzerResult};
use crate::error::{AppError, Result};

/// The four review checks.
///
/// Declaration order is the canonical order used for results and fail reasons.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Quality,
    Aircraft,
    Airline,
    Registration,
}

impl CheckType {
    pub const ALL: [CheckType; 4] = [
        CheckType::Quality,
        CheckType::Aircraft,
        CheckType::Airline,
        CheckType::Registration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::Quality => "quality",
            CheckType::Aircraft => "aircraft",
            CheckType::Airline => "airline",
            CheckType::Registration => "registration",
        }
    }

    /// Whether more than one backend variant can serve this check
    pub fn has_multiple_backends(&self) -> bool {
        matches!(self, CheckType::Registration)
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(CheckType::Quality),
            "aircraft" => Ok(CheckType::Aircraft),
            "airline" => Ok(CheckType::Airline),
            "registration" => Ok(CheckType::Registration),
            _ => Err(AppError::UnknownReviewType(s.to_string())),
        }
    }
}

/// Where the image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    /// Raw base64 or a `data:` URL
    Base64(String),
}

impl ImageSource {
    /// Build a source from the two mutually exclusive wire fields.
    pub fn from_fields(url: Option<String>, base64: Option<String>) -> Result<Self> {
        let url = url.filter(|u| !u.trim().is_empty());
        let base64 = base64.filter(|b| !b.trim().is_empty());
        match (url, base64) {
            (Some(url), None) => Ok(ImageSource::Url(url)),
            (None, Some(data)) => Ok(ImageSource::Base64(data)),
            (Some(_), Some(_)) => Err(AppError::invalid_input(
                "Provide either image_url or image_base64, not both",
            )),
            (None, None) => Err(AppError::invalid_input(
                "One of image_url or image_base64 is required",
            )),
        }
    }
}

/// Per-check options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOptions {
    /// Number of ranked predictions returned by classifier checks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

/// A single-image review request
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub image: ImageSource,
    pub checks: BTreeSet<CheckType>,
    pub callback_url: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub options: HashMap<CheckType, CheckOptions>,
}

impl ReviewRequest {
    pub fn new(image: ImageSource, checks: impl IntoIterator<Item = CheckType>) -> Self {
        Self {
            image,
            checks: checks.into_iter().collect(),
            callback_url: None,
            metadata: None,
            options: HashMap::new(),
        }
    }

    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        self.callback_url = Some(url.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_options(mut self, check: CheckType, options: CheckOptions) -> Self {
        self.options.insert(check, options);
        self
    }

    pub fn options_for(&self, check: CheckType) -> CheckOptions {
        self.options.get(&check).cloned().unwrap_or_default()
    }

    /// Reject requests that cannot be dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.checks.is_empty() {
            return Err(AppError::invalid_input("At least one review type is required"));
        }

        for (check, options) in &self.options {
            if options.top_k == Some(0) {
                return Err(AppError::invalid_input(format!(
                    "top_k for {} must be at least 1",
                    check
                )));
            }
        }

        if let Some(url) = &self.callback_url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| AppError::invalid_input(format!("Invalid callback_url: {}", e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::invalid_input(
                    "callback_url must use http or https",
                ));
            }
        }

        Ok(())
    }
}

/// What happened to one check of a review
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    Completed(AnalyzerResult),
    Failed(AnalyzerError),
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        match self {
            CheckOutcome::Completed(result) => result.passed,
            CheckOutcome::Failed(_) => false,
        }
    }

    pub fn as_result(&self) -> Option<&AnalyzerResult> {
        match self {
            CheckOutcome::Completed(result) => Some(result),
            CheckOutcome::Failed(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&AnalyzerError> {
        match self {
            CheckOutcome::Failed(err) => Some(err),
            CheckOutcome::Completed(_) => None,
        }
    }
}

impl Serialize for CheckOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CheckOutcome::Completed(result) => result.serialize(serializer),
            CheckOutcome::Failed(err) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("check", &err.check)?;
                map.serialize_entry("passed", &false)?;
                map.serialize_entry("error", err)?;
                map.end()
            }
        }
    }
}

/// The aggregated outcome of one review
#[derive(Debug, Clone, Serialize)]
pub struct ReviewResult {
    pub review_id: Uuid,
    pub overall_pass: bool,
    pub results: BTreeMap<CheckType, CheckOutcome>,
    pub fail_reasons: Vec<String>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub timestamp: DateTime<Utc>,
}

impl ReviewResult {
    /// Fold per-check outcomes into a review result.
    ///
    /// The review passes only if every outcome passed; an empty set passes vacuously.
    pub fn aggregate(
        review_id: Uuid,
        results: BTreeMap<CheckType, CheckOutcome>,
        elapsed: Duration,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        let fail_reasons: Vec<String> = results
            .iter()
            .filter(|(_, outcome)| !outcome.passed())
            .map(|(check, _)| check.to_string())
            .collect();

        Self {
            review_id,
            overall_pass: fail_reasons.is_empty(),
            results,
            fail_reasons,
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
            metadata,
            timestamp: Utc::now(),
        }
    }

    /// Replace backend-provided error messages with generic ones.
    pub fn redact_errors(&mut self) {
        for outcome in self.results.values_mut() {
            if let CheckOutcome::Failed(err) = outcome {
                err.redact();
            }
        }
    }
}

/// One entry of a batch report, in input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ReviewResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a batch review
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchItemResult>,
    pub processing_time_ms: f64,
}

impl BatchReport {
    pub fn new(batch_id: Uuid, results: Vec<BatchItemResult>, elapsed: Duration) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        Self {
            batch_id,
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
            processing_time_ms: elapsed.as_secs_f64() * 1000.0,
        }
    }
}
