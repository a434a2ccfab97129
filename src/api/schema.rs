//! Wire types for the HTTP API

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::Result;
use crate::review::types::{
    BatchReport, CheckOptions, CheckType, ImageSource, ReviewRequest, ReviewResult,
};

/// Body of `POST /v1/review` and of the single-check endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewPayload {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    /// Absent means every check; ignored by single-check endpoints
    #[serde(default)]
    pub review_types: Option<Vec<String>>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Per-check options keyed by review type
    #[serde(default)]
    pub options: HashMap<String, CheckOptions>,
    /// Shorthand for classifier `top_k` on single-check endpoints
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// One image of a batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchImage {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Body of the batch endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchPayload {
    pub images: Vec<BatchImage>,
    #[serde(default)]
    pub review_types: Option<Vec<String>>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, CheckOptions>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Parse review type names; `None` selects every check.
pub fn parse_review_types(names: Option<&[String]>) -> Result<BTreeSet<CheckType>> {
    match names {
        None => Ok(CheckType::ALL.into_iter().collect()),
        Some(names) => names.iter().map(|n| n.parse()).collect(),
    }
}

fn parse_options(options: &HashMap<String, CheckOptions>) -> Result<HashMap<CheckType, CheckOptions>> {
    options
        .iter()
        .map(|(name, opts)| Ok((name.parse::<CheckType>()?, opts.clone())))
        .collect()
}

/// The check set, and options, a request resolves to
fn scope(
    review_types: Option<&[String]>,
    options: &HashMap<String, CheckOptions>,
    top_k: Option<usize>,
    only: Option<CheckType>,
) -> Result<(BTreeSet<CheckType>, HashMap<CheckType, CheckOptions>)> {
    let mut options = parse_options(options)?;
    let checks = match only {
        Some(check) => {
            if let Some(top_k) = top_k {
                options.entry(check).or_default().top_k = Some(top_k);
            }
            BTreeSet::from([check])
        }
        None => parse_review_types(review_types)?,
    };
    Ok((checks, options))
}

impl ReviewPayload {
    /// Build the review request; `only` pins the check set for single-check endpoints.
    pub fn into_request(self, only: Option<CheckType>) -> Result<ReviewRequest> {
        let (checks, options) = scope(
            self.review_types.as_deref(),
            &self.options,
            self.top_k,
            only,
        )?;
        let image = ImageSource::from_fields(self.image_url, self.image_base64)?;

        Ok(ReviewRequest {
            image,
            checks,
            callback_url: self.callback_url,
            metadata: self.metadata,
            options,
        })
    }
}

impl BatchPayload {
    /// Split into per-item requests. Item errors stay with their item.
    pub fn into_items(
        self,
        only: Option<CheckType>,
    ) -> Result<(Vec<Result<ReviewRequest>>, Option<String>)> {
        let (checks, options) = scope(
            self.review_types.as_deref(),
            &self.options,
            self.top_k,
            only,
        )?;

        let items = self
            .images
            .into_iter()
            .map(|image| {
                let source = ImageSource::from_fields(image.image_url, image.image_base64)?;
                Ok(ReviewRequest {
                    image: source,
                    checks: checks.clone(),
                    callback_url: None,
                    metadata: image.metadata,
                    options: options.clone(),
                })
            })
            .collect();

        Ok((items, self.callback_url))
    }
}

/// Successful review response
#[derive(Debug, Serialize)]
pub struct ReviewResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: ReviewResult,
}

impl From<ReviewResult> for ReviewResponse {
    fn from(result: ReviewResult) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// Successful batch response
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: BatchReport,
}

impl From<BatchReport> for BatchResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            success: true,
            report,
        }
    }
}

/// Service banner served at `/`
#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub review_types: Vec<CheckType>,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            review_types: CheckType::ALL.to_vec(),
        }
    }
}
