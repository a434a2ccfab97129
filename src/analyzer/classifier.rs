//! Aircraft type and airline classification

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyzer::{
    elapsed_ms, invoke, unit_interval, Analyzer, AnalyzerError, AnalyzerResult, CheckDetails,
};
use crate::gateway::inference_gateway::ModelHandle;
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class_id: u32,
    #[serde(default, alias = "label", alias = "name")]
    pub class_name: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationDetails {
    pub top1: Prediction,
    pub top_k: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(alias = "top_k", alias = "results")]
    predictions: Vec<Prediction>,
}

/// Order by confidence descending, then class id ascending, and keep `k`.
pub fn rank_predictions(mut predictions: Vec<Prediction>, k: usize) -> Vec<Prediction> {
    predictions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.class_id.cmp(&b.class_id))
    });
    predictions.truncate(k);
    predictions
}

/// Shared adapter for the aircraft and airline classifiers
pub struct ClassifierAnalyzer {
    check: CheckType,
    threshold: f64,
    default_top_k: usize,
}

impl ClassifierAnalyzer {
    pub fn new(check: CheckType, threshold: f64, default_top_k: usize) -> Self {
        Self {
            check,
            threshold,
            default_top_k,
        }
    }

    pub fn interpret(
        &self,
        raw: serde_json::Value,
        top_k: usize,
    ) -> Result<(bool, f64, ClassificationDetails, Option<String>), AnalyzerError> {
        let parsed: RawClassification = serde_json::from_value(raw)
            .map_err(|e| AnalyzerError::malformed(self.check, e.to_string()))?;

        if parsed.predictions.is_empty() {
            return Err(AnalyzerError::malformed(self.check, "classifier returned no predictions"));
        }
        for prediction in &parsed.predictions {
            unit_interval(self.check, "confidence", prediction.confidence)?;
        }

        // top-1 is always reported, whatever k the caller asked for
        let ranked = rank_predictions(parsed.predictions, top_k.max(1));
        let top1 = ranked
            .first()
            .cloned()
            .ok_or_else(|| AnalyzerError::malformed(self.check, "classifier returned no predictions"))?;

        let passed = top1.confidence >= self.threshold;
        let reason = (!passed).then(|| {
            format!(
                "{} top-1 confidence {:.2} below threshold {:.2}",
                self.check, top1.confidence, self.threshold
            )
        });

        Ok((
            passed,
            top1.confidence,
            ClassificationDetails {
                top1,
                top_k: ranked,
            },
            reason,
        ))
    }
}

#[async_trait]
impl Analyzer for ClassifierAnalyzer {
    fn check(&self) -> CheckType {
        self.check
    }

    async fn analyze(
        &self,
        handle: &ModelHandle,
        image: &ImageData,
        options: &CheckOptions,
    ) -> Result<AnalyzerResult, AnalyzerError> {
        let top_k = options.top_k.unwrap_or(self.default_top_k).max(1);
        let request_options = CheckOptions { top_k: Some(top_k) };

        let (raw, started) = invoke(self.check, handle, image, &request_options).await?;
        let (passed, score, details, reason) = self.interpret(raw, top_k)?;

        Ok(AnalyzerResult {
            check: self.check,
            passed,
            score,
            details: CheckDetails::Classification(details),
            reason,
            elapsed_ms: elapsed_ms(started),
        })
    }
}
