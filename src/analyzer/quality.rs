//! Photo quality scoring

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::analyzer::{
    elapsed_ms, invoke, unit_interval, Analyzer, AnalyzerError, AnalyzerResult, CheckDetails,
};
use crate::config::QualityWeights;
use crate::gateway::inference_gateway::ModelHandle;
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

/// The five quality sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityDetails {
    pub sharpness: f64,
    pub exposure: f64,
    pub composition: f64,
    pub noise: f64,
    pub color: f64,
}

impl QualityDetails {
    fn validated(self) -> Result<Self, AnalyzerError> {
        let check = CheckType::Quality;
        unit_interval(check, "sharpness", self.sharpness)?;
        unit_interval(check, "exposure", self.exposure)?;
        unit_interval(check, "composition", self.composition)?;
        unit_interval(check, "noise", self.noise)?;
        unit_interval(check, "color", self.color)?;
        Ok(self)
    }

    /// Weighted mean of the sub-scores
    pub fn combine(&self, weights: &QualityWeights) -> f64 {
        let weighted = self.sharpness * weights.sharpness
            + self.exposure * weights.exposure
            + self.composition * weights.composition
            + self.noise * weights.noise
            + self.color * weights.color;
        (weighted / weights.total()).clamp(0.0, 1.0)
    }
}

pub struct QualityAnalyzer {
    threshold: f64,
    weights: QualityWeights,
}

impl QualityAnalyzer {
    pub fn new(threshold: f64, weights: QualityWeights) -> Self {
        Self { threshold, weights }
    }

    /// Accepts the sub-scores either at the top level or under `details`.
    pub fn interpret(&self, raw: serde_json::Value) -> Result<(bool, f64, QualityDetails, Option<String>), AnalyzerError> {
        let body = match raw.get("details") {
            Some(details) if details.is_object() => details.clone(),
            _ => raw,
        };

        let details: QualityDetails = serde_json::from_value::<QualityDetails>(body)
            .map_err(|e| AnalyzerError::malformed(CheckType::Quality, e.to_string()))?
            .validated()?;

        let score = details.combine(&self.weights);
        let passed = score >= self.threshold;
        let reason = (!passed).then(|| {
            format!(
                "quality score {:.2} below threshold {:.2}",
                score, self.threshold
            )
        });

        Ok((passed, score, details, reason))
    }
}

#[async_trait]
impl Analyzer for QualityAnalyzer {
    fn check(&self) -> CheckType {
        CheckType::Quality
    }

    async fn analyze(
        &self,
        handle: &ModelHandle,
        image: &ImageData,
        options: &CheckOptions,
    ) -> Result<AnalyzerResult, AnalyzerError> {
        let (raw, started) = invoke(CheckType::Quality, handle, image, options).await?;
        let (passed, score, details, reason) = self.interpret(raw)?;

        Ok(AnalyzerResult {
            check: CheckType::Quality,
            passed,
            score,
            details: CheckDetails::Quality(details),
            reason,
            elapsed_ms: elapsed_ms(started),
        })
    }
}
