//! Registration number OCR interpretation

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analyzer::{
    elapsed_ms, invoke, unit_interval, Analyzer, AnalyzerError, AnalyzerResult, CheckDetails,
};
use crate::error::{AppError, Result};
use crate::gateway::inference_gateway::ModelHandle;
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

/// Compiled registration format
#[derive(Debug, Clone)]
pub struct RegistrationPattern(Regex);

impl RegistrationPattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| AppError::internal(format!("invalid registration pattern: {}", e)))
    }

    /// Uppercase and drop whitespace; OCR often splits the mark.
    pub fn normalize(text: &str) -> String {
        text.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_uppercase)
            .collect()
    }

    pub fn matches(&self, normalized: &str) -> bool {
        self.0.is_match(normalized)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct OcrCandidate {
    #[serde(alias = "registration", alias = "value")]
    text: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawRegistration {
    #[serde(default, alias = "text", alias = "value")]
    registration: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    clarity: Option<f64>,
    #[serde(default, alias = "detection_confidence")]
    detection_score: Option<f64>,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default, alias = "all_matches")]
    candidates: Vec<OcrCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationDetails {
    pub detected: bool,
    pub registration: Option<String>,
    pub confidence: f64,
    pub clarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    /// Raw OCR text of the best candidate when it did not match the format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

pub struct RegistrationAnalyzer {
    clarity_threshold: f64,
    pattern: RegistrationPattern,
}

impl RegistrationAnalyzer {
    pub fn new(clarity_threshold: f64, pattern: RegistrationPattern) -> Self {
        Self {
            clarity_threshold,
            pattern,
        }
    }

    pub fn interpret(
        &self,
        raw: serde_json::Value,
    ) -> std::result::Result<(bool, f64, RegistrationDetails, Option<String>), AnalyzerError> {
        let check = CheckType::Registration;
        let parsed: RawRegistration = serde_json::from_value(raw)
            .map_err(|e| AnalyzerError::malformed(check, e.to_string()))?;

        let bbox = match parsed.bbox {
            None => None,
            Some(coords) => match <[f64; 4]>::try_from(coords) {
                Ok(b) if b.iter().all(|v| v.is_finite()) => Some(b),
                _ => return Err(AnalyzerError::malformed(check, "bbox must hold 4 finite numbers")),
            },
        };

        // Primary reading first, then alternates by confidence
        let mut candidates: Vec<(String, f64)> = Vec::new();
        if let Some(text) = parsed.registration.filter(|t| !t.trim().is_empty()) {
            let confidence = unit_interval(check, "confidence", parsed.confidence.unwrap_or(0.0))?;
            candidates.push((text, confidence));
        }
        let mut alternates = Vec::with_capacity(parsed.candidates.len());
        for candidate in parsed.candidates {
            let confidence =
                unit_interval(check, "candidate confidence", candidate.confidence.unwrap_or(0.0))?;
            alternates.push((candidate.text, confidence));
        }
        alternates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.extend(alternates);

        let matched = candidates
            .iter()
            .map(|(text, confidence)| (RegistrationPattern::normalize(text), *confidence))
            .find(|(normalized, _)| self.pattern.matches(normalized));

        let explicit_clarity = parsed
            .clarity
            .map(|c| unit_interval(check, "clarity", c))
            .transpose()?;
        let detection = parsed
            .detection_score
            .map(|d| unit_interval(check, "detection_score", d))
            .transpose()?;

        let (detected, registration, confidence, raw_text) = match matched {
            Some((normalized, confidence)) => (true, Some(normalized), confidence, None),
            None => {
                let best = candidates.first();
                (
                    false,
                    None,
                    best.map(|(_, c)| *c).unwrap_or(0.0),
                    best.map(|(text, _)| text.clone()),
                )
            }
        };

        // Without an explicit clarity, average detection and OCR confidence
        let clarity = match (explicit_clarity, detection) {
            (Some(clarity), _) => clarity,
            (None, Some(detection)) => (detection + confidence) / 2.0,
            (None, None) => confidence,
        };

        let passed = detected && clarity >= self.clarity_threshold;
        let reason = if !detected {
            Some(match &raw_text {
                Some(text) => format!("'{}' is not a valid registration", text.trim()),
                None => "no registration detected".to_string(),
            })
        } else if !passed {
            Some(format!(
                "registration clarity {:.2} below threshold {:.2}",
                clarity, self.clarity_threshold
            ))
        } else {
            None
        };

        Ok((
            passed,
            confidence,
            RegistrationDetails {
                detected,
                registration,
                confidence,
                clarity,
                bbox,
                raw_text,
            },
            reason,
        ))
    }
}

#[async_trait]
impl Analyzer for RegistrationAnalyzer {
    fn check(&self) -> CheckType {
        CheckType::Registration
    }

    async fn analyze(
        &self,
        handle: &ModelHandle,
        image: &ImageData,
        options: &CheckOptions,
    ) -> std::result::Result<AnalyzerResult, AnalyzerError> {
        let (raw, started) = invoke(CheckType::Registration, handle, image, options).await?;
        let (passed, score, details, reason) = self.interpret(raw)?;

        Ok(AnalyzerResult {
            check: CheckType::Registration,
            passed,
            score,
            details: CheckDetails::Registration(details),
            reason,
            elapsed_ms: elapsed_ms(started),
        })
    }
}
