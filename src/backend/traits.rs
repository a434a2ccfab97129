//! Common traits and types for inference backends

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::review::image::ImageData;
use crate::review::types::{CheckOptions, CheckType};

/// Which engine serves a check
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendVariant {
    /// Hosted vision-language service, requires a credential
    Remote,
    /// In-process or sidecar engine on the configured device
    Local,
    /// Separately deployed inference service
    External,
}

impl BackendVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendVariant::Remote => "remote",
            BackendVariant::Local => "local",
            BackendVariant::External => "external",
        }
    }
}

impl fmt::Display for BackendVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a model handle: one per (check, variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ModelKey {
    pub check: CheckType,
    pub variant: BackendVariant,
}

impl ModelKey {
    pub fn new(check: CheckType, variant: BackendVariant) -> Self {
        Self { check, variant }
    }

    pub fn local(check: CheckType) -> Self {
        Self::new(check, BackendVariant::Local)
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.check, self.variant)
    }
}

/// Trait for inference backends.
///
/// `infer` returns the backend's raw JSON output; interpreting it is the
/// job of the check's analyzer.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Get the backend name
    fn name(&self) -> &str;

    fn variant(&self) -> BackendVariant;

    /// Get the list of endpoints
    fn endpoints(&self) -> Vec<String>;

    /// Run one inference call for a check
    async fn infer(
        &self,
        check: CheckType,
        image: &ImageData,
        options: &CheckOptions,
    ) -> Result<serde_json::Value>;

    /// Check if the backend is healthy
    async fn health_check(&self) -> bool;
}

/// Backend endpoint with health status
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    pub url: String,
    pub healthy: bool,
    pub last_check: Option<std::time::Instant>,
    pub consecutive_failures: u32,
}

impl BackendEndpoint {
    /// Failures in a row before the endpoint is skipped
    pub const FAILURE_THRESHOLD: u32 = 3;

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            healthy: true,
            last_check: None,
            consecutive_failures: 0,
        }
    }

    pub fn mark_healthy(&mut self) {
        self.healthy = true;
        self.last_check = Some(std::time::Instant::now());
        self.consecutive_failures = 0;
    }

    pub fn mark_unhealthy(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= Self::FAILURE_THRESHOLD {
            self.healthy = false;
        }
        self.last_check = Some(std::time::Instant::now());
    }
}
