//! Backend variant resolution for checks with more than one engine

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::backend::traits::BackendVariant;
use crate::config::OcrConfig;
use crate::error::{AppError, ConfigurationError};
use crate::review::types::CheckType;

/// Configured registration OCR mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Remote when a credential is present, otherwise local
    #[default]
    Auto,
    Remote,
    Local,
    External,
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OcrMode::Auto => "auto",
            OcrMode::Remote => "remote",
            OcrMode::Local => "local",
            OcrMode::External => "external",
        };
        f.write_str(s)
    }
}

impl FromStr for OcrMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(OcrMode::Auto),
            "remote" => Ok(OcrMode::Remote),
            "local" => Ok(OcrMode::Local),
            "external" => Ok(OcrMode::External),
            other => Err(AppError::invalid_input(format!("Unknown OCR mode '{}'", other))),
        }
    }
}

/// Environment facts that feed resolution: credential and external endpoint.
#[derive(Clone, Default)]
pub struct EnvironmentSignal {
    credential: Option<String>,
    external_endpoint: Option<String>,
}

impl EnvironmentSignal {
    pub fn new(credential: Option<String>, external_endpoint: Option<String>) -> Self {
        Self {
            credential: credential.filter(|c| !c.trim().is_empty()),
            external_endpoint: external_endpoint.filter(|e| !e.trim().is_empty()),
        }
    }

    /// Read the signal from settings, falling back to the credential variable.
    pub fn capture(ocr: &OcrConfig) -> Self {
        let credential = ocr
            .api_key
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| std::env::var(&ocr.credential_env).ok());
        Self::new(credential, ocr.external_endpoint.clone())
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn external_endpoint(&self) -> Option<&str> {
        self.external_endpoint.as_deref()
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    pub fn has_external_endpoint(&self) -> bool {
        self.external_endpoint.is_some()
    }
}

impl fmt::Debug for EnvironmentSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentSignal")
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("external_endpoint", &self.external_endpoint)
            .finish()
    }
}

/// One environment signal shared by the selector and the model loader, so a
/// `reset` with new credentials reaches both.
#[derive(Debug, Clone, Default)]
pub struct SharedSignal(Arc<RwLock<EnvironmentSignal>>);

impl SharedSignal {
    pub fn new(signal: EnvironmentSignal) -> Self {
        Self(Arc::new(RwLock::new(signal)))
    }

    pub fn current(&self) -> EnvironmentSignal {
        self.0.read().clone()
    }

    pub fn replace(&self, signal: EnvironmentSignal) {
        *self.0.write() = signal;
    }
}

impl From<EnvironmentSignal> for SharedSignal {
    fn from(signal: EnvironmentSignal) -> Self {
        Self::new(signal)
    }
}

/// Resolved backend for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackendResolution {
    pub check: CheckType,
    pub variant: BackendVariant,
}

/// Pure resolution rule.
///
/// Checks with a single engine always run locally. For registration, the
/// mode and the environment decide; a missing prerequisite is an error and
/// never a silent fallback.
pub fn resolve(
    check: CheckType,
    mode: OcrMode,
    signal: &EnvironmentSignal,
) -> Result<BackendResolution, ConfigurationError> {
    let variant = if !check.has_multiple_backends() {
        BackendVariant::Local
    } else {
        match mode {
            OcrMode::Auto if signal.has_credential() => BackendVariant::Remote,
            OcrMode::Auto => BackendVariant::Local,
            OcrMode::Remote if signal.has_credential() => BackendVariant::Remote,
            OcrMode::Remote => {
                return Err(ConfigurationError::new(
                    check,
                    "mode 'remote' requires a vision-service credential",
                ))
            }
            OcrMode::Local => BackendVariant::Local,
            OcrMode::External if signal.has_external_endpoint() => BackendVariant::External,
            OcrMode::External => {
                return Err(ConfigurationError::new(
                    check,
                    "mode 'external' requires an external endpoint",
                ))
            }
        }
    };

    Ok(BackendResolution { check, variant })
}

/// Memoizing resolver; the first successful resolution per check sticks until `reset`.
pub struct BackendSelector {
    mode: RwLock<OcrMode>,
    signal: SharedSignal,
    resolved: DashMap<CheckType, BackendResolution>,
}

impl BackendSelector {
    pub fn new(mode: OcrMode, signal: impl Into<SharedSignal>) -> Self {
        Self {
            mode: RwLock::new(mode),
            signal: signal.into(),
            resolved: DashMap::new(),
        }
    }

    pub fn from_config(ocr: &OcrConfig) -> Self {
        Self::new(ocr.mode, EnvironmentSignal::capture(ocr))
    }

    pub fn mode(&self) -> OcrMode {
        *self.mode.read()
    }

    pub fn signal(&self) -> EnvironmentSignal {
        self.signal.current()
    }

    /// Handle to the signal this selector resolves against
    pub fn shared_signal(&self) -> SharedSignal {
        self.signal.clone()
    }

    /// Resolve the backend for a check, memoizing success.
    pub fn resolve_for(&self, check: CheckType) -> Result<BackendResolution, ConfigurationError> {
        if let Some(resolution) = self.resolved.get(&check) {
            return Ok(*resolution);
        }

        let resolution = resolve(check, self.mode(), &self.signal.current())?;

        // A racing resolver computed the same value from the same state
        let resolution = *self.resolved.entry(check).or_insert(resolution);
        if check.has_multiple_backends() {
            info!(check = %check, variant = %resolution.variant, mode = %self.mode(), "Resolved backend");
        }
        Ok(resolution)
    }

    /// Currently memoized resolution, if any
    pub fn resolved(&self, check: CheckType) -> Option<BackendResolution> {
        self.resolved.get(&check).map(|r| *r)
    }

    /// Drop memoized resolutions, optionally with a new mode and environment.
    ///
    /// A new environment is written through the shared signal, so loaders
    /// built on the same handle see it too.
    pub fn reset(&self, update: Option<(OcrMode, EnvironmentSignal)>) {
        if let Some((mode, signal)) = update {
            *self.mode.write() = mode;
            self.signal.replace(signal);
        }
        self.resolved.clear();
        info!("Backend resolutions cleared");
    }
}
