//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::gateway::backend_selector::OcrMode;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub review: ReviewConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body; base64 images count at 4/3 their size
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `text`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// API key authentication
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_keys: Vec<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rps")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst_size: u32,
}

fn default_rps() -> u32 {
    100
}

fn default_burst() -> u32 {
    200
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            requests_per_second: default_rps(),
            burst_size: default_burst(),
        }
    }
}

/// Local inference engine and model lifecycle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferenceConfig {
    /// Device the local engine runs on (`cuda`, `cuda:0`, `cpu`)
    #[serde(default = "default_device")]
    pub device: String,
    /// Load every model at startup instead of on first demand
    #[serde(default = "default_true")]
    pub preload: bool,
    #[serde(default = "default_local_endpoints")]
    pub local_endpoints: Vec<String>,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
    /// Check the backend's health endpoint when a handle is created
    #[serde(default = "default_true")]
    pub verify_on_load: bool,
}

fn default_true() -> bool {
    true
}

fn default_device() -> String {
    "cuda".to_string()
}

fn default_local_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:9000".to_string()]
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_backend_timeout() -> u64 {
    30_000
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            preload: true,
            local_endpoints: default_local_endpoints(),
            health_check_path: default_health_check_path(),
            health_check_interval_secs: default_health_check_interval(),
            timeout_ms: default_backend_timeout(),
            verify_on_load: true,
        }
    }
}

/// Registration OCR backend selection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrConfig {
    #[serde(default)]
    pub mode: OcrMode,
    /// Environment variable holding the remote vision-service credential
    #[serde(default = "default_credential_env")]
    pub credential_env: String,
    /// Credential supplied through configuration; takes precedence over `credential_env`
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_remote_endpoints")]
    pub remote_endpoints: Vec<String>,
    #[serde(default = "default_remote_model")]
    pub remote_model: String,
    #[serde(default)]
    pub external_endpoint: Option<String>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_ms: u64,
}

fn default_credential_env() -> String {
    "DASHSCOPE_API_KEY".to_string()
}

fn default_remote_endpoints() -> Vec<String> {
    vec!["https://dashscope.aliyuncs.com/compatible-mode".to_string()]
}

fn default_remote_model() -> String {
    "qwen3-vl-flash".to_string()
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: OcrMode::default(),
            credential_env: default_credential_env(),
            api_key: None,
            remote_endpoints: default_remote_endpoints(),
            remote_model: default_remote_model(),
            external_endpoint: None,
            timeout_ms: default_backend_timeout(),
        }
    }
}

/// Weights used to fold the five quality sub-scores into one score
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct QualityWeights {
    pub sharpness: f64,
    pub exposure: f64,
    pub composition: f64,
    pub noise: f64,
    pub color: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            sharpness: 0.30,
            exposure: 0.20,
            composition: 0.15,
            noise: 0.20,
            color: 0.15,
        }
    }
}

impl QualityWeights {
    fn values(&self) -> [f64; 5] {
        [
            self.sharpness,
            self.exposure,
            self.composition,
            self.noise,
            self.color,
        ]
    }

    pub fn total(&self) -> f64 {
        self.values().iter().sum()
    }
}

/// Pass thresholds, limits and timeouts for reviews
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_classifier_threshold")]
    pub classifier_confidence_threshold: f64,
    #[serde(default = "default_clarity_threshold")]
    pub registration_clarity_threshold: f64,
    #[serde(default)]
    pub quality_weights: QualityWeights,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_atomic_batch")]
    pub max_atomic_batch_size: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_checks: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_fetch_timeout")]
    pub image_fetch_timeout_ms: u64,
    #[serde(default = "default_registration_pattern")]
    pub registration_pattern: String,
    #[serde(default = "default_callback_timeout")]
    pub callback_timeout_ms: u64,
}

fn default_quality_threshold() -> f64 {
    0.70
}

fn default_classifier_threshold() -> f64 {
    0.50
}

fn default_clarity_threshold() -> f64 {
    0.80
}

fn default_top_k() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    60_000
}

fn default_max_batch() -> usize {
    10
}

fn default_max_atomic_batch() -> usize {
    50
}

fn default_max_concurrent() -> usize {
    16
}

fn default_max_image_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_fetch_timeout() -> u64 {
    30_000
}

/// Nationality prefix, hyphen, then the mark (B-1234, G-EUPT, 9V-SKA, VH-OQA),
/// or the unhyphenated forms used by the US, Japan and Korea (N12345, JA8089, HL7611).
pub const DEFAULT_REGISTRATION_PATTERN: &str =
    r"^(?:(?:[A-Z]{1,2}|[0-9][A-Z]|[A-Z][0-9])-[A-Z0-9]{1,5}|N[1-9][0-9]{0,4}[A-Z]{0,2}|(?:JA|HL)[0-9A-Z]{4})$";

fn default_registration_pattern() -> String {
    DEFAULT_REGISTRATION_PATTERN.to_string()
}

fn default_callback_timeout() -> u64 {
    10_000
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            classifier_confidence_threshold: default_classifier_threshold(),
            registration_clarity_threshold: default_clarity_threshold(),
            quality_weights: QualityWeights::default(),
            default_top_k: default_top_k(),
            request_timeout_ms: default_request_timeout(),
            max_batch_size: default_max_batch(),
            max_atomic_batch_size: default_max_atomic_batch(),
            max_concurrent_checks: default_max_concurrent(),
            max_image_bytes: default_max_image_bytes(),
            image_fetch_timeout_ms: default_fetch_timeout(),
            registration_pattern: default_registration_pattern(),
            callback_timeout_ms: default_callback_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let path = std::env::var("AEROVISION_CONFIG")
            .unwrap_or_else(|_| "config/default.toml".to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            AppError::Config(config::ConfigError::Message(
                "Configuration path is not valid UTF-8".to_string(),
            ))
        })?;

        let config = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("ocr.mode", "auto")?
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (AEROVISION__OCR__MODE=remote)
            .add_source(
                Environment::with_prefix("AEROVISION")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.api_keys")
                    .with_list_parse_key("inference.local_endpoints")
                    .with_list_parse_key("ocr.remote_endpoints"),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0".to_string()));
        }

        let thresholds = [
            ("review.quality_threshold", self.review.quality_threshold),
            (
                "review.classifier_confidence_threshold",
                self.review.classifier_confidence_threshold,
            ),
            (
                "review.registration_clarity_threshold",
                self.review.registration_clarity_threshold,
            ),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }

        let weights = self.review.quality_weights;
        if weights.values().iter().any(|w| !w.is_finite() || *w < 0.0) || weights.total() <= 0.0 {
            return Err(invalid(
                "review.quality_weights must be non-negative and sum to a positive value"
                    .to_string(),
            ));
        }

        let limits = [
            ("review.max_batch_size", self.review.max_batch_size),
            ("review.max_atomic_batch_size", self.review.max_atomic_batch_size),
            ("review.max_concurrent_checks", self.review.max_concurrent_checks),
            ("review.default_top_k", self.review.default_top_k),
            ("review.max_image_bytes", self.review.max_image_bytes),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(invalid(format!("{} cannot be 0", name)));
            }
        }

        if self.review.request_timeout_ms == 0 {
            return Err(invalid("review.request_timeout_ms cannot be 0".to_string()));
        }

        if let Err(e) = regex::Regex::new(&self.review.registration_pattern) {
            return Err(invalid(format!("review.registration_pattern is invalid: {}", e)));
        }

        if self.inference.local_endpoints.is_empty() {
            return Err(invalid(
                "inference.local_endpoints must have at least one endpoint".to_string(),
            ));
        }

        if !["json", "text"].contains(&self.logging.format.as_str()) {
            return Err(invalid(format!(
                "logging.format '{}' is invalid. Must be 'json' or 'text'",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn invalid(message: String) -> AppError {
    AppError::Config(config::ConfigError::Message(message))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            debug: false,
            logging: LoggingConfig::default(),
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            inference: InferenceConfig::default(),
            ocr: OcrConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}
