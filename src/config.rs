//! Configuration System
//!
//! Immutable job settings: batch limits, retry policy, backend selection, prompt options,
//! cache and logging. A `TranslatorConfig` value is resolved once (defaults, global file,
//! explicit file, `HONYAKU__*` environment) and passed into each job; nothing reads ambient
//! settings while a job runs.

use crate::cache::CacheConfig;
use crate::logging::LoggingConfig;
use crate::prompt::PromptOptions;
use serde::{Deserialize, Serialize};

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    #[serde(default)]
    pub batch: BatchLimits,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub prompt: PromptOptions,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upper bound for one transport call, streaming included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            batch: BatchLimits::default(),
            retry: RetryPolicy::default(),
            backend: BackendConfig::default(),
            prompt: PromptOptions::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Batch Planner budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Sum of fragment characters per batch.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Floor for re-split halving.
    #[serde(default = "default_min_split_chars")]
    pub min_split_chars: usize,
}

fn default_max_items() -> usize {
    50
}

fn default_max_chars() -> usize {
    1000
}

fn default_min_split_chars() -> usize {
    300
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_chars: default_max_chars(),
            min_split_chars: default_min_split_chars(),
        }
    }
}

/// Retry Controller policy. The defaults give waits of 2s, 4s and 8s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Dispatches per fragment, first attempt included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Wait before the `retry`th re-dispatch (1-based): initial, initial*m, initial*m^2, ... capped.
    pub fn backoff(&self, retry: u32) -> std::time::Duration {
        if retry == 0 {
            return std::time::Duration::ZERO;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(retry as i32 - 1);
        let millis = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        std::time::Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// Backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Structured(StructuredConfig),
    Conversational(ConversationalConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Structured(StructuredConfig::default())
    }
}

/// Local OpenAI-compatible inference server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub sampling: SamplingOptions,

    /// Server context window in tokens (prompt plus completion).
    #[serde(default = "default_context_tokens")]
    pub context_tokens: u32,

    /// Conservative chars-per-token ratio used to derive the character budget.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_readiness_poll_ms")]
    pub readiness_poll_ms: u64,

    /// Request SSE streaming from the server.
    #[serde(default)]
    pub stream: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:4891".to_string()
}

fn default_model() -> String {
    "local-model".to_string()
}

fn default_context_tokens() -> u32 {
    2048
}

fn default_chars_per_token() -> f64 {
    2.0
}

fn default_startup_timeout_secs() -> u64 {
    120
}

fn default_readiness_poll_ms() -> u64 {
    500
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            sampling: SamplingOptions::default(),
            context_tokens: default_context_tokens(),
            chars_per_token: default_chars_per_token(),
            startup_timeout_secs: default_startup_timeout_secs(),
            readiness_poll_ms: default_readiness_poll_ms(),
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32, // 0.0-2.0
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_top_k() -> u32 {
    64
}

fn default_repeat_penalty() -> f32 {
    1.05
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            repeat_penalty: default_repeat_penalty(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Remote chat backend reached through a session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationalConfig {
    /// Prefix list items with `[[ID:n]]` markers.
    #[serde(default = "default_true")]
    pub use_id_markers: bool,

    #[serde(default = "default_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_response_timeout_secs() -> u64 {
    600
}

impl Default for ConversationalConfig {
    fn default() -> Self {
        Self {
            use_id_markers: true,
            response_timeout_secs: default_response_timeout_secs(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Batch(String),
    Retry(String),
    Backend(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Batch(msg) => write!(f, "Batch: {}", msg),
            ValidationError::Retry(msg) => write!(f, "Retry: {}", msg),
            ValidationError::Backend(msg) => write!(f, "Backend: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl BatchLimits {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_items < 1 {
            return Err("max_items must be at least 1".to_string());
        }
        if self.max_chars < 100 {
            return Err(format!("max_chars must be at least 100 (got {})", self.max_chars));
        }
        if self.min_split_chars < 1 || self.min_split_chars > self.max_chars {
            return Err(format!(
                "min_split_chars must be between 1 and max_chars ({}), got {}",
                self.max_chars, self.min_split_chars
            ));
        }
        Ok(())
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts < 1 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(format!(
                "backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err("max_backoff_ms must not be below initial_backoff_ms".to_string());
        }
        Ok(())
    }
}

impl StructuredConfig {
    pub fn validate(&self) -> Result<(), String> {
        reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("Invalid base_url '{}': {}", self.base_url, e))?;
        if self.model.trim().is_empty() {
            return Err("model cannot be empty".to_string());
        }
        let sampling = &self.sampling;
        if !(0.0..=2.0).contains(&sampling.temperature) {
            return Err(format!(
                "temperature must be within [0, 2] (got {})",
                sampling.temperature
            ));
        }
        if !(sampling.top_p > 0.0 && sampling.top_p <= 1.0) {
            return Err(format!("top_p must be within (0, 1] (got {})", sampling.top_p));
        }
        if self.context_tokens <= sampling.max_tokens {
            return Err(format!(
                "context_tokens ({}) must exceed max_tokens ({})",
                self.context_tokens, sampling.max_tokens
            ));
        }
        if !(self.chars_per_token > 0.0) {
            return Err("chars_per_token must be positive".to_string());
        }
        Ok(())
    }
}

impl TranslatorConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.batch.validate() {
            errors.push(ValidationError::Batch(e));
        }
        if let Err(e) = self.retry.validate() {
            errors.push(ValidationError::Retry(e));
        }
        match &self.backend {
            BackendConfig::Structured(structured) => {
                if let Err(e) = structured.validate() {
                    errors.push(ValidationError::Backend(e));
                }
            }
            BackendConfig::Conversational(conversational) => {
                if conversational.response_timeout_secs == 0 {
                    errors.push(ValidationError::Backend(
                        "response_timeout_secs must be positive".to_string(),
                    ));
                }
            }
        }
        if self.request_timeout_secs == 0 {
            errors.push(ValidationError::Backend(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
