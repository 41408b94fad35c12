//! Error types for the translation orchestration engine.

use crate::types::ResolutionMap;
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a backend transport for a single request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The serialized request does not fit the backend's context window.
    /// `budget_chars` is `None` when the backend declares no budget and asked for a split.
    #[error("Prompt too long: {prompt_chars} chars")]
    TooLong {
        prompt_chars: usize,
        budget_chars: Option<usize>,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    /// The backend session itself is down; nothing can succeed until it is restored.
    #[error("Backend session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Backend did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_too_long(&self) -> bool {
        matches!(self, TransportError::TooLong { .. })
    }

    pub fn is_session_unavailable(&self) -> bool {
        matches!(
            self,
            TransportError::SessionUnavailable(_) | TransportError::StartupTimeout(_)
        )
    }

    /// Whether another attempt at the same batch size can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::TooLong { .. } => false,
            TransportError::SessionUnavailable(_) => false,
            TransportError::StartupTimeout(_) => false,
            TransportError::Cancelled => false,
            TransportError::Timeout(_) => true,
            TransportError::Request(_) => true,
            TransportError::Http { .. } => true,
            TransportError::InvalidResponse(_) => true,
        }
    }
}

/// Failure of every strategy in the response parse ladder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Response was empty")]
    Empty,

    #[error("Response JSON ended before it was closed; raise max_tokens or context_tokens")]
    TruncatedJson,

    #[error("No parse strategy recognized the response")]
    Unrecognized,
}

/// Job-level errors returned from `Translator::translate`.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Backend session unavailable: {message}")]
    SessionUnavailable {
        message: String,
        /// Resolutions accumulated before the session went away.
        partial: Box<ResolutionMap>,
    },

    #[error("Backend did not become ready within {timeout:?}")]
    StartupTimeout {
        timeout: Duration,
        partial: Box<ResolutionMap>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl TranslateError {
    /// Partial results carried by errors raised after dispatch began.
    pub fn partial(&self) -> Option<&ResolutionMap> {
        match self {
            TranslateError::SessionUnavailable { partial, .. } => Some(&**partial),
            TranslateError::StartupTimeout { partial, .. } => Some(&**partial),
            _ => None,
        }
    }
}

impl From<config::ConfigError> for TranslateError {
    fn from(err: config::ConfigError) -> Self {
        TranslateError::Config(err.to_string())
    }
}
