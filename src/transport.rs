//! Backend Transport
//!
//! One capability interface with two implementations selected by configuration: a
//! structured local inference endpoint and a conversational chat session reached through
//! an external collaborator. Every transport is single-flight: a second request against
//! the same instance waits until the first one, including any stream it returned, is done.

use crate::config::BackendConfig;
use crate::error::{TranslateError, TransportError};
use crate::prompt::{Protocol, TranslationRequest};
use crate::types::{RawResponse, StreamChunk};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

pub mod conversational;
pub mod sse;
pub mod structured;

pub use conversational::{ChatSession, ConversationalTransport, SubmissionHandle};
pub use structured::StructuredTransport;

/// Item of a streaming response: ordered chunks, then exactly one `Complete`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk(StreamChunk),
    Complete(RawResponse),
}

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Request protocol the prompt assembler must target.
    fn protocol(&self) -> Protocol;

    /// Declared request budget in characters. `None` when over-length is only detectable
    /// from the backend's reply.
    fn char_budget(&self) -> Option<usize>;

    /// Waits until the backend can accept requests.
    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<(), TransportError>;

    async fn send(&self, request: TranslationRequest) -> Result<RawResponse, TransportError>;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn send_streaming(
        &self,
        request: TranslationRequest,
    ) -> Result<ResponseStream, TransportError> {
        let response = self.send(request).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(StreamEvent::Complete(response))
        })))
    }
}

/// Single-flight gate shared by a transport's requests.
#[derive(Debug, Clone, Default)]
pub struct FlightGate {
    lock: Arc<Mutex<()>>,
}

impl FlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the in-flight request, if any, to finish. Hold the guard for the request's lifetime.
    pub async fn enter(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Rejects a request whose serialized length exceeds `budget` before it is dispatched.
pub(crate) fn check_budget(
    request: &TranslationRequest,
    budget: Option<usize>,
) -> Result<(), TransportError> {
    match budget {
        Some(budget_chars) if request.serialized_len() > budget_chars => {
            Err(TransportError::TooLong {
                prompt_chars: request.serialized_len(),
                budget_chars: Some(budget_chars),
            })
        }
        _ => Ok(()),
    }
}

/// Builds the transport selected by `config`.
pub fn from_config(
    config: &BackendConfig,
    session: Option<Arc<dyn ChatSession>>,
) -> Result<Arc<dyn Transport>, TranslateError> {
    match config {
        BackendConfig::Structured(structured) => {
            Ok(Arc::new(StructuredTransport::new(structured.clone())?))
        }
        BackendConfig::Conversational(conversational) => {
            let session = session.ok_or_else(|| {
                TranslateError::Config(
                    "conversational backend selected but no chat session was provided".to_string(),
                )
            })?;
            Ok(Arc::new(ConversationalTransport::new(
                session,
                conversational.clone(),
            )))
        }
    }
}
