//! Conversational transport over an externally managed chat session.
//!
//! Login and page lifecycle belong to the session collaborator; this module only submits
//! prompts and awaits (or streams) replies through the narrow [`ChatSession`] interface.

use super::{FlightGate, ResponseStream, StreamEvent, Transport};
use crate::config::ConversationalConfig;
use crate::error::TransportError;
use crate::prompt::{Protocol, TranslationRequest};
use crate::types::{BatchId, RawResponse, StreamChunk};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opaque handle for a submitted prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmissionHandle(pub u64);

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Chat-session capability provided by the automation collaborator.
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn submit(&self, prompt: &str) -> Result<SubmissionHandle, TransportError>;

    /// Full reply text for `handle`.
    async fn await_reply(&self, handle: SubmissionHandle) -> Result<String, TransportError>;

    /// Whether the session is currently usable. A dead session is reported as
    /// `SessionUnavailable` before any prompt is submitted.
    async fn is_available(&self) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Reply deltas for `handle`, in arrival order.
    async fn stream_reply(&self, handle: SubmissionHandle) -> Result<ReplyStream, TransportError> {
        let reply = self.await_reply(handle).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(reply) })))
    }
}

/// Phrases the chat backend uses when it asks for the input to be sent in parts.
const SPLIT_REQUEST_PHRASES: [&str; 12] = [
    "入力テキスト量が非常に多いため",
    "メッセージ上限",
    "複数回に分割",
    "分割して送信",
    "ご希望は",
    "どちらですか",
    "too long to process",
    "message limit",
    "split the text",
    "multiple messages",
    "in smaller parts",
    "which would you prefer",
];
const SPLIT_REQUEST_MIN_MATCHES: usize = 2;

/// True when `reply` asks for the input to be split rather than translating it.
pub fn looks_like_split_request(reply: &str) -> bool {
    let sample: String = reply.chars().take(2000).collect::<String>().to_lowercase();
    let hits = SPLIT_REQUEST_PHRASES
        .iter()
        .filter(|phrase| sample.contains(*phrase))
        .count();
    hits >= SPLIT_REQUEST_MIN_MATCHES
}

pub struct ConversationalTransport {
    session: Arc<dyn ChatSession>,
    config: ConversationalConfig,
    gate: FlightGate,
}

impl ConversationalTransport {
    pub fn new(session: Arc<dyn ChatSession>, config: ConversationalConfig) -> Self {
        Self {
            session,
            config,
            gate: FlightGate::new(),
        }
    }

    fn prompt_of(request: &TranslationRequest) -> Result<(BatchId, String), TransportError> {
        match request {
            TranslationRequest::Conversational(r) => Ok((r.batch_id, r.prompt.clone())),
            TranslationRequest::Structured(_) => Err(TransportError::Request(
                "conversational transport received a structured request".to_string(),
            )),
        }
    }

    fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.config.response_timeout_secs)
    }

    async fn submit(&self, prompt: &str) -> Result<SubmissionHandle, TransportError> {
        if !self.session.is_available().await {
            return Err(TransportError::SessionUnavailable(
                "chat session is not connected".to_string(),
            ));
        }
        self.session.submit(prompt).await
    }
}

fn classify_reply(reply: String, prompt_chars: usize) -> Result<RawResponse, TransportError> {
    if looks_like_split_request(&reply) {
        warn!(prompt_chars, "Chat backend asked for the input to be split");
        return Err(TransportError::TooLong {
            prompt_chars,
            budget_chars: None,
        });
    }
    Ok(RawResponse::FreeText(reply))
}

#[async_trait]
impl Transport for ConversationalTransport {
    fn name(&self) -> &str {
        "conversational"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Conversational {
            id_markers: self.config.use_id_markers,
        }
    }

    fn char_budget(&self) -> Option<usize> {
        None
    }

    async fn ensure_ready(&self, _cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.session.is_available().await {
            Ok(())
        } else {
            Err(TransportError::SessionUnavailable(
                "chat session is not connected".to_string(),
            ))
        }
    }

    async fn send(&self, request: TranslationRequest) -> Result<RawResponse, TransportError> {
        let (batch_id, prompt) = Self::prompt_of(&request)?;
        let prompt_chars = prompt.chars().count();
        let _flight = self.gate.enter().await;
        let started = Instant::now();

        let handle = self.submit(&prompt).await?;
        let timeout = self.response_timeout();
        let reply = tokio::time::timeout(timeout, self.session.await_reply(handle))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        info!(
            batch_id = %batch_id,
            prompt_chars,
            reply_chars = reply.chars().count(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Chat reply received"
        );
        classify_reply(reply, prompt_chars)
    }

    fn supports_streaming(&self) -> bool {
        self.session.supports_streaming()
    }

    async fn send_streaming(
        &self,
        request: TranslationRequest,
    ) -> Result<ResponseStream, TransportError> {
        let (batch_id, prompt) = Self::prompt_of(&request)?;
        let prompt_chars = prompt.chars().count();
        let flight = self.gate.enter().await;

        let handle = self.submit(&prompt).await?;
        let replies = self.session.stream_reply(handle).await?;
        debug!(batch_id = %batch_id, prompt_chars, "Streaming chat reply");

        let state = ReplyState {
            replies,
            batch_id,
            prompt_chars,
            ordinal: 0,
            text: String::new(),
            finished: false,
            _flight: flight,
        };
        Ok(Box::pin(futures::stream::unfold(state, next_event)))
    }
}

struct ReplyState {
    replies: ReplyStream,
    batch_id: BatchId,
    prompt_chars: usize,
    ordinal: u64,
    text: String,
    finished: bool,
    _flight: OwnedMutexGuard<()>,
}

async fn next_event(
    mut state: ReplyState,
) -> Option<(Result<StreamEvent, TransportError>, ReplyState)> {
    if state.finished {
        return None;
    }
    loop {
        match state.replies.next().await {
            Some(Ok(delta)) if delta.is_empty() => continue,
            Some(Ok(delta)) => {
                state.text.push_str(&delta);
                let chunk = StreamChunk {
                    batch_id: state.batch_id,
                    ordinal: state.ordinal,
                    text_delta: delta,
                };
                state.ordinal += 1;
                return Some((Ok(StreamEvent::Chunk(chunk)), state));
            }
            Some(Err(err)) => {
                state.finished = true;
                return Some((Err(err), state));
            }
            None => {
                state.finished = true;
                let text = std::mem::take(&mut state.text);
                let event = classify_reply(text, state.prompt_chars).map(StreamEvent::Complete);
                return Some((event, state));
            }
        }
    }
}
