//! Scripted transports and chat sessions for tests and for hosts that want a dry run.

use crate::error::TransportError;
use crate::prompt::{Protocol, TranslationRequest};
use crate::transport::conversational::ReplyStream;
use crate::transport::{
    check_budget, ChatSession, FlightGate, ResponseStream, StreamEvent, SubmissionHandle,
    Transport,
};
use crate::types::{BatchId, FragmentId, RawResponse, StreamChunk};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where scripted replies come from.
enum Script<T: ?Sized> {
    Queue(Mutex<VecDeque<Result<String, TransportError>>>),
    Fn(Box<dyn Fn(&T) -> Result<String, TransportError> + Send + Sync>),
}

impl<T: ?Sized> Script<T> {
    fn next(&self, input: &T) -> Result<String, TransportError> {
        match self {
            Script::Queue(queue) => queue
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("no scripted reply left".to_string()))),
            Script::Fn(responder) => responder(input),
        }
    }
}

/// A request as the scripted transport received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub batch_id: BatchId,
    pub ids: Vec<FragmentId>,
    /// Everything the backend would have read: system and user text, or the chat prompt.
    pub text: String,
}

impl RecordedRequest {
    fn from_request(request: &TranslationRequest) -> Self {
        let text = match request {
            TranslationRequest::Structured(r) => format!("{}\n{}", r.system, r.user),
            TranslationRequest::Conversational(r) => r.prompt.clone(),
        };
        Self {
            batch_id: request.batch_id(),
            ids: request.fragment_ids(),
            text,
        }
    }
}

/// Transport that answers from a script instead of a backend.
pub struct ScriptedTransport {
    script: Script<TranslationRequest>,
    protocol: Protocol,
    budget: Option<usize>,
    stream_chunk_chars: Option<usize>,
    delay: Duration,
    readiness_error: Mutex<Option<TransportError>>,
    gate: FlightGate,
    requests: Mutex<Vec<RecordedRequest>>,
    calls: AtomicUsize,
    max_calls: AtomicUsize,
    ready_checks: AtomicUsize,
}

impl ScriptedTransport {
    /// Replies are consumed in order; once exhausted every request fails with a request error.
    pub fn with_responses(responses: Vec<Result<String, TransportError>>) -> Self {
        Self::new(Script::Queue(Mutex::new(responses.into())))
    }

    /// Computes each reply from the request.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&TranslationRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Self::new(Script::Fn(Box::new(responder)))
    }

    fn new(script: Script<TranslationRequest>) -> Self {
        Self {
            script,
            protocol: Protocol::Structured,
            budget: None,
            stream_chunk_chars: None,
            delay: Duration::ZERO,
            readiness_error: Mutex::new(None),
            gate: FlightGate::new(),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            max_calls: AtomicUsize::new(0),
            ready_checks: AtomicUsize::new(0),
        }
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Declares a character budget; longer requests fail with `TooLong`.
    pub fn with_budget(mut self, budget_chars: usize) -> Self {
        self.budget = Some(budget_chars);
        self
    }

    /// Streams each reply in chunks of `chunk_chars` characters.
    pub fn with_streaming(mut self, chunk_chars: usize) -> Self {
        self.stream_chunk_chars = Some(chunk_chars.max(1));
        self
    }

    /// Simulated backend latency per request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `ensure_ready` fail with `error`.
    pub fn failing_readiness(self, error: TransportError) -> Self {
        *self.readiness_error.lock() = Some(error);
        self
    }

    /// Requests that reached the scripted backend, in dispatch order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Largest number of calls that were in progress at once, counting calls still
    /// waiting for the single-flight gate.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_calls.load(Ordering::SeqCst)
    }

    pub fn ready_checks(&self) -> usize {
        self.ready_checks.load(Ordering::SeqCst)
    }

    fn wrap(&self, text: String) -> RawResponse {
        match self.protocol {
            Protocol::Structured => RawResponse::Structured(text),
            Protocol::Conversational { .. } => RawResponse::FreeText(text),
        }
    }

    async fn answer(&self, request: &TranslationRequest) -> Result<RawResponse, TransportError> {
        check_budget(request, self.budget)?;
        self.requests.lock().push(RecordedRequest::from_request(request));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.script.next(request).map(|text| self.wrap(text))
    }

    fn begin_call(&self) -> CallGuard<'_> {
        let now = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_calls.fetch_max(now, Ordering::SeqCst);
        CallGuard(&self.calls)
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn char_budget(&self) -> Option<usize> {
        self.budget
    }

    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        self.ready_checks.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.readiness_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send(&self, request: TranslationRequest) -> Result<RawResponse, TransportError> {
        let _call = self.begin_call();
        let _flight = self.gate.enter().await;
        self.answer(&request).await
    }

    fn supports_streaming(&self) -> bool {
        self.stream_chunk_chars.is_some()
    }

    async fn send_streaming(
        &self,
        request: TranslationRequest,
    ) -> Result<ResponseStream, TransportError> {
        let _call = self.begin_call();
        let flight = self.gate.enter().await;
        let response = self.answer(&request).await?;
        let batch_id = request.batch_id();

        let chunk_chars = self.stream_chunk_chars.unwrap_or(usize::MAX);
        let mut events: Vec<Result<StreamEvent, TransportError>> = chunks(response.text(), chunk_chars)
            .into_iter()
            .enumerate()
            .map(|(ordinal, text_delta)| {
                Ok(StreamEvent::Chunk(StreamChunk {
                    batch_id,
                    ordinal: ordinal as u64,
                    text_delta,
                }))
            })
            .collect();
        events.push(Ok(StreamEvent::Complete(response)));

        Ok(Box::pin(futures::stream::iter(events).map(move |event| {
            let _held = &flight;
            event
        })))
    }
}

/// Chat session that answers from a script.
pub struct ScriptedChatSession {
    script: Script<str>,
    prompts: Mutex<Vec<String>>,
    pending: Mutex<HashMap<u64, Result<String, TransportError>>>,
    next_handle: AtomicU64,
    available: AtomicBool,
    stream_chunk_chars: Option<usize>,
}

impl ScriptedChatSession {
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(
            replies.into_iter().map(Ok).collect(),
        )))
    }

    /// Computes each reply from the submitted prompt.
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Self::with_script(Script::Fn(Box::new(responder)))
    }

    fn with_script(script: Script<str>) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            available: AtomicBool::new(true),
            stream_chunk_chars: None,
        }
    }

    /// Streams each reply in chunks of `chunk_chars` characters.
    pub fn with_streaming(mut self, chunk_chars: usize) -> Self {
        self.stream_chunk_chars = Some(chunk_chars.max(1));
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Prompts submitted so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    fn take(&self, handle: SubmissionHandle) -> Result<String, TransportError> {
        self.pending
            .lock()
            .remove(&handle.0)
            .unwrap_or_else(|| Err(TransportError::InvalidResponse(format!(
                "unknown submission {}",
                handle.0
            ))))
    }
}

#[async_trait]
impl ChatSession for ScriptedChatSession {
    async fn submit(&self, prompt: &str) -> Result<SubmissionHandle, TransportError> {
        self.prompts.lock().push(prompt.to_string());
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let reply = self.script.next(prompt);
        self.pending.lock().insert(handle, reply);
        Ok(SubmissionHandle(handle))
    }

    async fn await_reply(&self, handle: SubmissionHandle) -> Result<String, TransportError> {
        self.take(handle)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn supports_streaming(&self) -> bool {
        self.stream_chunk_chars.is_some()
    }

    async fn stream_reply(&self, handle: SubmissionHandle) -> Result<ReplyStream, TransportError> {
        let reply = self.take(handle)?;
        let chunk_chars = self.stream_chunk_chars.unwrap_or(usize::MAX);
        let deltas: Vec<Result<String, TransportError>> =
            chunks(&reply, chunk_chars).into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

fn chunks(text: &str, chunk_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_chars.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
