//! Structured transport for a local OpenAI-compatible inference server.
//!
//! The server process is owned elsewhere; this client polls `/v1/models` until the server
//! answers, then posts chat completions with a JSON response-format hint.

use super::sse::{SseDecoder, SseEvent};
use super::{check_budget, FlightGate, ResponseStream, StreamEvent, Transport};
use crate::config::StructuredConfig;
use crate::error::TransportError;
use crate::prompt::{Protocol, StructuredRequest, TranslationRequest};
use crate::types::{BatchId, RawResponse, StreamChunk};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Body fragments a llama.cpp-style server uses when the prompt exceeds its context.
const CONTEXT_OVERFLOW_HINTS: [&str; 5] = ["context", "token", "too long", "exceed", "n_ctx"];

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    repeat_penalty: f32,
    max_tokens: u32,
    stream: bool,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct StructuredTransport {
    client: Client,
    config: StructuredConfig,
    gate: FlightGate,
    ready: AtomicBool,
}

impl StructuredTransport {
    pub fn new(config: StructuredConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            gate: FlightGate::new(),
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StructuredConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Characters left for the prompt once the completion's token reservation is taken out.
    pub fn prompt_budget(&self) -> usize {
        let prompt_tokens = self
            .config
            .context_tokens
            .saturating_sub(self.config.sampling.max_tokens);
        (prompt_tokens as f64 * self.config.chars_per_token).floor() as usize
    }

    fn body<'a>(&'a self, request: &'a StructuredRequest, stream: bool) -> ChatCompletionRequest<'a> {
        let sampling = &self.config.sampling;
        ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &request.system,
                },
                WireMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            top_k: sampling.top_k,
            repeat_penalty: sampling.repeat_penalty,
            max_tokens: sampling.max_tokens,
            stream,
            response_format: json!({ "type": "json_object" }),
        }
    }

    async fn post(
        &self,
        request: &StructuredRequest,
        stream: bool,
    ) -> Result<reqwest::Response, TransportError> {
        let prompt_chars = request.system.chars().count() + request.user.chars().count();
        let response = self
            .client
            .post(self.endpoint("/v1/chat/completions"))
            .json(&self.body(request, stream))
            .send()
            .await
            .map_err(map_http_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(classify_status(status, body, prompt_chars, self.prompt_budget()))
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(self.endpoint("/v1/models"))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(err) => {
                debug!(error = %err, "Readiness probe failed");
                false
            }
        }
    }
}

fn structured_of(request: &TranslationRequest) -> Result<&StructuredRequest, TransportError> {
    match request {
        TranslationRequest::Structured(r) => Ok(r),
        TranslationRequest::Conversational(_) => Err(TransportError::Request(
            "structured transport received a conversational request".to_string(),
        )),
    }
}

fn map_http_error(error: reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::SessionUnavailable(format!("Connection error: {}", error))
    } else if error.is_timeout() {
        TransportError::Request(format!("Request timeout: {}", error))
    } else {
        TransportError::Request(format!("HTTP error: {}", error))
    }
}

fn classify_status(
    status: StatusCode,
    body: String,
    prompt_chars: usize,
    budget_chars: usize,
) -> TransportError {
    if status == StatusCode::BAD_REQUEST {
        let lowered = body.to_lowercase();
        if CONTEXT_OVERFLOW_HINTS.iter().any(|hint| lowered.contains(hint)) {
            return TransportError::TooLong {
                prompt_chars,
                budget_chars: Some(budget_chars),
            };
        }
    }
    TransportError::Http {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl Transport for StructuredTransport {
    fn name(&self) -> &str {
        "structured"
    }

    fn protocol(&self) -> Protocol {
        Protocol::Structured
    }

    fn char_budget(&self) -> Option<usize> {
        Some(self.prompt_budget())
    }

    async fn ensure_ready(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let poll = Duration::from_millis(self.config.readiness_poll_ms.max(1));
        let deadline = Instant::now() + timeout;
        let started = Instant::now();
        info!(base_url = %self.config.base_url, "Waiting for local inference server");

        loop {
            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                ready = self.probe() => ready,
            };
            if ready {
                self.ready.store(true, Ordering::Release);
                info!(
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Local inference server is ready"
                );
                return Ok(());
            }
            if Instant::now() + poll > deadline {
                warn!(timeout_secs = timeout.as_secs(), "Local inference server did not start");
                return Err(TransportError::StartupTimeout(timeout));
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }

    async fn send(&self, request: TranslationRequest) -> Result<RawResponse, TransportError> {
        check_budget(&request, self.char_budget())?;
        let structured = structured_of(&request)?;
        let _flight = self.gate.enter().await;
        let started = std::time::Instant::now();

        let response = self.post(structured, false).await?;
        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            TransportError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::InvalidResponse("No choices in response".to_string()))?;
        let content = choice.message.content.unwrap_or_default();

        info!(
            batch_id = %structured.batch_id,
            prompt_chars = request.serialized_len(),
            response_chars = content.chars().count(),
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            duration_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );
        Ok(RawResponse::Structured(content))
    }

    fn supports_streaming(&self) -> bool {
        self.config.stream
    }

    async fn send_streaming(
        &self,
        request: TranslationRequest,
    ) -> Result<ResponseStream, TransportError> {
        check_budget(&request, self.char_budget())?;
        let structured = structured_of(&request)?;
        let flight = self.gate.enter().await;

        let response = self.post(structured, true).await?;
        let state = SseState {
            bytes: Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))),
            decoder: SseDecoder::new(),
            pending: Vec::new(),
            batch_id: structured.batch_id,
            ordinal: 0,
            text: String::new(),
            finished: false,
            _flight: flight,
        };
        Ok(Box::pin(futures::stream::unfold(state, next_sse_event)))
    }
}

type ByteStream = Pin<Box<dyn futures::Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

struct SseState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: Vec<SseEvent>,
    batch_id: BatchId,
    ordinal: u64,
    text: String,
    finished: bool,
    _flight: OwnedMutexGuard<()>,
}

impl SseState {
    fn chunk(&mut self, delta: String) -> StreamEvent {
        self.text.push_str(&delta);
        let chunk = StreamChunk {
            batch_id: self.batch_id,
            ordinal: self.ordinal,
            text_delta: delta,
        };
        self.ordinal += 1;
        StreamEvent::Chunk(chunk)
    }

    fn complete(&mut self) -> StreamEvent {
        self.finished = true;
        StreamEvent::Complete(RawResponse::Structured(std::mem::take(&mut self.text)))
    }
}

async fn next_sse_event(
    mut state: SseState,
) -> Option<(Result<StreamEvent, TransportError>, SseState)> {
    loop {
        if state.finished {
            return None;
        }
        if !state.pending.is_empty() {
            let event = match state.pending.remove(0) {
                SseEvent::Delta(delta) => state.chunk(delta),
                SseEvent::Done => state.complete(),
            };
            return Some((Ok(event), state));
        }
        match state.bytes.next().await {
            Some(Ok(bytes)) => {
                let events = state.decoder.push(&bytes);
                state.pending.extend(events);
            }
            Some(Err(err)) => {
                state.finished = true;
                return Some((Err(map_http_error(err)), state));
            }
            None => {
                let rest = state.decoder.finish();
                if rest.is_empty() {
                    let event = state.complete();
                    return Some((Ok(event), state));
                }
                state.pending.extend(rest);
                state.pending.push(SseEvent::Done);
            }
        }
    }
}
