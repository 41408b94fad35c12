//! Streaming Relay
//!
//! Forwards a streaming transport's chunks to the progress sink in arrival order while
//! the full response is buffered for reconciliation. No parsing happens here.

use crate::error::TransportError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::transport::{ResponseStream, StreamEvent};
use crate::types::{BatchId, RawResponse};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct StreamingRelay<'a> {
    sink: &'a dyn ProgressSink,
    next_ordinal: u64,
    forwarded: usize,
}

impl<'a> StreamingRelay<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self {
            sink,
            next_ordinal: 0,
            forwarded: 0,
        }
    }

    /// Chunks forwarded so far.
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Drains `stream`, forwarding chunks, and returns the final response.
    ///
    /// Cancellation drops the stream, which aborts the in-flight call and releases the
    /// transport's single-flight gate.
    pub async fn run(
        &mut self,
        batch_id: BatchId,
        mut stream: ResponseStream,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, TransportError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(batch_id = %batch_id, forwarded = self.forwarded, "Relay cancelled");
                    return Err(TransportError::Cancelled);
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Chunk(chunk))) => {
                    if chunk.ordinal < self.next_ordinal {
                        warn!(
                            batch_id = %batch_id,
                            ordinal = chunk.ordinal,
                            expected = self.next_ordinal,
                            "Dropping out-of-order stream chunk"
                        );
                        continue;
                    }
                    self.next_ordinal = chunk.ordinal + 1;
                    self.forwarded += 1;
                    self.sink.emit(ProgressEvent::Chunk(chunk));
                }
                Some(Ok(StreamEvent::Complete(response))) => {
                    debug!(batch_id = %batch_id, forwarded = self.forwarded, "Stream complete");
                    return Ok(response);
                }
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(TransportError::InvalidResponse(
                        "stream ended without a final response".to_string(),
                    ))
                }
            }
        }
    }
}
