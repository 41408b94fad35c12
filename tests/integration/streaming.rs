//! Streaming transports relay chunks while the buffered response is reconciled.

use crate::integration::test_utils::greetings;
use honyaku::config::{BackendConfig, ConversationalConfig};
use honyaku::progress::ChannelSink;
use honyaku::progress::RecordingSink;
use honyaku::testing::{ScriptedChatSession, ScriptedTransport};
use honyaku::transport::{self, ChatSession};
use honyaku::types::{BatchId, StreamChunk};
use honyaku::{FragmentId, ProgressEvent, TranslatorConfig, Translator};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const REPLY: &str =
    r#"{"items":[{"id":1,"translation":"Hello"},{"id":2,"translation":"Thank you"},{"id":3,"translation":"Goodbye"}]}"#;

fn chunks(events: &[ProgressEvent]) -> Vec<StreamChunk> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Chunk(chunk) => Some(chunk.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chunks_arrive_in_order_and_reassemble_the_reply() {
    let transport = Arc::new(
        ScriptedTransport::with_responses(vec![Ok(REPLY.to_string())]).with_streaming(7),
    );
    let translator = Translator::new(transport, Default::default());
    let sink = RecordingSink::new();

    let map = translator
        .translate(greetings(), &TranslatorConfig::default(), &sink, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(map.translation(FragmentId(2)), Some("Thank you"));

    let events = sink.events();
    let chunks = chunks(&events);
    assert!(chunks.len() > 1);
    let ordinals: Vec<u64> = chunks.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, (0..chunks.len() as u64).collect::<Vec<_>>());
    let text: String = chunks.iter().map(|c| c.text_delta.as_str()).collect();
    assert_eq!(text, REPLY);

    // Chunks sit between their batch's start and resolution.
    let position = |pred: &dyn Fn(&ProgressEvent) -> bool| events.iter().position(pred).unwrap();
    let started = position(&|e| matches!(e, ProgressEvent::BatchStarted { .. }));
    let first_chunk = position(&|e| matches!(e, ProgressEvent::Chunk(_)));
    let resolved = position(&|e| matches!(e, ProgressEvent::BatchResolved { .. }));
    assert!(started < first_chunk && first_chunk < resolved);
}

#[tokio::test]
async fn streamed_chat_reply_reaches_channel_consumer() {
    let session = Arc::new(
        ScriptedChatSession::new(vec![
            "1. [[ID:1]] Hello\n2. [[ID:2]] Thank you\n3. [[ID:3]] Goodbye".to_string(),
        ])
        .with_streaming(5),
    );
    let backend = BackendConfig::Conversational(ConversationalConfig::default());
    let session: Arc<dyn ChatSession> = session;
    let translator = Translator::new(
        transport::from_config(&backend, Some(session)).unwrap(),
        Default::default(),
    );
    let config = TranslatorConfig {
        backend,
        ..TranslatorConfig::default()
    };
    let (sink, mut receiver) = ChannelSink::new_pair();

    let map = translator
        .translate(greetings(), &config, &sink, CancellationToken::new())
        .await
        .unwrap();
    drop(sink);
    assert_eq!(map.translated_count(), 3);

    let mut envelopes = Vec::new();
    while let Some(envelope) = receiver.recv().await {
        envelopes.push(envelope);
    }
    let seqs: Vec<u64> = envelopes.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..envelopes.len() as u64).collect::<Vec<_>>());

    let mut per_batch: BTreeMap<BatchId, String> = BTreeMap::new();
    for envelope in &envelopes {
        if let ProgressEvent::Chunk(chunk) = &envelope.event {
            per_batch
                .entry(chunk.batch_id)
                .or_default()
                .push_str(&chunk.text_delta);
        }
    }
    assert_eq!(per_batch.len(), 1);
    assert!(per_batch.values().all(|text| text.ends_with("Goodbye")));
    assert!(envelopes.last().unwrap().event.is_terminal());
}
