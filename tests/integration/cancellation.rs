//! Cancellation keeps partial progress and marks the rest cancelled.

use crate::integration::test_utils::{echo_items, greetings};
use honyaku::config::BatchLimits;
use honyaku::progress::RecordingSink;
use honyaku::testing::ScriptedTransport;
use honyaku::{FragmentId, ProgressEvent, TranslatorConfig, Translator, UnresolvedReason};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn cancel_aborts_in_flight_request_and_skips_remaining_batches() {
    let transport = Arc::new(
        ScriptedTransport::from_fn(|request| Ok(echo_items(request, "t")))
            .with_delay(Duration::from_secs(10)),
    );
    let translator = Translator::new(transport.clone(), Default::default());
    let config = TranslatorConfig {
        batch: BatchLimits {
            max_items: 1,
            ..BatchLimits::default()
        },
        ..TranslatorConfig::default()
    };
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let (result, _) = tokio::join!(
        translator.translate(greetings(), &config, &sink, cancel.clone()),
        canceller
    );

    let map = result.unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(
        map.unresolved_with_reason(UnresolvedReason::Cancelled),
        vec![FragmentId(1), FragmentId(2), FragmentId(3)]
    );
    assert_eq!(transport.requests().len(), 1);
    assert!(matches!(
        sink.terminal_events().as_slice(),
        [ProgressEvent::Cancelled { .. }]
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_keeps_resolved_fragments() {
    let transport = Arc::new(ScriptedTransport::from_fn(|_| {
        Ok(r#"{"items":[{"id":1,"translation":"Hello"},{"id":3,"translation":"Goodbye"}]}"#
            .to_string())
    }));
    let translator = Translator::new(transport.clone(), Default::default());
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        async move {
            // First backoff is 2s.
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    };
    let config = TranslatorConfig::default();
    let (result, _) = tokio::join!(
        translator.translate(greetings(), &config, &sink, cancel.clone()),
        canceller
    );

    let map = result.unwrap();
    assert_eq!(map.translation(FragmentId(1)), Some("Hello"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert_eq!(
        map.unresolved_with_reason(UnresolvedReason::Cancelled),
        vec![FragmentId(2)]
    );
    assert_eq!(transport.requests().len(), 1);

    match sink.terminal_events().as_slice() {
        [ProgressEvent::Cancelled { map: event_map, .. }] => assert_eq!(event_map, &map),
        other => panic!("unexpected terminal events {:?}", other),
    }
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let transport = Arc::new(ScriptedTransport::with_responses(Vec::new()));
    let translator = Translator::new(transport.clone(), Default::default());
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let map = translator
        .translate(greetings(), &TranslatorConfig::default(), &sink, cancel)
        .await
        .unwrap();

    assert_eq!(map.unresolved_with_reason(UnresolvedReason::Cancelled).len(), 3);
    assert_eq!(transport.ready_checks(), 0);
    assert!(transport.requests().is_empty());
    assert_eq!(sink.terminal_events().len(), 1);
}
