//! Structured transport against an endpoint with nothing listening.

use crate::integration::test_utils::greetings;
use honyaku::config::{BackendConfig, StructuredConfig};
use honyaku::progress::RecordingSink;
use honyaku::prompt::{assemble, PromptOptions, Protocol};
use honyaku::transport;
use honyaku::types::Batch;
use honyaku::{
    Fragment, ProgressEvent, TranslateError, TransportError, Translator, TranslatorConfig,
    UnresolvedReason,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn unreachable_backend() -> BackendConfig {
    BackendConfig::Structured(StructuredConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        startup_timeout_secs: 1,
        readiness_poll_ms: 100,
        ..StructuredConfig::default()
    })
}

#[tokio::test]
async fn readiness_gives_up_after_startup_timeout() {
    let transport = transport::from_config(&unreachable_backend(), None).unwrap();
    let err = transport
        .ensure_ready(&CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::StartupTimeout(t) if t == Duration::from_secs(1)));
    assert!(err.is_session_unavailable());
}

#[tokio::test]
async fn refused_connection_is_session_unavailable() {
    let transport = transport::from_config(&unreachable_backend(), None).unwrap();
    let batch = Batch::new(vec![Fragment::new(1, "こんにちは")]).unwrap();
    let request = assemble(&batch, &PromptOptions::default(), Protocol::Structured);

    let err = transport.send(request).await.unwrap_err();
    assert!(matches!(err, TransportError::SessionUnavailable(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn job_fails_with_startup_timeout_and_partial_map() {
    let backend = unreachable_backend();
    let translator = Translator::new(
        transport::from_config(&backend, None).unwrap(),
        Default::default(),
    );
    let config = TranslatorConfig {
        backend,
        ..TranslatorConfig::default()
    };
    let sink = RecordingSink::new();

    let err = translator
        .translate(greetings(), &config, &sink, CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        TranslateError::StartupTimeout { partial, .. } => {
            assert_eq!(partial.len(), 3);
            assert_eq!(
                partial
                    .unresolved_with_reason(UnresolvedReason::SessionUnavailable)
                    .len(),
                3
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(matches!(
        sink.terminal_events().as_slice(),
        [ProgressEvent::Failed { .. }]
    ));
}

#[test]
fn conversational_backend_requires_a_session() {
    let backend = BackendConfig::Conversational(Default::default());
    assert!(matches!(
        transport::from_config(&backend, None),
        Err(TranslateError::Config(_))
    ));
}
