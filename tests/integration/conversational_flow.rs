//! Jobs routed through the conversational transport and a scripted chat session.

use crate::integration::test_utils::greetings;
use honyaku::config::{BackendConfig, ConversationalConfig, RetryPolicy};
use honyaku::progress::RecordingSink;
use honyaku::testing::ScriptedChatSession;
use honyaku::transport::{self, ChatSession};
use honyaku::{Fragment, FragmentId, ProgressEvent, TranslateError, TranslatorConfig, Translator, UnresolvedReason};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn translator_for(session: Arc<ScriptedChatSession>, use_id_markers: bool) -> Translator {
    let backend = BackendConfig::Conversational(ConversationalConfig {
        use_id_markers,
        ..ConversationalConfig::default()
    });
    let session: Arc<dyn ChatSession> = session;
    let transport = transport::from_config(&backend, Some(session)).unwrap();
    Translator::new(transport, Default::default())
}

fn conversational_config(use_id_markers: bool) -> TranslatorConfig {
    TranslatorConfig {
        backend: BackendConfig::Conversational(ConversationalConfig {
            use_id_markers,
            ..ConversationalConfig::default()
        }),
        ..TranslatorConfig::default()
    }
}

#[tokio::test]
async fn id_marked_reply_with_preamble_resolves() {
    let session = Arc::new(ScriptedChatSession::new(vec![
        "Of course! Here are the translations.\n\n1. [[ID:1]] Hello\n2. [[ID:2]] Thank you\n3. [[ID:3]] Goodbye\n"
            .to_string(),
    ]));
    let sink = RecordingSink::new();

    let map = translator_for(session.clone(), true)
        .translate(greetings(), &conversational_config(true), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(1)), Some("Hello"));
    assert_eq!(map.translation(FragmentId(2)), Some("Thank you"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));

    let prompts = session.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("1. [[ID:1]] こんにちは"));
    assert!(prompts[0].contains("3. [[ID:3]] さようなら"));
}

#[tokio::test]
async fn plain_numbered_reply_aligns_positionally() {
    let session = Arc::new(ScriptedChatSession::new(vec![
        "Sure:\n\n1. Hello\n2. Thank you\n3. Goodbye".to_string(),
    ]));

    let map = translator_for(session.clone(), false)
        .translate(
            greetings(),
            &conversational_config(false),
            &RecordingSink::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(2)), Some("Thank you"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert!(!session.prompts()[0].contains("[[ID:"));
}

#[tokio::test]
async fn multi_paragraph_translation_is_kept_whole() {
    let session = Arc::new(ScriptedChatSession::new(vec![
        "[[ID:1]] Hello\n[[ID:2]] Thank you\n[[ID:3]] First paragraph.\n\nSecond paragraph."
            .to_string(),
    ]));

    let map = translator_for(session, true)
        .translate(
            greetings(),
            &conversational_config(true),
            &RecordingSink::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        map.translation(FragmentId(3)),
        Some("First paragraph.\n\nSecond paragraph.")
    );
}

#[tokio::test]
async fn split_request_reply_triggers_resplit() {
    let session = Arc::new(ScriptedChatSession::from_fn(|prompt| {
        let reply = if prompt.contains("[[ID:1]]") && prompt.contains("[[ID:3]]") {
            "This is too long to process at once. Could you split the text and send it in smaller parts?"
        } else if prompt.contains("[[ID:1]]") {
            "1. [[ID:1]] Hello\n2. [[ID:2]] Thank you"
        } else {
            "Translation: Goodbye"
        };
        Ok(reply.to_string())
    }));
    let sink = RecordingSink::new();

    let map = translator_for(session.clone(), true)
        .translate(greetings(), &conversational_config(true), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translated_count(), 3);
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert_eq!(session.prompts().len(), 3);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ProgressEvent::Resplit { .. })));
}

#[tokio::test(start_paused = true)]
async fn repeated_split_requests_stop_at_the_attempt_ceiling() {
    let session = Arc::new(ScriptedChatSession::from_fn(|prompt| {
        let reply = if prompt.contains("[[ID:") {
            "This is too long to process at once. Could you split the text and send it in smaller parts?"
        } else {
            "Sorry, I am not sure what you mean."
        };
        Ok(reply.to_string())
    }));
    let texts: Vec<String> = (1..=16).map(|i| format!("項目{}番", i)).collect();
    let fragments: Vec<Fragment> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| Fragment::new(i as u64 + 1, text.clone()))
        .collect();
    let sink = RecordingSink::new();

    let map = translator_for(session.clone(), true)
        .translate(fragments, &conversational_config(true), &sink, CancellationToken::new())
        .await
        .unwrap();

    let prompts = session.prompts();
    let max_attempts = RetryPolicy::default().max_attempts as usize;
    for text in &texts {
        let sent = prompts.iter().filter(|p| p.contains(text.as_str())).count();
        assert!(sent <= max_attempts, "{} was sent {} times", text, sent);
    }
    assert_eq!(
        map.unresolved_with_reason(UnresolvedReason::AttemptsExhausted).len(),
        16
    );
    assert!(matches!(
        sink.terminal_events().as_slice(),
        [ProgressEvent::Partial { .. }]
    ));
}

#[tokio::test]
async fn unavailable_session_fails_job_with_complete_partial_map() {
    let session = Arc::new(ScriptedChatSession::new(Vec::new()));
    session.set_available(false);
    let sink = RecordingSink::new();

    let err = translator_for(session.clone(), true)
        .translate(greetings(), &conversational_config(true), &sink, CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        TranslateError::SessionUnavailable { partial, .. } => {
            assert_eq!(partial.len(), 3);
            assert_eq!(
                partial.unresolved_with_reason(UnresolvedReason::SessionUnavailable).len(),
                3
            );
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(session.prompts().is_empty());
    assert!(matches!(
        sink.terminal_events().as_slice(),
        [ProgressEvent::Failed { .. }]
    ));
}
