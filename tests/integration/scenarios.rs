//! End-to-end translation scenarios against scripted structured backends.

use crate::integration::test_utils::{echo_items, greetings};
use honyaku::config::BatchLimits;
use honyaku::progress::RecordingSink;
use honyaku::testing::ScriptedTransport;
use honyaku::{
    Fragment, FragmentId, ProgressEvent, Resolution, TranslatorConfig, Translator,
    UnresolvedReason,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn translator(transport: &Arc<ScriptedTransport>) -> Translator {
    Translator::new(transport.clone(), Default::default())
}

#[tokio::test]
async fn scenario_a_structured_items_resolve_in_one_batch() {
    let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(
        r#"{"items":[{"id":1,"translation":"Hello"},{"id":2,"translation":"Thank you"},{"id":3,"translation":"Goodbye"}]}"#
            .to_string(),
    )]));
    let sink = RecordingSink::new();

    let map = translator(&transport)
        .translate(greetings(), &TranslatorConfig::default(), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(1)), Some("Hello"));
    assert_eq!(map.translation(FragmentId(2)), Some("Thank you"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert!(map.unresolved_ids().is_empty());
    assert_eq!(transport.requests().len(), 1);

    match sink.terminal_events().as_slice() {
        [ProgressEvent::Completed { report, .. }] => {
            assert_eq!(report.batches_planned, 1);
            assert_eq!(report.requests_sent, 1);
        }
        other => panic!("unexpected terminal events {:?}", other),
    }
}

#[tokio::test]
async fn scenario_b_malformed_json_falls_back_to_markers() {
    let transport = Arc::new(ScriptedTransport::with_responses(vec![Ok(
        "{\"items\": [ oops\n[[ID:1]] Hello\n[[ID:2]] Thank you\n[[ID:3]] Goodbye".to_string(),
    )]));
    let sink = RecordingSink::new();

    let map = translator(&transport)
        .translate(greetings(), &TranslatorConfig::default(), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(1)), Some("Hello"));
    assert_eq!(map.translation(FragmentId(2)), Some("Thank you"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scenario_c_missing_id_is_unresolved_after_retries() {
    let transport = Arc::new(ScriptedTransport::from_fn(|request| {
        if request.fragment_ids().len() == 3 {
            Ok(r#"{"items":[{"id":1,"translation":"Hello"},{"id":3,"translation":"Goodbye"}]}"#
                .to_string())
        } else {
            Ok(r#"{"items":[]}"#.to_string())
        }
    }));
    let sink = RecordingSink::new();

    let map = translator(&transport)
        .translate(greetings(), &TranslatorConfig::default(), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(1)), Some("Hello"));
    assert_eq!(map.translation(FragmentId(3)), Some("Goodbye"));
    assert_eq!(map.unresolved_ids(), vec![FragmentId(2)]);
    assert_eq!(
        map.get(FragmentId(2)),
        Some(&Resolution::Unresolved {
            reason: UnresolvedReason::AttemptsExhausted
        })
    );

    // Retry ceiling: id 2 went out exactly max_attempts times, ids 1 and 3 once.
    let requests = transport.requests();
    assert_eq!(requests.len(), 3);
    let dispatches_of = |id: u64| {
        requests
            .iter()
            .filter(|r| r.ids.contains(&FragmentId(id)))
            .count()
    };
    assert_eq!(dispatches_of(2), 3);
    assert_eq!(dispatches_of(1), 1);

    let waits: Vec<u64> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Retrying { wait_ms, .. } => Some(*wait_ms),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![2000, 4000]);

    match sink.terminal_events().as_slice() {
        [ProgressEvent::Partial { unresolved_ids, report, .. }] => {
            assert_eq!(unresolved_ids, &vec![FragmentId(2)]);
            assert_eq!(report.attempts_exhausted, 1);
        }
        other => panic!("unexpected terminal events {:?}", other),
    }
}

#[tokio::test]
async fn scenario_d_too_long_batch_is_resplit_until_it_fits() {
    const BUDGET: usize = 4000;
    let transport = Arc::new(
        ScriptedTransport::from_fn(|request| Ok(echo_items(request, "test"))).with_budget(BUDGET),
    );
    let fragments: Vec<Fragment> = (0..2000u64)
        .map(|i| Fragment::new(i, format!("テスト{}", i)))
        .collect();
    let config = TranslatorConfig {
        batch: BatchLimits {
            max_items: 5000,
            max_chars: 100_000,
            min_split_chars: 300,
        },
        ..TranslatorConfig::default()
    };
    let sink = RecordingSink::new();

    let map = translator(&transport)
        .translate(fragments, &config, &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.len(), 2000);
    assert_eq!(map.translated_count(), 2000);
    assert!(map.unresolved_with_reason(UnresolvedReason::Oversize).is_empty());
    assert_eq!(map.translation(FragmentId(1234)), Some("test 1234"));

    // Recorded text is system + "\n" + user.
    for request in transport.requests() {
        assert!(request.text.chars().count() <= BUDGET + 1);
    }
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, ProgressEvent::Resplit { .. })));
    match sink.terminal_events().as_slice() {
        [ProgressEvent::Completed { report, .. }] => {
            assert_eq!(report.batches_planned, 1);
            assert!(report.resplits > 0);
        }
        other => panic!("unexpected terminal events {:?}", other),
    }
}

#[tokio::test]
async fn oversize_fragment_is_unresolved_not_truncated() {
    let transport = Arc::new(
        ScriptedTransport::from_fn(|request| Ok(echo_items(request, "ok"))).with_budget(1200),
    );
    let fragments = vec![
        Fragment::new(1, "短い"),
        Fragment::new(2, "長".repeat(5000)),
        Fragment::new(3, "短い文"),
    ];
    let sink = RecordingSink::new();

    let map = translator(&transport)
        .translate(fragments, &TranslatorConfig::default(), &sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.translation(FragmentId(1)), Some("ok 1"));
    assert_eq!(map.translation(FragmentId(3)), Some("ok 3"));
    assert_eq!(
        map.get(FragmentId(2)),
        Some(&Resolution::Unresolved {
            reason: UnresolvedReason::Oversize
        })
    );
    assert!(transport
        .requests()
        .iter()
        .all(|r| !r.ids.contains(&FragmentId(2))));
    assert!(matches!(
        sink.terminal_events().as_slice(),
        [ProgressEvent::Partial { .. }]
    ));
}

#[tokio::test]
async fn batches_are_dispatched_in_plan_order() {
    let transport =
        Arc::new(ScriptedTransport::from_fn(|request| Ok(echo_items(request, "t"))));
    let fragments: Vec<Fragment> = (1..=7u64)
        .map(|i| Fragment::new(i, format!("文{}", i)))
        .collect();
    let config = TranslatorConfig {
        batch: BatchLimits {
            max_items: 3,
            ..BatchLimits::default()
        },
        ..TranslatorConfig::default()
    };
    let sink = RecordingSink::new();

    translator(&transport)
        .translate(fragments, &config, &sink, CancellationToken::new())
        .await
        .unwrap();

    let dispatched: Vec<Vec<u64>> = transport
        .requests()
        .iter()
        .map(|r| r.ids.iter().map(|id| id.as_u64()).collect())
        .collect();
    assert_eq!(dispatched, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);

    let started: Vec<(usize, usize)> = sink
        .events()
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::BatchStarted { index, total, .. } => Some((*index, *total)),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![(0, 3), (1, 3), (2, 3)]);
}
