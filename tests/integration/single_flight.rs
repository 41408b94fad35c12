//! One request in flight per transport; one job at a time per translator.

use crate::integration::test_utils::echo_items;
use honyaku::config::BatchLimits;
use honyaku::progress::NoopSink;
use honyaku::prompt::{assemble, PromptOptions, Protocol};
use honyaku::testing::ScriptedTransport;
use honyaku::types::Batch;
use honyaku::{Fragment, Transport, TranslatorConfig, Translator};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn concurrent_sends_are_serialized_by_the_transport() {
    let transport = ScriptedTransport::from_fn(|request| Ok(echo_items(request, "t")))
        .with_delay(Duration::from_secs(1));
    let first = Batch::new(vec![Fragment::new(1, "一"), Fragment::new(2, "二")]).unwrap();
    let second = Batch::new(vec![Fragment::new(3, "三"), Fragment::new(4, "四")]).unwrap();
    let options = PromptOptions::default();

    let started = Instant::now();
    let (a, b) = tokio::join!(
        transport.send(assemble(&first, &options, Protocol::Structured)),
        transport.send(assemble(&second, &options, Protocol::Structured)),
    );
    a.unwrap();
    b.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(transport.max_concurrent_calls(), 2);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_jobs_never_overlap_requests() {
    let transport = Arc::new(
        ScriptedTransport::from_fn(|request| Ok(echo_items(request, "t")))
            .with_delay(Duration::from_millis(250)),
    );
    let translator = Translator::new(transport.clone(), Default::default());
    let config = TranslatorConfig {
        batch: BatchLimits {
            max_items: 2,
            ..BatchLimits::default()
        },
        ..TranslatorConfig::default()
    };
    let job = |offset: u64| {
        (0..5u64)
            .map(|i| Fragment::new(offset + i, format!("文{}", offset + i)))
            .collect::<Vec<_>>()
    };

    let (a, b) = tokio::join!(
        translator.translate(job(0), &config, &NoopSink, CancellationToken::new()),
        translator.translate(job(100), &config, &NoopSink, CancellationToken::new()),
    );

    assert_eq!(a.unwrap().translated_count(), 5);
    assert_eq!(b.unwrap().translated_count(), 5);
    assert_eq!(transport.max_concurrent_calls(), 1);

    // Jobs hold the backend for their whole duration, so their requests do not interleave.
    let owners: Vec<bool> = transport
        .requests()
        .iter()
        .map(|r| r.ids[0].as_u64() >= 100)
        .collect();
    let switches = owners.windows(2).filter(|w| w[0] != w[1]).count();
    assert_eq!(switches, 1);
}
