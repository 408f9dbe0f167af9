// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end flowable behaviour: sources, stages, terminals, and
//! cancellation.

use corun_cancel::{CancelStreamOptions, CancellationSource, CancellationToken, CancelledError};
use corun_flow::{FlowProcessor, Flowable};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn none() -> CancellationToken {
    CancellationToken::none()
}

#[tokio::test]
async fn of_round_trips() {
    let flow = Flowable::of(vec![1, 2, 3]);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn filter_then_map() {
    let flow = Flowable::of(vec![1, 2, 3, 4, 5])
        .filter(|v| v % 2 == 0)
        .map(|v, _| v * 2);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![4, 8]);
}

#[tokio::test]
async fn flowable_is_restartable() {
    let flow = Flowable::of(vec![1, 2, 3]).map(|v, i| v + i as i32);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![1, 3, 5]);
    // A second drain sees a fresh pipeline, indexes included.
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![1, 3, 5]);
}

#[tokio::test]
async fn single_and_empty() {
    assert_eq!(
        Flowable::single("x").to_vec(&none()).await.unwrap(),
        vec!["x"]
    );
    assert_eq!(
        Flowable::<i32>::empty().to_vec(&none()).await.unwrap(),
        Vec::<i32>::new()
    );
}

#[tokio::test]
async fn concat_drains_in_order() {
    let flow = Flowable::concat(vec![
        Flowable::of(vec![1, 2]),
        Flowable::of(vec![3]),
        Flowable::of(vec![4, 5]),
    ]);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![1, 2, 3, 4, 5]);
    let chained = Flowable::of(vec![1]).concat_with(&Flowable::of(vec![2]));
    assert_eq!(chained.to_vec(&none()).await.unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn pipe_shares_processor_chains() {
    let evens: FlowProcessor<i32, i32> = FlowProcessor::new().filter(|v| v % 2 == 0);
    let a = Flowable::of(vec![1, 2, 3, 4]).pipe(&evens);
    let b = Flowable::of(vec![5, 6, 7, 8]).pipe(&evens);
    assert_eq!(a.to_vec(&none()).await.unwrap(), vec![2, 4]);
    assert_eq!(b.to_vec(&none()).await.unwrap(), vec![6, 8]);
}

#[tokio::test]
async fn chunk_flushes_remainder() {
    let flow = Flowable::of(vec![1, 2, 3, 4, 5]).chunk(2);
    assert_eq!(
        flow.to_vec(&none()).await.unwrap(),
        vec![vec![1, 2], vec![3, 4], vec![5]]
    );
}

#[tokio::test]
async fn select_first_and_last() {
    let flow = Flowable::of(vec![10, 20, 30]);
    assert_eq!(flow.select_first(&none()).await.unwrap(), Some(10));
    assert_eq!(flow.select_last(&none()).await.unwrap(), Some(30));
    assert_eq!(
        Flowable::<i32>::empty().select_first(&none()).await.unwrap(),
        None
    );
    assert_eq!(
        Flowable::<i32>::empty().select_last(&none()).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn select_first_releases_the_source() {
    let opened = Arc::new(AtomicUsize::new(0));
    let opened2 = Arc::clone(&opened);
    let flow = Flowable::from_factory(move || {
        opened2.fetch_add(1, Ordering::SeqCst);
        Box::pin(futures::stream::iter((0..100).map(Ok)))
    });
    assert_eq!(flow.select_first(&none()).await.unwrap(), Some(0));
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn for_each_visits_in_order() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen2 = Arc::clone(&seen);
    Flowable::of(vec![1, 2, 3])
        .for_each(move |v| seen2.lock().unwrap().push(v), &none())
        .await
        .unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
}

#[tokio::test]
async fn strict_terminal_reports_cancellation() {
    let source = CancellationSource::new();
    source.cancel();
    let err = Flowable::of(vec![1, 2, 3])
        .to_vec(&source.token())
        .await
        .unwrap_err();
    assert!(err.downcast_ref::<CancelledError>().is_some());
}

#[tokio::test]
async fn silent_drain_yields_partial_prefix() {
    let source = CancellationSource::new();
    source.cancel();
    let out = Flowable::of(vec![1, 2, 3])
        .to_vec_with(CancelStreamOptions::with_token(&source.token()))
        .await
        .unwrap();
    assert!(out.is_empty());
}

#[tokio::test]
async fn to_stream_ends_silently_on_cancellation() {
    let source = CancellationSource::new();
    source.cancel();
    let mut stream = Flowable::of(vec![1, 2, 3])
        .to_stream(CancelStreamOptions::with_token(&source.token()));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn resume_on_error_recovers_mid_flow() {
    let flow = Flowable::from_factory(|| {
        Box::pin(futures::stream::iter(vec![
            Ok(1),
            Err(anyhow::anyhow!("blip")),
            Ok(2),
        ]))
    })
    .resume_on_any_error()
    .map(|v, _| v * 10);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![10, 20]);
}

#[tokio::test]
async fn unrecovered_error_aborts_the_drain() {
    let flow = Flowable::from_factory(|| {
        Box::pin(futures::stream::iter(vec![
            Ok(1),
            Err(anyhow::anyhow!("fatal")),
            Ok(2),
        ]))
    });
    let err = flow.to_vec(&none()).await.unwrap_err();
    assert!(err.to_string().contains("fatal"));
}

#[tokio::test]
async fn compose_expands_items() {
    let flow = Flowable::of(vec![1, 2]).compose(|v| {
        Box::pin(futures::stream::iter(vec![Ok(v), Ok(-v)]))
            as corun_flow::FallibleStream<i32>
    });
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![1, -1, 2, -2]);
}

#[tokio::test]
async fn skip_until_take_while_pipeline() {
    let flow = Flowable::of((0..10).collect::<Vec<_>>())
        .skip_until(|v| *v >= 3)
        .take_while(|v| *v < 7);
    assert_eq!(flow.to_vec(&none()).await.unwrap(), vec![3, 4, 5, 6]);
}

#[tokio::test]
async fn events_source_is_restartable() {
    let (tx, _rx) = tokio::sync::broadcast::channel::<i32>(8);
    let flow = Flowable::events(tx.clone()).take_while(|v| *v < 3);
    let drain = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.to_vec(&CancellationToken::none()).await })
    };
    tokio::task::yield_now().await;
    for v in [0, 1, 2, 3] {
        tx.send(v).unwrap();
        tokio::task::yield_now().await;
    }
    assert_eq!(drain.await.unwrap().unwrap(), vec![0, 1, 2]);
}
